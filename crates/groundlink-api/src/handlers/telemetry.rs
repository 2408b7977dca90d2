//! /telemetry handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use groundlink_services::{PollError, TelemetryEntry};

use super::{link_error, secs_since, ApiState};

#[derive(Serialize)]
pub struct TelemetryItem {
    pub seq: u64,
    pub command_id: u8,
    pub data: String,
    pub received_secs: u64,
}

impl From<&TelemetryEntry> for TelemetryItem {
    fn from(entry: &TelemetryEntry) -> Self {
        Self {
            seq: entry.seq,
            command_id: entry.record.command_id,
            data: hex::encode(entry.record.data()),
            received_secs: secs_since(entry.received_at),
        }
    }
}

// ── /telemetry (GET) ──────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct TelemetryResponse {
    pub capacity: usize,
    pub entries: Vec<TelemetryItem>,
}

pub async fn handle_telemetry(State(state): State<ApiState>) -> Json<TelemetryResponse> {
    let ring = state.stores.telemetry();
    Json(TelemetryResponse {
        capacity: ring.capacity(),
        entries: ring.snapshot().iter().map(TelemetryItem::from).collect(),
    })
}

// ── /telemetry/poll (POST) ────────────────────────────────────────────────────

pub async fn handle_telemetry_poll(
    State(state): State<ApiState>,
) -> Result<Json<TelemetryItem>, (StatusCode, String)> {
    match state.poller.poll().await {
        Ok(entry) => Ok(Json(TelemetryItem::from(&entry))),
        Err(PollError::Link(e)) => Err(link_error(e)),
        Err(e @ PollError::Busy) => Err((StatusCode::CONFLICT, e.to_string())),
        Err(e @ PollError::Timeout(_)) => Err((StatusCode::GATEWAY_TIMEOUT, e.to_string())),
        Err(e @ PollError::Frame(_)) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}
