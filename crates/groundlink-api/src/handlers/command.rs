//! /command, /ack, /config handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use groundlink_core::record::CommandRecord;
use groundlink_core::wire::{Endpoint, FrameType};

use super::{link_error, secs_since, ApiState};

// ── /command (POST) ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CommandRequest {
    pub module: u8,
    pub command: u8,
    /// Hex-encoded command data.
    #[serde(default)]
    pub data: String,
    /// Defaults to the configured command endpoint.
    pub endpoint: Option<Endpoint>,
}

#[derive(Serialize)]
pub struct CommandResponse {
    pub endpoint: Endpoint,
    pub bytes_sent: usize,
}

pub async fn handle_command(
    State(state): State<ApiState>,
    Json(req): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, (StatusCode, String)> {
    let data = hex::decode(req.data.trim())
        .map_err(|_| (StatusCode::BAD_REQUEST, "invalid hex".to_string()))?;
    let record = CommandRecord::new(req.module, req.command, &data)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let endpoint = req.endpoint.unwrap_or(state.config.link.command_endpoint);

    let bytes_sent = state
        .link
        .send_command(endpoint, &record)
        .await
        .map_err(link_error)?;
    tracing::info!(
        module = req.module,
        command = req.command,
        endpoint = endpoint.name(),
        "command sent"
    );

    Ok(Json(CommandResponse {
        endpoint,
        bytes_sent,
    }))
}

// ── /command (GET) ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct CommandOutputResponse {
    pub module_id: u8,
    pub command_id: u8,
    pub data: String,
    pub received_secs: u64,
}

pub async fn handle_command_output(
    State(state): State<ApiState>,
) -> Result<Json<CommandOutputResponse>, (StatusCode, String)> {
    let output = state
        .stores
        .latest_command_output()
        .ok_or((StatusCode::NOT_FOUND, "no command output yet".to_string()))?;
    Ok(Json(CommandOutputResponse {
        module_id: output.record.module_id,
        command_id: output.record.command_id,
        data: hex::encode(output.record.data()),
        received_secs: secs_since(output.received_at),
    }))
}

// ── /ack ──────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct AckResponse {
    pub ack: bool,
    pub nack: bool,
    pub error_code: i32,
    pub received_secs: u64,
}

pub async fn handle_ack(
    State(state): State<ApiState>,
) -> Result<Json<AckResponse>, (StatusCode, String)> {
    let entry = state
        .stores
        .latest_ack()
        .ok_or((StatusCode::NOT_FOUND, "no acknowledgement yet".to_string()))?;
    Ok(Json(AckResponse {
        ack: entry.record.is_ack(),
        nack: entry.nack,
        error_code: entry.record.code(),
        received_secs: secs_since(entry.received_at),
    }))
}

// ── /config ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct RadioConfigResponse {
    pub uhf: Option<ConfigBlockInfo>,
    pub xband: Option<ConfigBlockInfo>,
}

#[derive(Serialize)]
pub struct ConfigBlockInfo {
    pub data: String,
    pub received_secs: u64,
}

pub async fn handle_config(State(state): State<ApiState>) -> Json<RadioConfigResponse> {
    let block = |kind| {
        state.stores.config(kind).map(|b| ConfigBlockInfo {
            data: hex::encode(&b.data),
            received_secs: secs_since(b.received_at),
        })
    };
    Json(RadioConfigResponse {
        uhf: block(FrameType::ConfigUhf),
        xband: block(FrameType::ConfigXBand),
    })
}
