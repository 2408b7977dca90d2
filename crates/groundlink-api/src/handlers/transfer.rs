//! /transfer handlers: start a software update and report its progress.

use std::path::PathBuf;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use groundlink_services::{start_transfer, TransferError, TransferProgress, TransferSession};

use super::ApiState;

// ── /transfer (POST) ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct TransferRequest {
    /// File on the daemon host.
    pub path: PathBuf,
    #[serde(default)]
    pub file_id: u8,
    /// Bytes already delivered in an earlier attempt.
    #[serde(default)]
    pub resume_from: i32,
}

#[derive(Serialize)]
pub struct TransferStarted {
    pub path: String,
    pub total_packets: i32,
}

pub async fn handle_transfer(
    State(state): State<ApiState>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<TransferStarted>, (StatusCode, String)> {
    if !state.link.is_ready() {
        return Err((StatusCode::SERVICE_UNAVAILABLE, "link not ready".to_string()));
    }
    if state.transfers.is_busy() {
        return Err((StatusCode::CONFLICT, TransferError::Busy.to_string()));
    }

    let session = TransferSession::open(&req.path, req.file_id)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
        .resuming_from(req.resume_from);
    let total_packets = session.total_packets();

    let handle = start_transfer(
        &state.link,
        &state.transfers,
        &state.config.transfer,
        session,
    )
    .map_err(|e| match e {
        TransferError::Busy => (StatusCode::CONFLICT, e.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    })?;

    let path = req.path.display().to_string();
    tracing::info!(path = %path, total_packets, "transfer started via API");
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(report)) => tracing::info!(
                filename = %report.filename,
                packets_sent = report.packets_sent,
                resumed_at = report.resumed_at,
                hash = %report.hash,
                "transfer via API finished"
            ),
            Ok(Err(e)) => tracing::warn!(error = %e, "transfer via API failed"),
            Err(e) => tracing::error!(error = %e, "transfer task panicked"),
        }
    });

    Ok(Json(TransferStarted {
        path,
        total_packets,
    }))
}

// ── /transfer (GET) ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct TransferStatusResponse {
    pub busy: bool,
    #[serde(flatten)]
    pub progress: TransferProgress,
}

pub async fn handle_transfer_status(State(state): State<ApiState>) -> Json<TransferStatusResponse> {
    Json(TransferStatusResponse {
        busy: state.transfers.is_busy(),
        progress: state.transfers.progress(),
    })
}
