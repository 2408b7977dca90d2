//! /status, /connect, /disconnect, /daemon/shutdown handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use groundlink_core::wire::Endpoint;
use groundlink_services::{ConnectError, DisconnectReason, TransferProgress};

use super::{secs_since, ApiState};

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub phase: String,
    pub ready: bool,
    pub generation: u64,
    pub peer: Option<String>,
    pub connected_secs: Option<u64>,
    pub last_contact_secs: Option<u64>,
    pub last_disconnect: Option<String>,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub network: Vec<EndpointStatus>,
    pub telemetry_buffered: usize,
    pub transfer: TransferProgress,
}

#[derive(Serialize)]
pub struct EndpointStatus {
    pub name: String,
    pub online: bool,
    pub port: u16,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let link = state.link.state();

    let network = Endpoint::ALL
        .iter()
        .map(|&endpoint| EndpointStatus {
            name: endpoint.name().to_string(),
            online: link.netstat.is_online(endpoint),
            port: state.config.network.port_of(endpoint),
        })
        .collect();

    Json(StatusResponse {
        phase: link.phase.as_str().to_string(),
        ready: link.is_ready(),
        generation: link.generation,
        peer: link.peer.map(|p| p.to_string()),
        connected_secs: link.connected_at.filter(|_| link.is_ready()).map(secs_since),
        last_contact_secs: link.last_contact.map(secs_since),
        last_disconnect: link.last_disconnect.map(|r| r.to_string()),
        frames_sent: link.frames_sent,
        frames_received: link.frames_received,
        network,
        telemetry_buffered: state.stores.telemetry().len(),
        transfer: state.transfers.progress(),
    })
}

// ── /connect (POST) ───────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct ConnectRequest {
    /// Defaults to the configured server address.
    pub address: Option<String>,
    pub port: Option<u16>,
}

#[derive(Serialize)]
pub struct ConnectResponse {
    pub peer: String,
    pub generation: u64,
}

pub async fn handle_connect(
    State(state): State<ApiState>,
    body: Option<Json<ConnectRequest>>,
) -> Result<Json<ConnectResponse>, (StatusCode, String)> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let network = &state.config.network;
    let address = req.address.unwrap_or_else(|| network.server_addr.clone());
    let port = req.port.unwrap_or(network.server_port);

    let peer = state
        .link
        .connect(&address, port, network.connect_timeout())
        .await
        .map_err(|e| {
            let status = match e {
                ConnectError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
                ConnectError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            };
            (status, e.to_string())
        })?;

    Ok(Json(ConnectResponse {
        peer: peer.to_string(),
        generation: state.link.generation(),
    }))
}

// ── /disconnect (POST) ────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct DisconnectResponse {
    pub was_connected: bool,
}

pub async fn handle_disconnect(State(state): State<ApiState>) -> Json<DisconnectResponse> {
    let was_connected = state.link.disconnect(DisconnectReason::User).await;
    Json(DisconnectResponse { was_connected })
}

// ── /daemon/shutdown ──────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    let _ = state.shutdown_tx.send(());
    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
    })
}
