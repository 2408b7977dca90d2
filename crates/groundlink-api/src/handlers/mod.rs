//! HTTP API handlers. Exposes link state and operator actions as JSON.

pub mod command;
pub mod link;
pub mod telemetry;
pub mod transfer;

use std::sync::Arc;
use std::time::SystemTime;

use axum::http::StatusCode;

use groundlink_core::config::GroundlinkConfig;
use groundlink_services::{Link, LinkError, LinkStores, TelemetryPoller, TransferRoute};

#[derive(Clone)]
pub struct ApiState {
    pub link: Link,
    pub stores: LinkStores,
    pub transfers: TransferRoute,
    pub poller: TelemetryPoller,
    pub config: Arc<GroundlinkConfig>,
    /// Fires the daemon-wide shutdown.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Seconds since `t`, zero if the clock went backwards.
fn secs_since(t: SystemTime) -> u64 {
    t.elapsed().map(|d| d.as_secs()).unwrap_or(0)
}

fn link_error(e: LinkError) -> (StatusCode, String) {
    let status = match e {
        LinkError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        LinkError::Frame(_) => StatusCode::BAD_REQUEST,
        LinkError::Integrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
        LinkError::Io(_) => StatusCode::BAD_GATEWAY,
    };
    (status, e.to_string())
}

// Re-export handler functions for use in router setup.
pub use command::{handle_ack, handle_command, handle_command_output, handle_config};
pub use link::{handle_connect, handle_disconnect, handle_shutdown, handle_status};
pub use telemetry::{handle_telemetry, handle_telemetry_poll};
pub use transfer::{handle_transfer, handle_transfer_status};
