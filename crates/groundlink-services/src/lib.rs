//! groundlink-services — the live side of the client: server link,
//! receive loop, heartbeat, telemetry polling and software-update transfer.

pub mod dispatch;
pub mod heartbeat;
pub mod link;
pub mod stores;
pub mod telemetry;
pub mod transfer;

pub use dispatch::{FrameRouter, ReceiveLoop};
pub use heartbeat::Heartbeat;
pub use link::{ConnectError, ConnectionState, DisconnectReason, Link, LinkError, LinkPhase};
pub use stores::{LinkStores, TelemetryEntry};
pub use telemetry::{PollError, TelemetryPoller};
pub use transfer::{
    start_transfer, TransferError, TransferPhase, TransferProgress, TransferReport,
    TransferRoute, TransferSession,
};
