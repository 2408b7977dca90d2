//! On-demand telemetry polling.
//!
//! A poll sends one update request and waits for the next entry in the
//! telemetry ring. Only one poll may be outstanding; a second caller gets
//! `Busy` instead of queueing behind the first.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use groundlink_core::record::{module, telemetry_cmd, CommandRecord};
use groundlink_core::wire::{Endpoint, FrameError};

use crate::link::{Link, LinkError};
use crate::stores::{LinkStores, TelemetryEntry};

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("a telemetry poll is already in flight")]
    Busy,
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("no telemetry within {0:?}")]
    Timeout(Duration),
}

#[derive(Clone)]
pub struct TelemetryPoller {
    link: Link,
    stores: LinkStores,
    endpoint: Endpoint,
    timeout: Duration,
    in_flight: Arc<Mutex<()>>,
}

impl TelemetryPoller {
    pub fn new(link: Link, stores: LinkStores, endpoint: Endpoint, timeout: Duration) -> Self {
        Self {
            link,
            stores,
            endpoint,
            timeout,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Request one telemetry update and wait for it to arrive.
    pub async fn poll(&self) -> Result<TelemetryEntry, PollError> {
        let _guard = self.in_flight.try_lock().map_err(|_| PollError::Busy)?;

        let mut updates = self.stores.telemetry().subscribe();
        let before = *updates.borrow_and_update();

        let request = CommandRecord::new(module::TELEMETRY, telemetry_cmd::REQUEST_UPDATE, &[])?;
        self.link.send_command(self.endpoint, &request).await?;
        tracing::debug!(endpoint = self.endpoint.name(), "telemetry requested");

        let arrived = tokio::time::timeout(self.timeout, updates.wait_for(|seq| *seq > before))
            .await
            .map_err(|_| PollError::Timeout(self.timeout))?
            .is_ok();
        if arrived {
            if let Some(entry) = self.stores.telemetry().latest() {
                return Ok(entry);
            }
        }
        Err(PollError::Timeout(self.timeout))
    }
}
