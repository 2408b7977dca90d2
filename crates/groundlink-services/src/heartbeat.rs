//! Periodic keep-alive frames.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use groundlink_core::wire::{Endpoint, Frame, FrameError, FrameType};

use crate::link::{Link, LinkError};

/// An empty Null frame addressed to the server.
pub fn heartbeat_frame() -> Result<Frame, FrameError> {
    let mut frame = Frame::build(FrameType::Null, 0)?;
    frame.store(Endpoint::Server, &[])?;
    Ok(frame)
}

/// Sends a heartbeat every `interval` while the link is up.
pub struct Heartbeat {
    link: Link,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl Heartbeat {
    pub fn new(link: Link, interval: Duration, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            link,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let frame = heartbeat_frame()?;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("heartbeat shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.link.send_frame(&frame).await {
                        Ok(_) => tracing::trace!("heartbeat sent"),
                        Err(LinkError::NotReady) => {}
                        Err(e) => tracing::warn!(error = %e, "heartbeat failed"),
                    }
                }
            }
        }
    }
}
