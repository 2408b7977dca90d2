//! Receive loop and frame routing.
//!
//! The loop owns the read half of each connection in turn. Bytes go through
//! a `FrameAssembler`; every frame that passes its integrity check is routed
//! by type into the stores or to the running transfer. Frames that fail are
//! logged and dropped without touching the connection.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::broadcast;

use groundlink_core::record::{module, AckRecord, CommandRecord};
use groundlink_core::swupd::SwUpdMessage;
use groundlink_core::wire::{Frame, FrameType, FRAME_SIZE};
use groundlink_core::FrameAssembler;

use crate::link::{DisconnectReason, Link, LinkReader};
use crate::stores::LinkStores;
use crate::transfer::TransferRoute;

/// Routes validated frames to their consumers.
#[derive(Clone)]
pub struct FrameRouter {
    link: Link,
    stores: LinkStores,
    transfers: TransferRoute,
}

impl FrameRouter {
    pub fn new(link: Link, stores: LinkStores, transfers: TransferRoute) -> Self {
        Self {
            link,
            stores,
            transfers,
        }
    }

    /// Route one frame. The frame must already have passed `check_integrity`.
    pub fn route(&self, frame: &Frame) {
        self.link.record_contact(frame.netstat());
        let payload = frame.payload();

        match frame.kind() {
            Ok(FrameType::Null) => tracing::trace!("heartbeat frame"),
            Ok(kind @ (FrameType::Ack | FrameType::Nack)) => match AckRecord::from_payload(payload) {
                Ok(record) => {
                    tracing::debug!(ack = record.is_ack(), code = record.code(), "acknowledgement");
                    self.stores.record_ack(record, kind == FrameType::Nack);
                }
                Err(e) => tracing::warn!(error = %e, "malformed acknowledgement"),
            },
            Ok(kind @ (FrameType::ConfigUhf | FrameType::ConfigXBand)) => {
                tracing::debug!(?kind, len = payload.len(), "configuration block");
                self.stores.record_config(kind, payload);
            }
            Ok(FrameType::Data) => self.route_data(payload),
            Ok(FrameType::Error) => tracing::debug!("error frame dropped"),
            Err(e) => tracing::debug!(error = %e, "frame of unknown type dropped"),
        }
    }

    fn route_data(&self, payload: &[u8]) {
        if SwUpdMessage::matches(payload) {
            match SwUpdMessage::decode(payload) {
                Ok(message) => {
                    if !self.transfers.deliver(message) {
                        tracing::debug!("transfer reply with no transfer running");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "malformed transfer reply"),
            }
            return;
        }

        match CommandRecord::from_payload(payload) {
            Ok(record) if record.module_id == module::TELEMETRY => {
                let seq = self.stores.telemetry().push(record);
                tracing::debug!(seq, "telemetry update");
            }
            Ok(record) => {
                let module_id = record.module_id;
                let command_id = record.command_id;
                tracing::debug!(module_id, command_id, "command output");
                self.stores.record_command_output(record);
            }
            Err(e) => tracing::warn!(error = %e, "malformed command output"),
        }
    }
}

/// Longest pause after a read error that leaves the connection up.
const MAX_READ_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug)]
enum Exit {
    Shutdown,
    Dropped,
}

/// Reads the live connection until shutdown, reattaching after reconnects.
pub struct ReceiveLoop {
    link: Link,
    router: FrameRouter,
    recv_timeout: Duration,
    idle: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl ReceiveLoop {
    pub fn new(
        link: Link,
        router: FrameRouter,
        recv_timeout: Duration,
        idle: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            link,
            router,
            recv_timeout,
            idle,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        tracing::info!(recv_timeout_secs = self.recv_timeout.as_secs(), "receive loop started");
        loop {
            let Some(reader) = self.link.take_reader().await else {
                tokio::select! {
                    _ = self.shutdown.recv() => {
                        tracing::info!("receive loop shutting down");
                        return Ok(());
                    }
                    _ = self.link.reader_stored() => {}
                    _ = tokio::time::sleep(self.idle) => {}
                }
                continue;
            };

            if let Exit::Shutdown = self.serve(reader).await {
                tracing::info!("receive loop shutting down");
                return Ok(());
            }
        }
    }

    async fn serve(&mut self, reader: LinkReader) -> Exit {
        let LinkReader { generation, half } = reader;
        self.serve_stream(generation, half).await
    }

    async fn serve_stream<R: AsyncRead + Unpin>(&mut self, generation: u64, mut half: R) -> Exit {
        let mut assembler = FrameAssembler::new();
        let mut buf = vec![0u8; FRAME_SIZE * 4];
        tracing::debug!(generation, "receive loop attached");

        loop {
            let read = tokio::select! {
                _ = self.shutdown.recv() => return Exit::Shutdown,
                _ = self.link.wait_dropped(generation) => {
                    tracing::debug!(generation, "connection closed locally");
                    return Exit::Dropped;
                }
                r = tokio::time::timeout(self.recv_timeout, half.read(&mut buf)) => r,
            };

            let reason = match read {
                Ok(Ok(0)) => DisconnectReason::PeerClosed,
                Ok(Ok(n)) => {
                    assembler.push(&buf[..n]);
                    while let Some(result) = assembler.next_frame() {
                        match result {
                            Ok(frame) => self.router.route(&frame),
                            Err(e) => tracing::warn!(generation, error = %e, "frame dropped"),
                        }
                    }
                    continue;
                }
                Ok(Err(e)) if is_reset(&e) => DisconnectReason::Reset,
                Ok(Err(e)) => {
                    tracing::warn!(generation, error = %e, "read failed");
                    tokio::select! {
                        _ = self.shutdown.recv() => return Exit::Shutdown,
                        _ = tokio::time::sleep(self.idle.min(MAX_READ_RETRY_DELAY)) => {}
                    }
                    continue;
                }
                Err(_) => DisconnectReason::Timeout,
            };

            self.link.drop_connection(generation, reason).await;
            if assembler.skipped() > 0 {
                tracing::debug!(generation, skipped = assembler.skipped(), "bytes skipped");
            }
            return Exit::Dropped;
        }
    }
}

fn is_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}
