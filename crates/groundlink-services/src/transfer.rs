//! Software-update transfer.
//!
//! A transfer runs in three phases:
//!
//! 1. Primer: send Start (or Resume) and wait for the peer to say how many
//!    bytes it already holds.
//! 2. Streaming: send each remaining data packet and wait for its reply.
//!    A NACK or a timeout resends the same packet; after
//!    `max_send_attempts` sends of one packet the transfer is aborted.
//! 3. Confirmation: send the file hash. The peer either confirms or names a
//!    packet to resend, after which confirmation is attempted again.
//!
//! A "repeat" signal from the peer resends the last transmission at any
//! point without counting as an attempt. Only one transfer runs at a time;
//! replies reach it through the `TransferRoute` the receive loop feeds.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use zerocopy::AsBytes;

use groundlink_core::config::TransferConfig;
use groundlink_core::swupd::{
    file_hash, total_packets, Confirm, DataPacket, StartResume, SwUpdMessage, SW_UPD_DATA_SIZE,
    SW_UPD_HASH_SIZE,
};
use groundlink_core::wire::{Endpoint, FrameError, FrameType};

use crate::link::{Link, LinkError};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("a transfer is already running")]
    Busy,
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("file of {0} bytes is too large to transfer")]
    TooLarge(u64),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("peer expects {reported} packets, file has {expected}")]
    PacketCountMismatch { expected: i32, reported: i32 },
    #[error("no reply to primer after {0} attempts")]
    NoPrimerReply(u32),
    #[error("packet {packet} not acknowledged after {attempts} attempts")]
    PacketRejected { packet: i32, attempts: u32 },
    #[error("file not confirmed after {0} attempts")]
    NotConfirmed(u32),
    #[error("reply route closed")]
    RouteClosed,
}

// ── Progress ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    #[default]
    Idle,
    Primer,
    Streaming,
    AwaitingConfirmation,
    Finished,
    Aborted,
}

/// Published after every state change of the running transfer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferProgress {
    pub phase: TransferPhase,
    pub filename: String,
    /// Next packet to send during streaming.
    pub packet: i32,
    pub total_packets: i32,
    /// Sends of the current packet.
    pub attempts: u32,
    pub retransmissions: u32,
    pub error: Option<String>,
    /// Set once the transfer is confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<TransferReport>,
}

/// Summary of a completed transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub filename: String,
    pub total_bytes: i32,
    pub total_packets: i32,
    /// Packet the peer asked to resume from.
    pub resumed_at: i32,
    pub packets_sent: u32,
    pub retransmissions: u32,
    pub hash: String,
}

// ── Route ─────────────────────────────────────────────────────────────────────

struct RouteInner {
    slot: Mutex<Option<mpsc::UnboundedSender<SwUpdMessage>>>,
    progress: watch::Sender<TransferProgress>,
}

/// Hands sub-protocol replies from the receive loop to the running transfer.
#[derive(Clone)]
pub struct TransferRoute {
    inner: Arc<RouteInner>,
}

impl TransferRoute {
    pub fn new() -> Self {
        let (progress, _) = watch::channel(TransferProgress::default());
        Self {
            inner: Arc::new(RouteInner {
                slot: Mutex::new(None),
                progress,
            }),
        }
    }

    /// Claim the route for a new transfer.
    pub fn open(&self) -> Result<TransferInbox, TransferError> {
        let mut slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(TransferError::Busy);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *slot = Some(tx);
        Ok(TransferInbox {
            rx,
            route: self.clone(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Pass a reply to the running transfer. False if none is running.
    pub fn deliver(&self, message: SwUpdMessage) -> bool {
        let slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    pub fn progress(&self) -> TransferProgress {
        self.inner.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferProgress> {
        self.inner.progress.subscribe()
    }

    fn publish(&self, progress: TransferProgress) {
        self.inner.progress.send_replace(progress);
    }
}

impl Default for TransferRoute {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a claimed route. Releases the route when dropped.
pub struct TransferInbox {
    rx: mpsc::UnboundedReceiver<SwUpdMessage>,
    route: TransferRoute,
}

impl Drop for TransferInbox {
    fn drop(&mut self) {
        self.route
            .inner
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

// ── Sink ──────────────────────────────────────────────────────────────────────

/// Where transfer packets go.
pub trait PacketSink: Send + Sync {
    fn send_packet(&self, packet: &[u8]) -> impl Future<Output = Result<(), LinkError>> + Send;
}

/// Sends packets in Data frames over the server link.
#[derive(Clone)]
pub struct LinkSink {
    link: Link,
    endpoint: Endpoint,
}

impl LinkSink {
    pub fn new(link: Link, endpoint: Endpoint) -> Self {
        Self { link, endpoint }
    }
}

impl PacketSink for LinkSink {
    async fn send_packet(&self, packet: &[u8]) -> Result<(), LinkError> {
        self.link
            .send_payload(FrameType::Data, self.endpoint, packet)
            .await
            .map(|_| ())
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// One file and how far along its transfer is.
pub struct TransferSession {
    filename: String,
    file_id: u8,
    data: Bytes,
    hash: [u8; SW_UPD_HASH_SIZE],
    total_bytes: i32,
    total_packets: i32,
    bytes_sent: i32,
    phase: TransferPhase,
    packet_index: i32,
    resumed_at: i32,
    attempts: u32,
    packets_sent: u32,
    retransmissions: u32,
}

impl TransferSession {
    pub fn new(filename: impl Into<String>, file_id: u8, data: Bytes) -> Result<Self, TransferError> {
        let total_bytes =
            i32::try_from(data.len()).map_err(|_| TransferError::TooLarge(data.len() as u64))?;
        Ok(Self {
            filename: filename.into(),
            file_id,
            hash: file_hash(&data),
            data,
            total_bytes,
            total_packets: total_packets(total_bytes),
            bytes_sent: 0,
            phase: TransferPhase::Idle,
            packet_index: 0,
            resumed_at: 0,
            attempts: 0,
            packets_sent: 0,
            retransmissions: 0,
        })
    }

    /// Read `path` into a new session named after its file name.
    pub async fn open(path: &Path, file_id: u8) -> Result<Self, TransferError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| TransferError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("update.bin")
            .to_string();
        Self::new(filename, file_id, Bytes::from(data))
    }

    /// Announce a resume from `bytes_sent` instead of a fresh start.
    pub fn resuming_from(mut self, bytes_sent: i32) -> Self {
        self.bytes_sent = bytes_sent.clamp(0, self.total_bytes);
        self
    }

    pub fn total_packets(&self) -> i32 {
        self.total_packets
    }

    fn data_packet(&self, index: i32) -> Result<Bytes, TransferError> {
        let start = (index.max(0) as usize * SW_UPD_DATA_SIZE).min(self.data.len());
        let end = (start + SW_UPD_DATA_SIZE).min(self.data.len());
        let packet = DataPacket::new(index, self.total_bytes, &self.data[start..end])?;
        Ok(Bytes::copy_from_slice(packet.as_bytes()))
    }

    fn progress(&self, error: Option<&TransferError>) -> TransferProgress {
        TransferProgress {
            phase: self.phase,
            filename: self.filename.clone(),
            packet: self.packet_index,
            total_packets: self.total_packets,
            attempts: self.attempts,
            retransmissions: self.retransmissions,
            error: error.map(|e| e.to_string()),
            report: None,
        }
    }

    fn report(&self) -> TransferReport {
        TransferReport {
            filename: self.filename.clone(),
            total_bytes: self.total_bytes,
            total_packets: self.total_packets,
            resumed_at: self.resumed_at,
            packets_sent: self.packets_sent,
            retransmissions: self.retransmissions,
            hash: hex::encode(self.hash),
        }
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    pub reply_timeout: Duration,
    pub max_send_attempts: u32,
}

impl From<&TransferConfig> for TransferOptions {
    fn from(config: &TransferConfig) -> Self {
        Self {
            reply_timeout: config.reply_timeout(),
            max_send_attempts: config.max_send_attempts.max(1),
        }
    }
}

enum Reply {
    Message(SwUpdMessage),
    TimedOut,
}

/// Drives one session to completion or abort.
pub struct TransferEngine<S> {
    sink: S,
    inbox: TransferInbox,
    options: TransferOptions,
    last_sent: Option<Bytes>,
}

impl<S: PacketSink> TransferEngine<S> {
    pub fn new(sink: S, inbox: TransferInbox, options: TransferOptions) -> Self {
        Self {
            sink,
            inbox,
            options,
            last_sent: None,
        }
    }

    pub async fn run(mut self, mut session: TransferSession) -> Result<TransferReport, TransferError> {
        tracing::info!(
            filename = %session.filename,
            total_bytes = session.total_bytes,
            total_packets = session.total_packets,
            "transfer starting"
        );

        let result = self.drive(&mut session).await;
        match &result {
            Ok(()) => {
                session.phase = TransferPhase::Finished;
                tracing::info!(
                    filename = %session.filename,
                    retransmissions = session.retransmissions,
                    "transfer confirmed"
                );
            }
            Err(e) => {
                session.phase = TransferPhase::Aborted;
                tracing::warn!(filename = %session.filename, error = %e, "transfer aborted");
            }
        }
        let mut progress = session.progress(result.as_ref().err());
        progress.report = result.is_ok().then(|| session.report());
        self.inbox.route.publish(progress);
        result.map(|()| session.report())
    }

    async fn drive(&mut self, session: &mut TransferSession) -> Result<(), TransferError> {
        self.primer(session).await?;

        session.phase = TransferPhase::Streaming;
        while session.packet_index < session.total_packets {
            self.send_until_acked(session, session.packet_index).await?;
            session.packet_index += 1;
            self.publish(session, None);
        }

        self.confirm(session).await
    }

    async fn primer(&mut self, session: &mut TransferSession) -> Result<(), TransferError> {
        session.phase = TransferPhase::Primer;
        let primer = StartResume::new(
            session.file_id,
            &session.filename,
            session.bytes_sent,
            session.total_bytes,
        );
        let packet = Bytes::copy_from_slice(primer.as_bytes());

        for attempt in 1..=self.options.max_send_attempts {
            session.attempts = attempt;
            self.publish(session, None);
            self.transmit(session, packet.clone()).await?;

            loop {
                match self.await_reply(session).await? {
                    Reply::Message(SwUpdMessage::StartResumeReply(reply)) => {
                        let reported = reply.total_packets;
                        if reported != session.total_packets {
                            return Err(TransferError::PacketCountMismatch {
                                expected: session.total_packets,
                                reported,
                            });
                        }
                        let received = reply.received_bytes.clamp(0, session.total_bytes);
                        session.packet_index = received / SW_UPD_DATA_SIZE as i32;
                        session.resumed_at = session.packet_index;
                        tracing::debug!(received, packet = session.packet_index, "primer accepted");
                        return Ok(());
                    }
                    Reply::Message(SwUpdMessage::ResendExpected) | Reply::TimedOut => break,
                    Reply::Message(other) => {
                        tracing::debug!(?other, "ignoring reply while priming");
                    }
                }
            }
        }
        Err(TransferError::NoPrimerReply(self.options.max_send_attempts))
    }

    /// Send packet `index` until the peer acknowledges it.
    async fn send_until_acked(
        &mut self,
        session: &mut TransferSession,
        index: i32,
    ) -> Result<(), TransferError> {
        let packet = session.data_packet(index)?;
        let max = self.options.max_send_attempts;

        for attempt in 1..=max {
            session.attempts = attempt;
            if attempt > 1 {
                session.retransmissions += 1;
            }
            self.transmit(session, packet.clone()).await?;

            loop {
                match self.await_reply(session).await? {
                    Reply::Message(SwUpdMessage::DataReply(reply)) => {
                        let number = reply.packet_number;
                        if number != index {
                            tracing::debug!(expected = index, got = number, "stale data reply");
                            continue;
                        }
                        if reply.received != 0 {
                            return Ok(());
                        }
                        tracing::debug!(packet = index, attempt, "packet rejected");
                        break;
                    }
                    Reply::Message(SwUpdMessage::ResendExpected) => {
                        tracing::debug!(packet = index, attempt, "peer expects a resend");
                        break;
                    }
                    Reply::TimedOut => {
                        tracing::debug!(packet = index, attempt, "no reply to packet");
                        break;
                    }
                    Reply::Message(other) => {
                        tracing::debug!(?other, "ignoring reply while streaming");
                    }
                }
            }
        }
        Err(TransferError::PacketRejected {
            packet: index,
            attempts: max,
        })
    }

    async fn confirm(&mut self, session: &mut TransferSession) -> Result<(), TransferError> {
        session.phase = TransferPhase::AwaitingConfirmation;
        let confirm = Confirm::new(
            session.file_id,
            session.total_bytes,
            session.total_packets,
            session.hash,
        );
        let packet = Bytes::copy_from_slice(confirm.as_bytes());

        for attempt in 1..=self.options.max_send_attempts {
            session.attempts = attempt;
            self.publish(session, None);
            self.transmit(session, packet.clone()).await?;

            loop {
                match self.await_reply(session).await? {
                    Reply::Message(SwUpdMessage::ConfirmReply(reply)) => {
                        if reply.confirmed != 0 && reply.hash == session.hash {
                            return Ok(());
                        }
                        let number = reply.packet_number;
                        if (0..session.total_packets).contains(&number) {
                            tracing::warn!(packet = number, "peer asked for a packet again");
                            self.send_until_acked(session, number).await?;
                        } else {
                            tracing::warn!(packet = number, "confirmation refused");
                        }
                        break;
                    }
                    Reply::Message(SwUpdMessage::ResendExpected) | Reply::TimedOut => break,
                    Reply::Message(other) => {
                        tracing::debug!(?other, "ignoring reply while confirming");
                    }
                }
            }
        }
        Err(TransferError::NotConfirmed(self.options.max_send_attempts))
    }

    async fn transmit(
        &mut self,
        session: &mut TransferSession,
        packet: Bytes,
    ) -> Result<(), TransferError> {
        self.sink.send_packet(&packet).await?;
        session.packets_sent += 1;
        self.last_sent = Some(packet);
        Ok(())
    }

    /// Wait for the next relevant reply. Repeat signals are served here.
    async fn await_reply(&mut self, session: &mut TransferSession) -> Result<Reply, TransferError> {
        loop {
            match tokio::time::timeout(self.options.reply_timeout, self.inbox.rx.recv()).await {
                Err(_) => return Ok(Reply::TimedOut),
                Ok(None) => return Err(TransferError::RouteClosed),
                Ok(Some(SwUpdMessage::Repeat)) => {
                    if let Some(last) = self.last_sent.clone() {
                        tracing::debug!("peer asked for a repeat");
                        self.sink.send_packet(&last).await?;
                        session.packets_sent += 1;
                    }
                }
                Ok(Some(message)) => return Ok(Reply::Message(message)),
            }
        }
    }

    fn publish(&self, session: &TransferSession, error: Option<&TransferError>) {
        self.inbox.route.publish(session.progress(error));
    }
}

/// Claim the route and run `session` over `link` in the background.
pub fn start_transfer(
    link: &Link,
    route: &TransferRoute,
    config: &TransferConfig,
    session: TransferSession,
) -> Result<JoinHandle<Result<TransferReport, TransferError>>, TransferError> {
    let inbox = route.open()?;
    let engine = TransferEngine::new(
        LinkSink::new(link.clone(), config.endpoint),
        inbox,
        TransferOptions::from(config),
    );
    Ok(tokio::spawn(engine.run(session)))
}
