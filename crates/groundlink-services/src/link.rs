//! Connection manager for the ground server link.
//!
//! One TCP stream at a time. The write half stays here behind a mutex so
//! every task sends through `send_frame`; the read half is handed to the
//! receive loop once per connection. Each successful connect bumps the
//! generation so that late failures from an old stream cannot tear down a
//! newer one.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, Notify};
use zerocopy::AsBytes;

use groundlink_core::record::{CommandRecord, COMMAND_RECORD_SIZE};
use groundlink_core::wire::{Endpoint, Frame, FrameError, FrameType, IntegrityError, NetStat};

/// Connect timeouts shorter than this are raised to it.
pub const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl LinkPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkPhase::Disconnected => "disconnected",
            LinkPhase::Connecting => "connecting",
            LinkPhase::Connected => "connected",
        }
    }
}

/// Why the link went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Operator asked for it.
    User,
    /// Peer closed the stream (zero-length read).
    PeerClosed,
    /// Nothing arrived within the receive timeout.
    Timeout,
    /// Peer reset the connection.
    Reset,
    /// A frame could not be written.
    WriteFailed,
    /// Replaced by a new connect.
    Reconnect,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisconnectReason::User => "USER",
            DisconnectReason::PeerClosed => "PEER_CLOSED",
            DisconnectReason::Timeout => "TIMEOUT",
            DisconnectReason::Reset => "RESET",
            DisconnectReason::WriteFailed => "WRITE_FAILED",
            DisconnectReason::Reconnect => "RECONNECT",
        })
    }
}

/// Snapshot of the link as seen by status queries.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub phase: LinkPhase,
    /// Bumped on every successful connect.
    pub generation: u64,
    pub peer: Option<SocketAddr>,
    pub connected_at: Option<SystemTime>,
    /// Network status byte from the most recent frame.
    pub netstat: NetStat,
    pub last_contact: Option<SystemTime>,
    pub last_disconnect: Option<DisconnectReason>,
    pub frames_sent: u64,
    pub frames_received: u64,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        self.phase == LinkPhase::Connected
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid server address {0:?}")]
    InvalidAddress(String),
    #[error("socket creation failed: {0}")]
    SocketCreate(io::Error),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("connect failed: {0}")]
    Failed(io::Error),
    #[error("socket setup failed: {0}")]
    Io(io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link not ready")]
    NotReady,
    #[error("refusing to send frame: {0}")]
    Integrity(#[from] IntegrityError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

// ── Link ──────────────────────────────────────────────────────────────────────

/// The read half of one connection, tagged with its generation.
pub struct LinkReader {
    pub generation: u64,
    pub half: OwnedReadHalf,
}

struct LinkInner {
    state: watch::Sender<ConnectionState>,
    writer: Mutex<Option<(u64, OwnedWriteHalf)>>,
    reader: Mutex<Option<LinkReader>>,
    reader_stored: Notify,
    connect_lock: Mutex<()>,
}

/// Shared handle to the server link.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

impl Link {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            inner: Arc::new(LinkInner {
                state,
                writer: Mutex::new(None),
                reader: Mutex::new(None),
                reader_stored: Notify::new(),
                connect_lock: Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state.borrow().is_ready()
    }

    pub fn generation(&self) -> u64 {
        self.inner.state.borrow().generation
    }

    /// Watch every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Open a stream to `address:port`, replacing any current connection.
    ///
    /// The handshake is bounded by `timeout` (at least one second). On any
    /// failure the link is left disconnected.
    pub async fn connect(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<SocketAddr, ConnectError> {
        let _guard = self.inner.connect_lock.lock().await;

        let ip: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| ConnectError::InvalidAddress(address.to_string()))?;
        let addr = SocketAddr::new(ip, port);
        let timeout = timeout.max(MIN_CONNECT_TIMEOUT);

        if self.is_ready() {
            self.disconnect(DisconnectReason::Reconnect).await;
        }
        self.inner
            .state
            .send_modify(|s| s.phase = LinkPhase::Connecting);
        tracing::info!(%addr, timeout_secs = timeout.as_secs(), "connecting");

        let stream = match open_stream(addr, timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                self.inner
                    .state
                    .send_modify(|s| s.phase = LinkPhase::Disconnected);
                tracing::warn!(%addr, error = %e, "connect failed");
                return Err(e);
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "set_nodelay failed");
        }

        let generation = self.generation() + 1;
        let (read_half, write_half) = stream.into_split();
        *self.inner.writer.lock().await = Some((generation, write_half));
        *self.inner.reader.lock().await = Some(LinkReader {
            generation,
            half: read_half,
        });

        self.inner.state.send_modify(|s| {
            s.phase = LinkPhase::Connected;
            s.generation = generation;
            s.peer = Some(addr);
            s.connected_at = Some(SystemTime::now());
            s.netstat = NetStat::default();
            s.last_contact = None;
        });
        self.inner.reader_stored.notify_one();
        tracing::info!(%addr, generation, "link ready");
        Ok(addr)
    }

    /// Close the current connection. Returns false if it was already down.
    pub async fn disconnect(&self, reason: DisconnectReason) -> bool {
        let generation = self.generation();
        self.drop_connection(generation, reason).await
    }

    /// Close connection `generation` if it is still the live one.
    pub async fn drop_connection(&self, generation: u64, reason: DisconnectReason) -> bool {
        let dropped = self.inner.state.send_if_modified(|s| {
            if s.generation != generation || s.phase != LinkPhase::Connected {
                return false;
            }
            s.phase = LinkPhase::Disconnected;
            s.last_disconnect = Some(reason);
            true
        });
        if !dropped {
            return false;
        }

        {
            let mut writer = self.inner.writer.lock().await;
            if matches!(*writer, Some((g, _)) if g == generation) {
                if let Some((_, mut half)) = writer.take() {
                    let _ = half.shutdown().await;
                }
            }
        }
        {
            let mut reader = self.inner.reader.lock().await;
            if matches!(*reader, Some(LinkReader { generation: g, .. }) if g == generation) {
                reader.take();
            }
        }

        match reason {
            DisconnectReason::User | DisconnectReason::Reconnect => {
                tracing::info!(generation, %reason, "link closed")
            }
            _ => tracing::warn!(generation, %reason, "link dropped"),
        }
        true
    }

    /// Hand the read half of the live connection to the receive loop.
    pub async fn take_reader(&self) -> Option<LinkReader> {
        let mut slot = self.inner.reader.lock().await;
        let live = {
            let state = self.inner.state.borrow();
            state.is_ready() && slot.as_ref().is_some_and(|r| r.generation == state.generation)
        };
        if live {
            slot.take()
        } else {
            None
        }
    }

    /// Resolve once a new connection's read half is waiting.
    pub async fn reader_stored(&self) {
        self.inner.reader_stored.notified().await;
    }

    /// Resolve once connection `generation` is no longer the live one.
    pub async fn wait_dropped(&self, generation: u64) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx
            .wait_for(|s| s.generation != generation || !s.is_ready())
            .await;
    }

    /// Record that a valid frame arrived.
    pub fn record_contact(&self, netstat: NetStat) {
        self.inner.state.send_modify(|s| {
            s.netstat = netstat;
            s.last_contact = Some(SystemTime::now());
            s.frames_received += 1;
        });
    }

    /// Write one frame.
    ///
    /// Fails with `NotReady` when disconnected and refuses frames whose
    /// integrity check fails; nothing is written in either case. A failed
    /// write drops the connection.
    pub async fn send_frame(&self, frame: &Frame) -> Result<usize, LinkError> {
        if !self.is_ready() {
            return Err(LinkError::NotReady);
        }
        frame.check_integrity()?;

        let mut writer = self.inner.writer.lock().await;
        let (generation, half) = writer.as_mut().ok_or(LinkError::NotReady)?;
        let generation = *generation;
        let bytes = frame.as_bytes();
        if let Err(e) = half.write_all(bytes).await {
            drop(writer);
            self.drop_connection(generation, DisconnectReason::WriteFailed)
                .await;
            return Err(LinkError::Io(e));
        }
        drop(writer);

        self.inner.state.send_modify(|s| s.frames_sent += 1);
        tracing::trace!(generation, len = bytes.len(), "frame sent");
        Ok(bytes.len())
    }

    /// Wrap `data` in a frame of `frame_type` addressed to `endpoint` and send it.
    pub async fn send_payload(
        &self,
        frame_type: FrameType,
        endpoint: Endpoint,
        data: &[u8],
    ) -> Result<usize, LinkError> {
        let mut frame = Frame::build(frame_type, data.len())?;
        frame.store(endpoint, data)?;
        self.send_frame(&frame).await
    }

    /// Send a command record to `endpoint` in a Data frame.
    pub async fn send_command(
        &self,
        endpoint: Endpoint,
        record: &CommandRecord,
    ) -> Result<usize, LinkError> {
        let mut frame = Frame::build(FrameType::Data, COMMAND_RECORD_SIZE)?;
        frame.store(endpoint, record.as_bytes())?;
        self.send_frame(&frame).await
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocking connect with a deadline, then hand the socket to tokio.
async fn open_stream(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, ConnectError> {
    let std_stream = tokio::task::spawn_blocking(move || {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(ConnectError::SocketCreate)?;
        socket
            .connect_timeout(&addr.into(), timeout)
            .map_err(|e| connect_error(e, timeout))?;
        socket.set_nonblocking(true).map_err(ConnectError::Io)?;
        Ok::<std::net::TcpStream, ConnectError>(socket.into())
    })
    .await
    .map_err(|e| ConnectError::Io(io::Error::other(e)))??;

    TcpStream::from_std(std_stream).map_err(ConnectError::Io)
}

/// Classify a failed handshake.
fn connect_error(e: io::Error, timeout: Duration) -> ConnectError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectError::Timeout(timeout),
        _ => ConnectError::Failed(e),
    }
}
