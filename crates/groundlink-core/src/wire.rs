//! Groundlink wire format — the frame exchanged with the ground server.
//!
//! This type IS the protocol. Every field, every size and both magic values
//! are shared with the server's own frame struct. Changing anything here is
//! a breaking change for every deployed station.
//!
//! The frame is #[repr(C, packed)] with native-endian fields and uses
//! zerocopy derives for allocation-free serialization. Decoding goes through
//! `Frame::decode`, which checks the length before any field is read. There
//! is no unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::crc::crc16;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Magic value opening every frame.
pub const FRAME_GUID: u16 = 0x7A6B;

/// Magic value closing every frame.
pub const FRAME_TERMINATOR: u16 = 0xAAAA;

/// Fixed capacity of the payload buffer. The checksum always covers all of it.
pub const MAX_PAYLOAD: usize = 128;

/// Size of one frame on the wire.
pub const FRAME_SIZE: usize = 153;

// ── Frame ─────────────────────────────────────────────────────────────────────

/// The unit of transport between the client and the ground server.
///
/// A frame is built, stored into, checked, sent once and dropped. Received
/// frames come out of `Frame::decode` and must pass `check_integrity` before
/// anything inside them is trusted.
///
/// Wire size: 153 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct Frame {
    /// Always FRAME_GUID.
    pub guid: u16,

    /// Logical destination. See `Endpoint`.
    pub endpoint: i32,

    /// Transmit/receive/error. See `FrameMode`.
    pub mode: i32,

    /// Number of meaningful bytes at the start of `payload`.
    pub payload_size: i32,

    /// Payload type. See `FrameType`.
    pub frame_type: i32,

    /// Checksum of the full payload buffer.
    pub crc1: u16,

    /// Redundant copy of crc1. Must be equal.
    pub crc2: u16,

    /// Payload buffer. Bytes past `payload_size` are zero on send.
    pub payload: [u8; MAX_PAYLOAD],

    /// Online bitmask of every network participant. Filled in by the server;
    /// the client always sends zero.
    pub netstat: u8,

    /// Always FRAME_TERMINATOR.
    pub termination: u16,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(Frame, [u8; FRAME_SIZE]);

impl Frame {
    /// Start a new outgoing frame of `frame_type` able to carry `capacity` bytes.
    ///
    /// The payload is zeroed and the mode is left at the error sentinel until
    /// `store` runs.
    pub fn build(frame_type: FrameType, capacity: usize) -> Result<Self, FrameError> {
        if capacity > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: capacity,
                capacity: MAX_PAYLOAD,
            });
        }

        let mut frame = Frame::new_zeroed();
        frame.guid = FRAME_GUID;
        frame.termination = FRAME_TERMINATOR;
        frame.endpoint = Endpoint::Server.into();
        frame.mode = FrameMode::Error.into();
        frame.payload_size = capacity as i32;
        frame.frame_type = frame_type.into();
        Ok(frame)
    }

    /// Copy `data` into the payload, address the frame and seal it.
    ///
    /// The checksum is taken over the whole payload buffer, not just `data`,
    /// so stale trailing bytes are caught as well. A frame is sealed once:
    /// `payload_size` holds the capacity from `build` only until this runs,
    /// so a second call fails with `AlreadyStored`.
    pub fn store(&mut self, endpoint: Endpoint, data: &[u8]) -> Result<(), FrameError> {
        let mode = self.mode;
        if mode != i32::from(FrameMode::Error) {
            return Err(FrameError::AlreadyStored);
        }
        let capacity = self.payload_size.max(0) as usize;
        if data.len() > capacity {
            return Err(FrameError::PayloadTooLarge {
                size: data.len(),
                capacity,
            });
        }

        let mut payload = [0u8; MAX_PAYLOAD];
        payload[..data.len()].copy_from_slice(data);
        let crc = crc16(&payload);

        self.payload = payload;
        self.payload_size = data.len() as i32;
        self.crc1 = crc;
        self.crc2 = crc;
        self.endpoint = endpoint.into();
        // Transmit is never set on outgoing frames.
        self.mode = FrameMode::Receive.into();
        Ok(())
    }

    /// Verify the frame's self-consistency. Checks run in a fixed order and
    /// the first failure wins.
    pub fn check_integrity(&self) -> Result<(), IntegrityError> {
        let guid = self.guid;
        let endpoint = self.endpoint;
        let mode = self.mode;
        let payload_size = self.payload_size;
        let frame_type = self.frame_type;
        let crc1 = self.crc1;
        let crc2 = self.crc2;
        let termination = self.termination;

        if guid != FRAME_GUID {
            return Err(IntegrityError::Guid);
        }
        if endpoint < 0 {
            return Err(IntegrityError::Endpoint);
        }
        if mode < 0 {
            return Err(IntegrityError::Mode);
        }
        if payload_size < 0 || payload_size as usize > MAX_PAYLOAD {
            return Err(IntegrityError::PayloadSize);
        }
        if frame_type < 0 {
            return Err(IntegrityError::Type);
        }
        if crc1 != crc2 {
            return Err(IntegrityError::ChecksumFields);
        }
        if crc16(&self.payload) != crc1 {
            return Err(IntegrityError::Checksum);
        }
        if termination != FRAME_TERMINATOR {
            return Err(IntegrityError::Terminator);
        }
        Ok(())
    }

    /// Decode exactly one frame from `bytes`.
    ///
    /// Only the length is checked here; call `check_integrity` before
    /// trusting any field.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_SIZE {
            return Err(FrameError::Truncated {
                expected: FRAME_SIZE,
                actual: bytes.len(),
            });
        }
        Frame::read_from(&bytes[..FRAME_SIZE]).ok_or(FrameError::Truncated {
            expected: FRAME_SIZE,
            actual: bytes.len(),
        })
    }

    /// The meaningful part of the payload. Empty if `payload_size` is out of range.
    pub fn payload(&self) -> &[u8] {
        let size = self.payload_size;
        if size < 0 || size as usize > MAX_PAYLOAD {
            return &[];
        }
        &self.payload[..size as usize]
    }

    pub fn kind(&self) -> Result<FrameType, FrameError> {
        FrameType::try_from(self.frame_type)
    }

    pub fn netstat(&self) -> NetStat {
        NetStat(self.netstat)
    }
}

// ── Frame type ────────────────────────────────────────────────────────────────

/// What the payload of a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum FrameType {
    /// No payload. Carries the netstat update only.
    Null = 0,
    /// Positive acknowledgement, payload is an `AckRecord`.
    Ack = 1,
    /// Negative acknowledgement, payload is an `AckRecord`.
    Nack = 2,
    /// UHF radio configuration block.
    ConfigUhf = 3,
    /// X-band radio configuration block.
    ConfigXBand = 4,
    /// A `CommandRecord` or a software-update packet.
    Data = 5,
    /// Server-side error report. Dropped by the client.
    Error = 6,
}

impl TryFrom<i32> for FrameType {
    type Error = FrameError;

    fn try_from(value: i32) -> Result<Self, FrameError> {
        match value {
            0 => Ok(FrameType::Null),
            1 => Ok(FrameType::Ack),
            2 => Ok(FrameType::Nack),
            3 => Ok(FrameType::ConfigUhf),
            4 => Ok(FrameType::ConfigXBand),
            5 => Ok(FrameType::Data),
            6 => Ok(FrameType::Error),
            v if v < 0 => Err(FrameError::InvalidType(v)),
            v => Err(FrameError::UnknownType(v)),
        }
    }
}

impl From<FrameType> for i32 {
    fn from(t: FrameType) -> i32 {
        t as i32
    }
}

// ── Mode ──────────────────────────────────────────────────────────────────────

/// Direction marker carried in every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FrameMode {
    Transmit = 0,
    Receive = 1,
    /// Set by `Frame::build`, replaced by `store`.
    Error = 2,
}

impl From<FrameMode> for i32 {
    fn from(m: FrameMode) -> i32 {
        m as i32
    }
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// Network participant a frame is ultimately destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum Endpoint {
    /// The ground server itself.
    Server = 0,
    /// This client.
    Client = 1,
    /// UHF radio.
    Uhf = 2,
    /// X-band radio.
    #[serde(rename = "xband")]
    XBand = 3,
    /// Ground telescope.
    Telescope = 4,
}

impl Endpoint {
    pub const ALL: [Endpoint; 5] = [
        Endpoint::Server,
        Endpoint::Client,
        Endpoint::Uhf,
        Endpoint::XBand,
        Endpoint::Telescope,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Endpoint::Server => "server",
            Endpoint::Client => "client",
            Endpoint::Uhf => "uhf",
            Endpoint::XBand => "xband",
            Endpoint::Telescope => "telescope",
        }
    }
}

impl TryFrom<i32> for Endpoint {
    type Error = FrameError;

    fn try_from(value: i32) -> Result<Self, FrameError> {
        match value {
            0 => Ok(Endpoint::Server),
            1 => Ok(Endpoint::Client),
            2 => Ok(Endpoint::Uhf),
            3 => Ok(Endpoint::XBand),
            4 => Ok(Endpoint::Telescope),
            other => Err(FrameError::UnknownEndpoint(other)),
        }
    }
}

impl From<Endpoint> for i32 {
    fn from(e: Endpoint) -> i32 {
        e as i32
    }
}

// ── Netstat ───────────────────────────────────────────────────────────────────

/// Online bitmask reported by the server. Bit n is `Endpoint` n.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetStat(pub u8);

impl NetStat {
    pub fn is_online(self, endpoint: Endpoint) -> bool {
        self.0 & (1 << endpoint as u8) != 0
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A frame failed its self-check. Each cause carries a distinct code so the
/// log line names exactly what was wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("guid mismatch")]
    Guid,
    #[error("negative endpoint")]
    Endpoint,
    #[error("negative mode")]
    Mode,
    #[error("payload size out of bounds")]
    PayloadSize,
    #[error("negative frame type")]
    Type,
    #[error("checksum fields disagree")]
    ChecksumFields,
    #[error("checksum does not match payload")]
    Checksum,
    #[error("terminator mismatch")]
    Terminator,
}

impl IntegrityError {
    pub fn code(self) -> i32 {
        match self {
            IntegrityError::Guid => -1,
            IntegrityError::Endpoint => -2,
            IntegrityError::Mode => -3,
            IntegrityError::PayloadSize => -4,
            IntegrityError::Type => -5,
            IntegrityError::ChecksumFields => -6,
            IntegrityError::Checksum => -7,
            IntegrityError::Terminator => -8,
        }
    }
}

/// Errors that can arise when building or interpreting wire data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame type {0}")]
    InvalidType(i32),

    #[error("unknown frame type {0}")]
    UnknownType(i32),

    #[error("unknown endpoint {0}")]
    UnknownEndpoint(i32),

    #[error("payload of {size} bytes exceeds capacity {capacity}")]
    PayloadTooLarge { size: usize, capacity: usize },

    #[error("truncated input: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("integrity check failed ({}): {0}", .0.code())]
    Integrity(IntegrityError),

    #[error("frame payload already stored")]
    AlreadyStored,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
