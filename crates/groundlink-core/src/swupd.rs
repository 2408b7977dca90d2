//! Software-update sub-protocol records.
//!
//! Every record is a fixed 56-byte packet whose first byte is a command code
//! from `SwUpdCommand`. Packets ride as the payload of Data frames. Codes
//! start at 0xF0 so they never collide with a command record's module id.
//!
//! Two short out-of-band signals share the channel: `SW_UPD_REPEAT` asks the
//! sender to repeat its last transmission, `SW_UPD_RESEND_EXPECTED` tells it
//! the peer is still waiting for the outstanding packet.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::wire::FrameError;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Size of every sub-protocol packet.
pub const SW_UPD_PACKET_SIZE: usize = 56;

/// Size of the data packet header.
pub const SW_UPD_HEADER_SIZE: usize = 10;

/// File bytes carried per data packet.
pub const SW_UPD_DATA_SIZE: usize = SW_UPD_PACKET_SIZE - SW_UPD_HEADER_SIZE;

/// Longest filename a primer can carry.
pub const SW_UPD_FILENAME_SIZE: usize = 46;

/// Size of the file hash exchanged at confirmation.
pub const SW_UPD_HASH_SIZE: usize = 32;

/// Sends of a single packet before the transfer is abandoned.
pub const SW_UPD_MAX_SEND_ATTEMPTS: u32 = 5;

/// "Repeat your last transmission."
pub const SW_UPD_REPEAT: [u8; 3] = *b"RPT";

/// "Still waiting for the expected packet."
pub const SW_UPD_RESEND_EXPECTED: [u8; 5] = *b"RESND";

/// Packet number used in a confirmation reply that names no packet.
pub const NO_PACKET: i32 = -1;

// ── Command codes ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SwUpdCommand {
    Start = 0xF0,
    Resume = 0xF1,
    StartResumeReply = 0xF2,
    Data = 0xF3,
    DataReply = 0xF4,
    Confirm = 0xF5,
    ConfirmReply = 0xF6,
}

impl TryFrom<u8> for SwUpdCommand {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            0xF0 => Ok(SwUpdCommand::Start),
            0xF1 => Ok(SwUpdCommand::Resume),
            0xF2 => Ok(SwUpdCommand::StartResumeReply),
            0xF3 => Ok(SwUpdCommand::Data),
            0xF4 => Ok(SwUpdCommand::DataReply),
            0xF5 => Ok(SwUpdCommand::Confirm),
            0xF6 => Ok(SwUpdCommand::ConfirmReply),
            other => Err(FrameError::UnknownType(other as i32)),
        }
    }
}

impl From<SwUpdCommand> for u8 {
    fn from(c: SwUpdCommand) -> u8 {
        c as u8
    }
}

// ── Records ───────────────────────────────────────────────────────────────────

/// Opens or resumes a transfer.
///
/// `command` is Start when `bytes_sent` is zero and Resume otherwise.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct StartResume {
    pub command: u8,
    pub file_id: u8,
    /// Bytes the sender believes are already confirmed.
    pub bytes_sent: i32,
    pub total_bytes: i32,
    /// NUL-padded file name.
    pub filename: [u8; SW_UPD_FILENAME_SIZE],
}

assert_eq_size!(StartResume, [u8; SW_UPD_PACKET_SIZE]);

/// Peer's answer to a primer.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct StartResumeReply {
    pub command: u8,
    pub file_id: u8,
    /// Bytes the peer already holds. Streaming resumes from here.
    pub received_bytes: i32,
    pub total_packets: i32,
    pub reserved: [u8; 46],
}

assert_eq_size!(StartResumeReply, [u8; SW_UPD_PACKET_SIZE]);

/// Header of a data packet. Followed by up to `SW_UPD_DATA_SIZE` file bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct DataHeader {
    pub command: u8,
    /// Meaningful bytes in the body.
    pub data_size: u8,
    pub packet_number: i32,
    pub total_bytes: i32,
}

assert_eq_size!(DataHeader, [u8; SW_UPD_HEADER_SIZE]);

/// A full data packet.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct DataPacket {
    pub header: DataHeader,
    pub data: [u8; SW_UPD_DATA_SIZE],
}

assert_eq_size!(DataPacket, [u8; SW_UPD_PACKET_SIZE]);

/// Per-packet acknowledgement. `received == 0` is a NACK.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct DataReply {
    pub command: u8,
    pub received: u8,
    pub packet_number: i32,
    pub total_packets: i32,
    pub reserved: [u8; 46],
}

assert_eq_size!(DataReply, [u8; SW_UPD_PACKET_SIZE]);

/// Sent once every packet is acknowledged.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct Confirm {
    pub command: u8,
    pub file_id: u8,
    pub total_bytes: i32,
    pub total_packets: i32,
    pub hash: [u8; SW_UPD_HASH_SIZE],
    pub reserved: [u8; 14],
}

assert_eq_size!(Confirm, [u8; SW_UPD_PACKET_SIZE]);

/// Peer's verdict on the reassembled file.
///
/// When `confirmed` is zero, or `hash` differs from the sender's, the sender
/// resends `packet_number` and confirms again.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ConfirmReply {
    pub command: u8,
    pub confirmed: u8,
    pub packet_number: i32,
    pub total_packets: i32,
    pub hash: [u8; SW_UPD_HASH_SIZE],
    pub reserved: [u8; 14],
}

assert_eq_size!(ConfirmReply, [u8; SW_UPD_PACKET_SIZE]);

// ── Builders ──────────────────────────────────────────────────────────────────

impl StartResume {
    pub fn new(file_id: u8, filename: &str, bytes_sent: i32, total_bytes: i32) -> Self {
        let mut record = StartResume::new_zeroed();
        record.command = if bytes_sent == 0 {
            SwUpdCommand::Start.into()
        } else {
            SwUpdCommand::Resume.into()
        };
        record.file_id = file_id;
        record.bytes_sent = bytes_sent;
        record.total_bytes = total_bytes;
        let name = filename.as_bytes();
        let len = name.len().min(SW_UPD_FILENAME_SIZE);
        record.filename[..len].copy_from_slice(&name[..len]);
        record
    }
}

impl DataPacket {
    /// Packet `packet_number` carrying `chunk`. `chunk` longer than
    /// `SW_UPD_DATA_SIZE` is rejected.
    pub fn new(packet_number: i32, total_bytes: i32, chunk: &[u8]) -> Result<Self, FrameError> {
        if chunk.len() > SW_UPD_DATA_SIZE {
            return Err(FrameError::PayloadTooLarge {
                size: chunk.len(),
                capacity: SW_UPD_DATA_SIZE,
            });
        }
        let mut packet = DataPacket::new_zeroed();
        packet.header.command = SwUpdCommand::Data.into();
        packet.header.data_size = chunk.len() as u8;
        packet.header.packet_number = packet_number;
        packet.header.total_bytes = total_bytes;
        packet.data[..chunk.len()].copy_from_slice(chunk);
        Ok(packet)
    }
}

impl Confirm {
    pub fn new(file_id: u8, total_bytes: i32, total_packets: i32, hash: [u8; 32]) -> Self {
        let mut record = Confirm::new_zeroed();
        record.command = SwUpdCommand::Confirm.into();
        record.file_id = file_id;
        record.total_bytes = total_bytes;
        record.total_packets = total_packets;
        record.hash = hash;
        record
    }
}

// ── Inbound ───────────────────────────────────────────────────────────────────

/// A sub-protocol message arriving from the peer.
#[derive(Debug, Clone)]
pub enum SwUpdMessage {
    StartResumeReply(StartResumeReply),
    DataReply(DataReply),
    ConfirmReply(ConfirmReply),
    Repeat,
    ResendExpected,
}

impl SwUpdMessage {
    /// Whether `payload` belongs to the sub-protocol at all.
    pub fn matches(payload: &[u8]) -> bool {
        payload == SW_UPD_REPEAT
            || payload == SW_UPD_RESEND_EXPECTED
            || payload
                .first()
                .is_some_and(|&b| SwUpdCommand::try_from(b).is_ok())
    }

    /// Decode a reply or signal. Requests the client itself sends (primer,
    /// data, confirm) are rejected.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        if payload == SW_UPD_REPEAT {
            return Ok(SwUpdMessage::Repeat);
        }
        if payload == SW_UPD_RESEND_EXPECTED {
            return Ok(SwUpdMessage::ResendExpected);
        }
        if payload.len() < SW_UPD_PACKET_SIZE {
            return Err(FrameError::Truncated {
                expected: SW_UPD_PACKET_SIZE,
                actual: payload.len(),
            });
        }
        let packet = &payload[..SW_UPD_PACKET_SIZE];
        let truncated = FrameError::Truncated {
            expected: SW_UPD_PACKET_SIZE,
            actual: payload.len(),
        };
        match SwUpdCommand::try_from(packet[0])? {
            SwUpdCommand::StartResumeReply => StartResumeReply::read_from(packet)
                .map(SwUpdMessage::StartResumeReply)
                .ok_or(truncated),
            SwUpdCommand::DataReply => DataReply::read_from(packet)
                .map(SwUpdMessage::DataReply)
                .ok_or(truncated),
            SwUpdCommand::ConfirmReply => ConfirmReply::read_from(packet)
                .map(SwUpdMessage::ConfirmReply)
                .ok_or(truncated),
            other => Err(FrameError::UnknownType(u8::from(other) as i32)),
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Number of data packets needed for `total_bytes`.
pub fn total_packets(total_bytes: i32) -> i32 {
    let size = SW_UPD_DATA_SIZE as i64;
    ((i64::from(total_bytes.max(0)) + size - 1) / size) as i32
}

/// Content hash of a whole file.
pub fn file_hash(data: &[u8]) -> [u8; SW_UPD_HASH_SIZE] {
    *blake3::hash(data).as_bytes()
}
