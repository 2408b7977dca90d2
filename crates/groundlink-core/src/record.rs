//! Payload records carried inside frames.
//!
//! The transport never looks inside a `CommandRecord` beyond its module id;
//! subsystem code fills it in and reads it back.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::wire::{FrameError, MAX_PAYLOAD};

/// Data capacity of a command record.
pub const COMMAND_DATA_SIZE: usize = 46;

/// Size of a command record on the wire.
pub const COMMAND_RECORD_SIZE: usize = 56;

/// Size of an acknowledgement record on the wire.
pub const ACK_RECORD_SIZE: usize = 5;

/// Module ids understood by the spacecraft. Ids 0xF0 and above belong to the
/// software-update sub-protocol and never appear in a command record.
pub mod module {
    pub const ATTITUDE: u8 = 0x01;
    pub const POWER: u8 = 0x02;
    pub const RADIO: u8 = 0x03;
    /// Telemetry updates. Outputs with this id go to the telemetry ring.
    pub const TELEMETRY: u8 = 0x0A;
}

/// Command ids of the telemetry module.
pub mod telemetry_cmd {
    /// Ask the spacecraft for one telemetry update.
    pub const REQUEST_UPDATE: u8 = 0x01;
}

// ── Command record ────────────────────────────────────────────────────────────

/// A module/command/data triple sent to or received from the spacecraft.
///
/// Wire size: 56 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct CommandRecord {
    pub module_id: u8,
    pub command_id: u8,
    /// Reserved, zero on send.
    pub reserved: u32,
    /// Number of meaningful bytes in `data`.
    pub data_len: i32,
    pub data: [u8; COMMAND_DATA_SIZE],
}

assert_eq_size!(CommandRecord, [u8; COMMAND_RECORD_SIZE]);

impl CommandRecord {
    /// Build a command for `module_id`/`command_id` with `data` attached.
    pub fn new(module_id: u8, command_id: u8, data: &[u8]) -> Result<Self, FrameError> {
        if data.len() > COMMAND_DATA_SIZE {
            return Err(FrameError::PayloadTooLarge {
                size: data.len(),
                capacity: COMMAND_DATA_SIZE,
            });
        }
        let mut record = CommandRecord::new_zeroed();
        record.module_id = module_id;
        record.command_id = command_id;
        record.data_len = data.len() as i32;
        record.data[..data.len()].copy_from_slice(data);
        Ok(record)
    }

    /// Read a record out of a frame payload. Short payloads are zero-extended.
    pub fn from_payload(payload: &[u8]) -> Result<Self, FrameError> {
        read_padded(payload)
    }

    /// The meaningful part of `data`, clamped to the buffer.
    pub fn data(&self) -> &[u8] {
        let len = self.data_len.clamp(0, COMMAND_DATA_SIZE as i32) as usize;
        &self.data[..len]
    }
}

// ── Ack record ────────────────────────────────────────────────────────────────

/// Payload of Ack and Nack frames.
///
/// Wire size: 5 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct AckRecord {
    /// Non-zero when the server accepted the last command.
    pub ack: u8,
    /// Server error code, zero on success.
    pub error_code: i32,
}

assert_eq_size!(AckRecord, [u8; ACK_RECORD_SIZE]);

impl AckRecord {
    pub fn from_payload(payload: &[u8]) -> Result<Self, FrameError> {
        read_padded(payload)
    }

    pub fn is_ack(&self) -> bool {
        self.ack != 0
    }

    pub fn code(&self) -> i32 {
        self.error_code
    }
}

/// Copy `payload` into a zeroed `T`, rejecting payloads longer than `T`.
fn read_padded<T: FromBytes + AsBytes + FromZeroes>(payload: &[u8]) -> Result<T, FrameError> {
    let size = std::mem::size_of::<T>();
    if payload.len() > size || payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            capacity: size,
        });
    }
    let mut value = T::new_zeroed();
    value.as_bytes_mut()[..payload.len()].copy_from_slice(payload);
    Ok(value)
}
