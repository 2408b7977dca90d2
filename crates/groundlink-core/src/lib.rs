//! groundlink-core — wire format, integrity checks and configuration.
//! All other Groundlink crates depend on this one. Nothing here touches the network.

pub mod assembler;
pub mod config;
pub mod crc;
pub mod record;
pub mod swupd;
pub mod wire;

pub use assembler::FrameAssembler;
pub use record::{AckRecord, CommandRecord};
pub use wire::{Endpoint, Frame, FrameError, FrameType, IntegrityError, NetStat};
