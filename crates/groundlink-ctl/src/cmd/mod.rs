//! CLI command modules.

pub mod command;
pub mod http;
pub mod status;
pub mod telemetry;
pub mod transfer;
