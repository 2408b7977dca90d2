//! Telemetry ring and poll commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

#[derive(Deserialize)]
struct TelemetryResponse {
    capacity: usize,
    entries: Vec<TelemetryItem>,
}

#[derive(Deserialize)]
struct TelemetryItem {
    seq: u64,
    command_id: u8,
    data: String,
    received_secs: u64,
}

impl TelemetryItem {
    fn print(&self) {
        println!(
            "  #{:<5} cmd {:#04x}  {}  ({}s ago)",
            self.seq, self.command_id, self.data, self.received_secs
        );
    }
}

pub async fn cmd_telemetry(port: u16) -> Result<()> {
    let resp: TelemetryResponse = get_json(&format!("{}/telemetry", base_url(port))).await?;

    if resp.entries.is_empty() {
        println!("No telemetry received yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Telemetry ({}/{})", resp.entries.len(), resp.capacity);
    println!("═══════════════════════════════════════");
    for item in &resp.entries {
        item.print();
    }
    Ok(())
}

pub async fn cmd_poll(port: u16) -> Result<()> {
    let item: TelemetryItem = post_json(&format!("{}/telemetry/poll", base_url(port))).await?;
    item.print();
    Ok(())
}
