//! Command send, command output, acknowledgement and radio config commands.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::http::{base_url, get_json, post_json_body};

#[derive(Serialize)]
struct CommandRequest {
    module: u8,
    command: u8,
    data: String,
    endpoint: Option<String>,
}

#[derive(Deserialize)]
struct CommandResponse {
    endpoint: String,
    bytes_sent: usize,
}

#[derive(Deserialize)]
struct CommandOutputResponse {
    module_id: u8,
    command_id: u8,
    data: String,
    received_secs: u64,
}

#[derive(Deserialize)]
struct AckResponse {
    ack: bool,
    nack: bool,
    error_code: i32,
    received_secs: u64,
}

#[derive(Deserialize)]
struct RadioConfigResponse {
    uhf: Option<ConfigBlockInfo>,
    xband: Option<ConfigBlockInfo>,
}

#[derive(Deserialize)]
struct ConfigBlockInfo {
    data: String,
    received_secs: u64,
}

pub async fn cmd_command(
    port: u16,
    module: u8,
    command: u8,
    data: Option<&str>,
    endpoint: Option<&str>,
) -> Result<()> {
    let req = CommandRequest {
        module,
        command,
        data: data.unwrap_or_default().to_string(),
        endpoint: endpoint.map(str::to_string),
    };
    let resp: CommandResponse =
        post_json_body(&format!("{}/command", base_url(port)), &req).await?;
    println!(
        "Sent module {:#04x} command {:#04x} to {} ({} bytes).",
        module, command, resp.endpoint, resp.bytes_sent
    );
    Ok(())
}

pub async fn cmd_output(port: u16) -> Result<()> {
    let resp: CommandOutputResponse = get_json(&format!("{}/command", base_url(port))).await?;
    println!("═══════════════════════════════════════");
    println!("  Last Command Output");
    println!("═══════════════════════════════════════");
    println!("  Module   : {:#04x}", resp.module_id);
    println!("  Command  : {:#04x}", resp.command_id);
    println!("  Data     : {}", if resp.data.is_empty() { "-" } else { &resp.data });
    println!("  Received : {}s ago", resp.received_secs);
    Ok(())
}

pub async fn cmd_ack(port: u16) -> Result<()> {
    let resp: AckResponse = get_json(&format!("{}/ack", base_url(port))).await?;
    let verdict = match (resp.nack, resp.ack) {
        (true, _) => "NACK",
        (false, true) => "ACK",
        (false, false) => "rejected",
    };
    println!(
        "{} (error code {}) {}s ago",
        verdict, resp.error_code, resp.received_secs
    );
    Ok(())
}

pub async fn cmd_config(port: u16) -> Result<()> {
    let resp: RadioConfigResponse = get_json(&format!("{}/config", base_url(port))).await?;
    for (name, block) in [("UHF", &resp.uhf), ("X-band", &resp.xband)] {
        match block {
            Some(b) => println!("  {:<7}: {} ({}s ago)", name, b.data, b.received_secs),
            None => println!("  {:<7}: none received", name),
        }
    }
    Ok(())
}
