//! Link status, connect, disconnect, shutdown commands.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::http::{base_url, get_json, post_json, post_json_body};
use super::transfer::TransferProgress;

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    phase: String,
    ready: bool,
    generation: u64,
    peer: Option<String>,
    connected_secs: Option<u64>,
    last_contact_secs: Option<u64>,
    last_disconnect: Option<String>,
    frames_sent: u64,
    frames_received: u64,
    network: Vec<EndpointStatus>,
    telemetry_buffered: usize,
    transfer: TransferProgress,
}

#[derive(Deserialize)]
struct EndpointStatus {
    name: String,
    online: bool,
    port: u16,
}

#[derive(Serialize)]
struct ConnectRequest {
    address: Option<String>,
    port: Option<u16>,
}

#[derive(Deserialize)]
struct ConnectResponse {
    peer: String,
    generation: u64,
}

#[derive(Deserialize)]
struct DisconnectResponse {
    was_connected: bool,
}

#[derive(Deserialize)]
struct ShutdownResponse {
    message: String,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Groundlink Status");
    println!("═══════════════════════════════════════");
    println!("  Link            : {}", resp.phase);
    println!("  Ready           : {}", if resp.ready { "yes" } else { "no" });
    if let Some(peer) = &resp.peer {
        println!("  Server          : {} (connection #{})", peer, resp.generation);
    }
    if let Some(secs) = resp.connected_secs {
        println!("  Connected for   : {}s", secs);
    }
    if let Some(secs) = resp.last_contact_secs {
        println!("  Last contact    : {}s ago", secs);
    }
    if let Some(reason) = &resp.last_disconnect {
        println!("  Last disconnect : {}", reason);
    }
    println!("  Frames sent     : {}", resp.frames_sent);
    println!("  Frames received : {}", resp.frames_received);
    println!("  Telemetry kept  : {}", resp.telemetry_buffered);

    println!("\n  Network:");
    for e in &resp.network {
        let icon = if e.online { "●" } else { "○" };
        println!("  {} {:<10} port {}", icon, e.name, e.port);
    }

    if resp.transfer.phase != "idle" {
        println!("\n  Transfer:");
        resp.transfer.print();
    }

    Ok(())
}

pub async fn cmd_connect(port: u16, address: Option<&str>, server_port: Option<u16>) -> Result<()> {
    let req = ConnectRequest {
        address: address.map(str::to_string),
        port: server_port,
    };
    let resp: ConnectResponse =
        post_json_body(&format!("{}/connect", base_url(port)), &req).await?;
    println!("Connected to {} (connection #{}).", resp.peer, resp.generation);
    Ok(())
}

pub async fn cmd_disconnect(port: u16) -> Result<()> {
    let resp: DisconnectResponse = post_json(&format!("{}/disconnect", base_url(port))).await?;
    if resp.was_connected {
        println!("Disconnected.");
    } else {
        println!("Link was already down.");
    }
    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    let resp: ShutdownResponse =
        post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    println!("{}", resp.message);
    Ok(())
}
