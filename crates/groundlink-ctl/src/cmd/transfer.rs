//! Software-update transfer commands.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use super::http::{base_url, get_json, post_json_body};

#[derive(Serialize)]
struct TransferRequest {
    path: String,
    file_id: u8,
    resume_from: i32,
}

#[derive(Deserialize)]
struct TransferStarted {
    path: String,
    total_packets: i32,
}

#[derive(Deserialize)]
pub struct TransferProgress {
    pub phase: String,
    pub filename: String,
    pub packet: i32,
    pub total_packets: i32,
    pub attempts: u32,
    pub retransmissions: u32,
    pub error: Option<String>,
    #[serde(default)]
    pub report: Option<TransferReport>,
}

#[derive(Deserialize)]
pub struct TransferReport {
    pub total_bytes: i32,
    pub resumed_at: i32,
    pub packets_sent: u32,
    pub hash: String,
}

impl TransferProgress {
    pub fn print(&self) {
        println!("  ┌─ {}", self.filename);
        println!("  │  phase           : {}", self.phase);
        println!("  │  packet          : {}/{}", self.packet, self.total_packets);
        println!("  │  attempts        : {}", self.attempts);
        match (&self.error, &self.report) {
            (Some(e), _) => {
                println!("  │  retransmissions : {}", self.retransmissions);
                println!("  └─ error           : {}", e);
            }
            (None, Some(report)) => {
                println!("  │  retransmissions : {}", self.retransmissions);
                println!("  │  bytes           : {}", report.total_bytes);
                println!("  │  resumed at      : packet {}", report.resumed_at);
                println!("  │  packets sent    : {}", report.packets_sent);
                println!("  └─ hash            : {}", report.hash);
            }
            (None, None) => println!("  └─ retransmissions : {}", self.retransmissions),
        }
    }
}

#[derive(Deserialize)]
struct TransferStatusResponse {
    busy: bool,
    #[serde(flatten)]
    progress: TransferProgress,
}

pub async fn cmd_transfer(
    port: u16,
    path: &str,
    file_id: u8,
    resume_from: i32,
    wait: bool,
) -> Result<()> {
    // The daemon reads the file itself, so hand it an absolute path.
    let path = std::fs::canonicalize(path)
        .with_context(|| format!("failed to resolve {}", path))?
        .display()
        .to_string();

    let req = TransferRequest {
        path,
        file_id,
        resume_from,
    };
    let started: TransferStarted =
        post_json_body(&format!("{}/transfer", base_url(port)), &req).await?;
    println!(
        "Transfer of {} started ({} packets).",
        started.path, started.total_packets
    );

    if !wait {
        return Ok(());
    }

    let mut last_packet = -1;
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let status: TransferStatusResponse =
            get_json(&format!("{}/transfer", base_url(port))).await?;
        let progress = &status.progress;

        if progress.packet != last_packet && progress.phase == "streaming" {
            println!("  packet {}/{}", progress.packet, progress.total_packets);
            last_packet = progress.packet;
        }
        match progress.phase.as_str() {
            "finished" => {
                println!(
                    "Transfer confirmed ({} retransmissions).",
                    progress.retransmissions
                );
                return Ok(());
            }
            "aborted" => {
                progress.print();
                bail!("transfer aborted");
            }
            _ if !status.busy => bail!("transfer ended without a result"),
            _ => {}
        }
    }
}

pub async fn cmd_transfer_status(port: u16) -> Result<()> {
    let status: TransferStatusResponse = get_json(&format!("{}/transfer", base_url(port))).await?;
    if status.progress.phase == "idle" {
        println!("No transfer has run yet.");
        return Ok(());
    }
    status.progress.print();
    Ok(())
}
