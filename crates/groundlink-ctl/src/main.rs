//! groundlink-ctl — command-line interface for the groundlink daemon.

mod cmd;

use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 9101;

fn parse_u8(value: &str, what: &str) -> Result<u8> {
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.with_context(|| format!("{} must be a byte (decimal or 0x-prefixed hex)", what))
}

fn print_usage() {
    println!("Usage: groundlink-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status                          Show link, network and transfer state");
    println!("  connect [<address> <port>]      Connect to the ground server");
    println!("  disconnect                      Drop the link");
    println!("  command <module> <cmd> [<hex>]  Send a subsystem command");
    println!("          [--to <endpoint>]       Address it to uhf, xband, telescope, ...");
    println!("  output                          Show the last command output");
    println!("  ack                             Show the last acknowledgement");
    println!("  config                          Show the last radio config blocks");
    println!("  telemetry                       List buffered telemetry");
    println!("  poll                            Request fresh telemetry and wait for it");
    println!("  transfer <path>                 Send a software update");
    println!("           [--resume <bytes>]     Resume after bytes already received");
    println!("           [--file-id <id>]       File identifier (default 0)");
    println!("           [--wait]               Follow progress until done");
    println!("  transfer status                 Show the current transfer");
    println!("  shutdown                        Stop the daemon");
    println!();
    println!("Options:");
    println!("  --port <port>   Daemon API port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut port = DEFAULT_PORT;
    let mut endpoint: Option<String> = None;
    let mut resume_from = 0i32;
    let mut file_id = 0u8;
    let mut wait = false;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                port = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--to" => {
                i += 1;
                endpoint = Some(args.get(i).context("--to requires an endpoint")?.clone());
            }
            "--resume" => {
                i += 1;
                resume_from = args
                    .get(i)
                    .context("--resume requires a byte count")?
                    .parse()
                    .context("--resume must be a number")?;
            }
            "--file-id" => {
                i += 1;
                file_id = parse_u8(args.get(i).context("--file-id requires a value")?, "--file-id")?;
            }
            "--wait" => wait = true,
            other => remaining.push(other),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(port).await,
        ["connect"] => cmd::status::cmd_connect(port, None, None).await,
        ["connect", addr, server_port] => {
            let server_port = server_port.parse().context("server port must be a number")?;
            cmd::status::cmd_connect(port, Some(*addr), Some(server_port)).await
        }
        ["disconnect"] => cmd::status::cmd_disconnect(port).await,
        ["command", module, command] => {
            let module = parse_u8(module, "module")?;
            let command = parse_u8(command, "command")?;
            cmd::command::cmd_command(port, module, command, None, endpoint.as_deref()).await
        }
        ["command", module, command, data] => {
            let module = parse_u8(module, "module")?;
            let command = parse_u8(command, "command")?;
            cmd::command::cmd_command(port, module, command, Some(*data), endpoint.as_deref()).await
        }
        ["output"] => cmd::command::cmd_output(port).await,
        ["ack"] => cmd::command::cmd_ack(port).await,
        ["config"] => cmd::command::cmd_config(port).await,
        ["telemetry"] => cmd::telemetry::cmd_telemetry(port).await,
        ["poll"] => cmd::telemetry::cmd_poll(port).await,
        ["transfer", "status"] => cmd::transfer::cmd_transfer_status(port).await,
        ["transfer", path] => {
            cmd::transfer::cmd_transfer(port, path, file_id, resume_from, wait).await
        }
        ["shutdown"] => cmd::status::cmd_shutdown(port).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
