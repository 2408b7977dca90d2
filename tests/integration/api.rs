use serde_json::{json, Value};
use zerocopy::AsBytes;

use groundlink_core::record::{module, CommandRecord};
use groundlink_core::wire::{Endpoint, FrameType};

use crate::transfer::UpdatePeer;
use crate::*;

/// Serve the control API for `client` on an ephemeral port.
async fn start_api(client: &Client) -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(groundlink_api::serve_on(listener, client.api_state()));
    Ok(format!("http://127.0.0.1:{port}/api"))
}

async fn get(url: &str) -> Result<(u16, Value)> {
    let resp = reqwest::get(url).await?;
    let status = resp.status().as_u16();
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    Ok((status, body))
}

async fn post(url: &str, body: Value) -> Result<(u16, Value)> {
    let resp = reqwest::Client::new().post(url).json(&body).send().await?;
    let status = resp.status().as_u16();
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    Ok((status, body))
}

/// Connect through the API, then check that /status reports the link, the
/// network table and an idle transfer.
#[tokio::test]
async fn connect_and_status() -> Result<()> {
    let server = GroundServer::bind().await?;
    let client = Client::start(test_config(server.port));
    let api = start_api(&client).await?;

    let (status, body) = get(&format!("{api}/status")).await?;
    assert_eq!(status, 200);
    assert_eq!(body["phase"], "disconnected");
    assert_eq!(body["ready"], false);
    assert_eq!(body["network"].as_array().map(Vec::len), Some(5));
    assert_eq!(body["transfer"]["phase"], "idle");

    let connect_url = format!("{api}/connect");
    let (connected, conn) = tokio::join!(post(&connect_url, json!({})), server.accept());
    let (status, body) = connected?;
    let mut conn = conn?;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["generation"], 1);

    conn.send(FrameType::Null, &[], 0b0000_0101).await?;
    wait_until("first contact", || client.link.state().frames_received > 0).await?;

    let (_, body) = get(&format!("{api}/status")).await?;
    assert_eq!(body["phase"], "connected");
    assert_eq!(body["ready"], true);
    let network = body["network"].as_array().context("no network")?;
    let uhf = network
        .iter()
        .find(|e| e["name"] == "uhf")
        .context("no uhf entry")?;
    assert_eq!(uhf["online"], true);
    assert_eq!(uhf["port"], 54202);
    let xband = network
        .iter()
        .find(|e| e["name"] == "xband")
        .context("no xband entry")?;
    assert_eq!(xband["online"], false);

    let (status, body) = post(&format!("{api}/disconnect"), json!({})).await?;
    assert_eq!(status, 200);
    assert_eq!(body["was_connected"], true);
    let (_, body) = get(&format!("{api}/status")).await?;
    assert_eq!(body["last_disconnect"], "USER");

    client.stop().await
}

/// Connecting to a port nobody listens on is reported as a gateway error and
/// a malformed address as a bad request.
#[tokio::test]
async fn connect_failures_map_to_status_codes() -> Result<()> {
    let server = GroundServer::bind().await?;
    let port = server.port;
    drop(server);
    let client = Client::start(test_config(port));
    let api = start_api(&client).await?;

    let (status, _) = post(&format!("{api}/connect"), json!({})).await?;
    assert_eq!(status, 502);

    let (status, _) = post(
        &format!("{api}/connect"),
        json!({ "address": "not an address", "port": 1 }),
    )
    .await?;
    assert_eq!(status, 400);
    assert!(!client.link.is_ready());

    client.stop().await
}

/// Commands need a live link; once connected they reach the server on the
/// requested endpoint and the output comes back through /command.
#[tokio::test]
async fn command_round_trip() -> Result<()> {
    let server = GroundServer::bind().await?;
    let client = Client::start(test_config(server.port));
    let api = start_api(&client).await?;

    let request = json!({ "module": 3, "command": 2, "data": "0a0b", "endpoint": "xband" });
    let (status, _) = post(&format!("{api}/command"), request.clone()).await?;
    assert_eq!(status, 503);

    let (connected, conn) = tokio::join!(client.connect(), server.accept());
    connected?;
    let mut conn = conn?;

    let (status, body) = post(&format!("{api}/command"), request).await?;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["endpoint"], "xband");

    let frame = conn.read_kind(FrameType::Data).await?;
    assert_eq!({ frame.endpoint }, i32::from(Endpoint::XBand));
    let record = CommandRecord::from_payload(frame.payload())?;
    assert_eq!(record.module_id, 3);
    assert_eq!(record.data(), &[0x0a, 0x0b]);

    let (status, _) = post(
        &format!("{api}/command"),
        json!({ "module": 3, "command": 2, "data": "zz" }),
    )
    .await?;
    assert_eq!(status, 400);

    let (status, _) = get(&format!("{api}/command")).await?;
    assert_eq!(status, 404);

    let output = CommandRecord::new(module::RADIO, 2, b"ok")?;
    conn.send(FrameType::Data, output.as_bytes(), 0).await?;
    let mut ack = vec![1u8];
    ack.extend_from_slice(&0i32.to_ne_bytes());
    conn.send(FrameType::Ack, &ack, 0).await?;
    conn.send(FrameType::ConfigXBand, &[0xde, 0xad], 0).await?;
    wait_until("radio config", || client.stores.config(FrameType::ConfigXBand).is_some()).await?;

    let (status, body) = get(&format!("{api}/command")).await?;
    assert_eq!(status, 200);
    assert_eq!(body["module_id"], module::RADIO);
    assert_eq!(body["data"], "6f6b");

    let (_, body) = get(&format!("{api}/ack")).await?;
    assert_eq!(body["ack"], true);
    assert_eq!(body["nack"], false);

    let (_, body) = get(&format!("{api}/config")).await?;
    assert_eq!(body["xband"]["data"], "dead");
    assert!(body["uhf"].is_null());

    client.stop().await
}

/// A poll through the API returns the telemetry the server sends back, and
/// the ring lists it afterwards.
#[tokio::test]
async fn telemetry_poll_via_api() -> Result<()> {
    let (client, mut conn) = connected_pair().await?;
    let api = start_api(&client).await?;

    let poll = tokio::spawn({
        let url = format!("{api}/telemetry/poll");
        async move { post(&url, json!({})).await }
    });

    conn.read_kind(FrameType::Data).await?;
    let answer = CommandRecord::new(module::TELEMETRY, 0x01, &[0x11, 0x22])?;
    conn.send(FrameType::Data, answer.as_bytes(), 0).await?;

    let (status, body) = poll.await??;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["seq"], 1);
    assert_eq!(body["data"], "1122");

    let (_, body) = get(&format!("{api}/telemetry")).await?;
    assert_eq!(body["capacity"], 64);
    assert_eq!(body["entries"].as_array().map(Vec::len), Some(1));

    client.stop().await
}

/// A software update started through the API runs to confirmation and its
/// progress is visible on GET /transfer.
#[tokio::test]
async fn transfer_via_api() -> Result<()> {
    let (client, mut conn) = connected_pair().await?;
    let api = start_api(&client).await?;

    let data: Vec<u8> = (0..400u32).map(|i| (i * 7) as u8).collect();
    let path = std::env::temp_dir().join(format!("groundlink-it-{}.bin", std::process::id()));
    tokio::fs::write(&path, &data).await?;

    let (status, body) = post(
        &format!("{api}/transfer"),
        json!({ "path": path.display().to_string(), "file_id": 4 }),
    )
    .await?;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["total_packets"], 9);

    let (status, _) = post(
        &format!("{api}/transfer"),
        json!({ "path": path.display().to_string() }),
    )
    .await?;
    assert_eq!(status, 409);

    let log = UpdatePeer::default().serve(&mut conn).await?;
    assert_eq!(log.file, data);

    wait_until("transfer finished", || !client.transfers.is_busy()).await?;
    let (_, body) = get(&format!("{api}/transfer")).await?;
    assert_eq!(body["busy"], false);
    assert_eq!(body["phase"], "finished");
    assert_eq!(body["filename"], path.file_name().and_then(|n| n.to_str()).unwrap_or_default());
    assert_eq!(body["total_packets"], 9);
    assert!(body["error"].is_null());
    assert_eq!(body["report"]["total_bytes"], 400);
    assert_eq!(body["report"]["resumed_at"], 0);
    // primer + 9 packets + confirm
    assert_eq!(body["report"]["packets_sent"], 11);
    assert_eq!(body["report"]["hash"].as_str().map(str::len), Some(64));

    tokio::fs::remove_file(&path).await.ok();
    client.stop().await
}

/// Starting a transfer with the link down or a missing file is refused.
#[tokio::test]
async fn transfer_refusals() -> Result<()> {
    let server = GroundServer::bind().await?;
    let client = Client::start(test_config(server.port));
    let api = start_api(&client).await?;

    let (status, _) = post(&format!("{api}/transfer"), json!({ "path": "/nonexistent" })).await?;
    assert_eq!(status, 503);

    let (connected, conn) = tokio::join!(client.connect(), server.accept());
    connected?;
    let _conn = conn?;

    let (status, body) = post(
        &format!("{api}/transfer"),
        json!({ "path": "/nonexistent/groundlink.bin" }),
    )
    .await?;
    assert_eq!(status, 400);
    assert!(body.is_null());
    assert!(!client.transfers.is_busy());

    client.stop().await
}

/// POST /daemon/shutdown fires the shutdown broadcast.
#[tokio::test]
async fn shutdown_broadcasts() -> Result<()> {
    let server = GroundServer::bind().await?;
    let client = Client::start(test_config(server.port));
    let api = start_api(&client).await?;
    let mut shutdown = client.shutdown_tx.subscribe();

    let (status, body) = post(&format!("{api}/daemon/shutdown"), json!({})).await?;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Shutdown initiated");
    tokio::time::timeout(Duration::from_secs(2), shutdown.recv()).await??;

    client.stop().await
}
