use std::time::Duration;

use groundlink_core::record::{module, telemetry_cmd, AckRecord, CommandRecord};
use groundlink_core::wire::{Endpoint, FrameType, FRAME_GUID};
use groundlink_services::{DisconnectReason, Heartbeat, LinkPhase};
use zerocopy::AsBytes;

use crate::*;

fn ack_payload(ack: bool, code: i32) -> Vec<u8> {
    let mut payload = vec![ack as u8];
    payload.extend_from_slice(&code.to_ne_bytes());
    payload
}

/// Everything the server pushes lands in the right store, and the netstat
/// of the latest frame is reflected in the link state.
#[tokio::test]
async fn server_frames_fill_stores() -> Result<()> {
    let (client, mut server) = connected_pair().await?;

    server.send(FrameType::Null, &[], 0b0000_0111).await?;
    server.send(FrameType::Ack, &ack_payload(true, 0), 0b0000_0111).await?;
    server.send(FrameType::ConfigUhf, b"uhf:437.5MHz", 0b0000_0111).await?;
    let output = CommandRecord::new(module::POWER, 0x04, b"bus=28.1V")?;
    server.send(FrameType::Data, output.as_bytes(), 0b0000_1111).await?;

    wait_until("command output", || client.stores.latest_command_output().is_some()).await?;

    let ack = client.stores.latest_ack().context("no ack")?;
    assert!(ack.record.is_ack());
    assert!(!ack.nack);
    assert_eq!(
        &client.stores.config(FrameType::ConfigUhf).context("no config")?.data[..],
        b"uhf:437.5MHz"
    );
    let out = client.stores.latest_command_output().context("no output")?;
    assert_eq!(out.record.module_id, module::POWER);
    assert_eq!(out.record.data(), b"bus=28.1V");
    assert!(client.stores.telemetry().is_empty());

    let state = client.link.state();
    assert_eq!(state.frames_received, 4);
    assert!(state.netstat.is_online(Endpoint::XBand));
    assert!(!state.netstat.is_online(Endpoint::Telescope));
    assert!(state.last_contact.is_some());

    client.stop().await
}

/// Commands go out as Data frames addressed to the requested endpoint.
#[tokio::test]
async fn command_reaches_server_intact() -> Result<()> {
    let (client, mut server) = connected_pair().await?;

    let record = CommandRecord::new(module::ATTITUDE, 0x02, &[1, 2, 3])?;
    client.link.send_command(Endpoint::XBand, &record).await?;

    let frame = server.read_kind(FrameType::Data).await?;
    assert_eq!({ frame.guid }, FRAME_GUID);
    assert_eq!({ frame.endpoint }, i32::from(Endpoint::XBand));
    let received = CommandRecord::from_payload(frame.payload())?;
    assert_eq!(received.module_id, module::ATTITUDE);
    assert_eq!(received.command_id, 0x02);
    assert_eq!(received.data(), &[1, 2, 3]);
    assert_eq!(client.link.state().frames_sent, 1);

    client.stop().await
}

/// Heartbeats are empty Null frames addressed to the server.
#[tokio::test]
async fn heartbeat_reaches_server() -> Result<()> {
    let (client, mut server) = connected_pair().await?;
    let heartbeat = Heartbeat::new(
        client.link.clone(),
        Duration::from_millis(100),
        client.shutdown_tx.subscribe(),
    );
    let task = tokio::spawn(heartbeat.run());

    for _ in 0..3 {
        let frame = server.read_frame().await?;
        assert_eq!(frame.kind()?, FrameType::Null);
        assert_eq!({ frame.endpoint }, i32::from(Endpoint::Server));
        assert!(frame.payload().is_empty());
    }

    client.stop().await?;
    tokio::time::timeout(Duration::from_secs(2), task).await???;
    Ok(())
}

/// A telemetry poll sends the request and returns the answer routed into
/// the ring, not the command output store.
#[tokio::test]
async fn telemetry_poll_round_trip() -> Result<()> {
    let (client, mut server) = connected_pair().await?;

    let poller = client.poller.clone();
    let poll = tokio::spawn(async move { poller.poll().await });

    let request = server.read_kind(FrameType::Data).await?;
    assert_eq!({ request.endpoint }, i32::from(Endpoint::Uhf));
    let record = CommandRecord::from_payload(request.payload())?;
    assert_eq!(record.module_id, module::TELEMETRY);
    assert_eq!(record.command_id, telemetry_cmd::REQUEST_UPDATE);

    let answer = CommandRecord::new(module::TELEMETRY, telemetry_cmd::REQUEST_UPDATE, b"temp=21")?;
    server.send(FrameType::Data, answer.as_bytes(), 0b0000_0111).await?;

    let entry = poll.await??;
    assert_eq!(entry.record.data(), b"temp=21");
    assert_eq!(client.stores.telemetry().len(), 1);
    assert!(client.stores.latest_command_output().is_none());

    client.stop().await
}

/// An unanswered poll times out and frees the poller.
#[tokio::test]
async fn telemetry_poll_times_out() -> Result<()> {
    let (client, mut server) = connected_pair().await?;

    let err = client.poller.poll().await.unwrap_err();
    assert!(matches!(err, groundlink_services::PollError::Timeout(_)));
    assert!(!client.poller.is_busy());
    server.read_kind(FrameType::Data).await?;

    client.stop().await
}

/// Line noise ahead of a frame is skipped and the frame still arrives.
#[tokio::test]
async fn noise_before_frame_is_skipped() -> Result<()> {
    let (client, mut server) = connected_pair().await?;

    server.send_raw(&[0x00, 0x13, 0x37, 0xFF, 0x6B]).await?;
    server.send(FrameType::Nack, &ack_payload(false, 7), 0).await?;

    wait_until("nack", || client.stores.latest_ack().is_some()).await?;
    let nack = client.stores.latest_ack().context("no nack")?;
    assert!(nack.nack);
    assert_eq!(nack.record.code(), 7);
    assert!(client.link.is_ready());

    client.stop().await
}

/// After the server hangs up the link reports why, and a second connect
/// brings the receive loop back on the new connection.
#[tokio::test]
async fn reconnect_after_peer_close() -> Result<()> {
    let server = GroundServer::bind().await?;
    let client = Client::start(test_config(server.port));

    let (connected, conn) = tokio::join!(client.connect(), server.accept());
    connected?;
    let first = client.link.generation();
    conn?.close().await?;

    wait_until("peer close", || !client.link.is_ready()).await?;
    let state = client.link.state();
    assert_eq!(state.phase, LinkPhase::Disconnected);
    assert_eq!(state.last_disconnect, Some(DisconnectReason::PeerClosed));

    let (connected, conn) = tokio::join!(client.connect(), server.accept());
    connected?;
    let mut conn = conn?;
    assert!(client.link.generation() > first);

    conn.send(FrameType::Ack, &ack_payload(true, 0), 0).await?;
    wait_until("ack on new connection", || client.stores.latest_ack().is_some()).await?;

    client.stop().await
}

/// A server that goes quiet for longer than the receive timeout is dropped.
#[tokio::test]
async fn silent_server_times_out() -> Result<()> {
    let (client, _server) = connected_pair().await?;

    wait_until("receive timeout", || !client.link.is_ready()).await?;
    assert_eq!(client.link.state().last_disconnect, Some(DisconnectReason::Timeout));

    client.stop().await
}

/// Operator disconnect closes the stream and the server sees EOF.
#[tokio::test]
async fn user_disconnect_closes_stream() -> Result<()> {
    let (client, mut server) = connected_pair().await?;

    assert!(client.link.disconnect(DisconnectReason::User).await);
    assert!(!client.link.disconnect(DisconnectReason::User).await);
    assert!(server.read_frame().await.is_err());

    let record = AckRecord { ack: 1, error_code: 0 };
    assert!(client.link.send_payload(FrameType::Ack, Endpoint::Server, record.as_bytes()).await.is_err());
    assert_eq!(client.link.state().last_disconnect, Some(DisconnectReason::User));

    client.stop().await
}
