//! Groundlink integration test harness.
//!
//! Every test runs a complete client (link, receive loop, stores, transfer
//! route and telemetry poller) against a simulated ground server bound to
//! loopback. No root, namespaces or external processes are needed:
//!
//!   cargo test --test integration
//!
//! The simulated server speaks raw frames. Each test drives it by hand, so
//! the exchange on the wire is exactly what the test says it is.

mod api;
mod link;
mod transfer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use zerocopy::AsBytes;

use groundlink_core::config::GroundlinkConfig;
use groundlink_core::wire::{Endpoint, Frame, FrameType, FRAME_SIZE};
use groundlink_services::{
    FrameRouter, Link, LinkStores, ReceiveLoop, TelemetryPoller, TransferRoute,
};

// ── Simulated ground server ───────────────────────────────────────────────────

pub struct GroundServer {
    listener: TcpListener,
    pub port: u16,
}

impl GroundServer {
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub async fn accept(&self) -> Result<ServerConn> {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), self.listener.accept())
            .await
            .context("client never connected")??;
        Ok(ServerConn { stream })
    }
}

/// The server's end of one client connection.
pub struct ServerConn {
    stream: TcpStream,
}

impl ServerConn {
    /// Read one frame and insist that it is intact.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let mut buf = [0u8; FRAME_SIZE];
        tokio::time::timeout(Duration::from_secs(5), self.stream.read_exact(&mut buf))
            .await
            .context("no frame from client")??;
        let frame = Frame::decode(&buf)?;
        if let Err(e) = frame.check_integrity() {
            bail!("client sent a corrupted frame: {e}");
        }
        Ok(frame)
    }

    /// Read frames until one of `kind` arrives, skipping heartbeats.
    pub async fn read_kind(&mut self, kind: FrameType) -> Result<Frame> {
        loop {
            let frame = self.read_frame().await?;
            if frame.kind()? == kind {
                return Ok(frame);
            }
        }
    }

    pub async fn send(&mut self, kind: FrameType, data: &[u8], netstat: u8) -> Result<()> {
        let mut frame = Frame::build(kind, data.len())?;
        frame.store(Endpoint::Client, data)?;
        frame.netstat = netstat;
        self.stream.write_all(frame.as_bytes()).await?;
        Ok(())
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

// ── Client under test ─────────────────────────────────────────────────────────

/// A running client wired the same way the daemon wires it.
pub struct Client {
    pub link: Link,
    pub stores: LinkStores,
    pub transfers: TransferRoute,
    pub poller: TelemetryPoller,
    pub config: Arc<GroundlinkConfig>,
    pub shutdown_tx: broadcast::Sender<()>,
    receive: tokio::task::JoinHandle<Result<()>>,
}

/// Config with timeouts short enough for tests.
pub fn test_config(server_port: u16) -> GroundlinkConfig {
    let mut config = GroundlinkConfig::default();
    config.network.server_port = server_port;
    config.network.connect_timeout_secs = 2;
    config.link.recv_timeout_secs = 2;
    config.link.idle_secs = 1;
    config.link.telemetry_poll_timeout_secs = 2;
    config.transfer.reply_timeout_secs = 1;
    config
}

impl Client {
    pub fn start(config: GroundlinkConfig) -> Self {
        let config = Arc::new(config);
        let link = Link::new();
        let stores = LinkStores::new(config.link.telemetry_capacity);
        let transfers = TransferRoute::new();
        let poller = TelemetryPoller::new(
            link.clone(),
            stores.clone(),
            config.link.command_endpoint,
            config.link.telemetry_poll_timeout(),
        );
        let (shutdown_tx, _) = broadcast::channel(1);

        let receive = ReceiveLoop::new(
            link.clone(),
            FrameRouter::new(link.clone(), stores.clone(), transfers.clone()),
            config.link.recv_timeout(),
            config.link.idle_interval(),
            shutdown_tx.subscribe(),
        );
        let receive = tokio::spawn(receive.run());

        Self {
            link,
            stores,
            transfers,
            poller,
            config,
            shutdown_tx,
            receive,
        }
    }

    pub async fn connect(&self) -> Result<()> {
        let net = &self.config.network;
        self.link
            .connect(&net.server_addr, net.server_port, net.connect_timeout())
            .await?;
        Ok(())
    }

    pub fn api_state(&self) -> groundlink_api::ApiState {
        groundlink_api::ApiState {
            link: self.link.clone(),
            stores: self.stores.clone(),
            transfers: self.transfers.clone(),
            poller: self.poller.clone(),
            config: self.config.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        tokio::time::timeout(Duration::from_secs(5), self.receive)
            .await
            .context("receive loop ignored shutdown")???;
        Ok(())
    }
}

/// Client and server already connected to each other.
pub async fn connected_pair() -> Result<(Client, ServerConn)> {
    let server = GroundServer::bind().await?;
    let client = Client::start(test_config(server.port));
    let (connected, conn) = tokio::join!(client.connect(), server.accept());
    connected?;
    Ok((client, conn?))
}

/// Poll `cond` every 20 ms for up to 4 seconds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) -> Result<()> {
    for _ in 0..200 {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("timed out waiting for {what}")
}
