//! groundlinkd — ground station client daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use groundlink_core::config::GroundlinkConfig;
use groundlink_core::wire::Endpoint;
use groundlink_services::{
    DisconnectReason, FrameRouter, Heartbeat, Link, LinkStores, ReceiveLoop, TelemetryPoller,
    TransferRoute,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = GroundlinkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = GroundlinkConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        GroundlinkConfig::default()
    });
    let config = Arc::new(config);
    tracing::info!(
        server = %config.network.server_addr,
        port = config.network.server_port,
        "groundlinkd starting"
    );

    // Shared state
    let link = Link::new();
    let stores = LinkStores::new(config.link.telemetry_capacity);
    let transfers = TransferRoute::new();
    let poller = TelemetryPoller::new(
        link.clone(),
        stores.clone(),
        config.link.command_endpoint,
        config.link.telemetry_poll_timeout(),
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let receive_task = tokio::spawn(
        ReceiveLoop::new(
            link.clone(),
            FrameRouter::new(link.clone(), stores.clone(), transfers.clone()),
            config.link.recv_timeout(),
            config.link.idle_interval(),
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let heartbeat_task = tokio::spawn(
        Heartbeat::new(
            link.clone(),
            config.link.heartbeat_interval(),
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let link_printer = {
        let link = link.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let state = link.state();
                let online: Vec<&str> = Endpoint::ALL
                    .iter()
                    .filter(|e| state.netstat.is_online(**e))
                    .map(|e| e.name())
                    .collect();
                tracing::info!(
                    phase = state.phase.as_str(),
                    generation = state.generation,
                    frames_sent = state.frames_sent,
                    frames_received = state.frames_received,
                    online = ?online,
                    "link snapshot"
                );
            }
        })
    };

    // Control API
    let api_port = config.network.api_port;
    let _api_server = {
        let state = groundlink_api::ApiState {
            link: link.clone(),
            stores: stores.clone(),
            transfers: transfers.clone(),
            poller,
            config: config.clone(),
            shutdown_tx: shutdown_tx.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = groundlink_api::serve(state, api_port).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    if config.network.auto_connect {
        let link = link.clone();
        let config = config.clone();
        tokio::spawn(async move {
            let network = &config.network;
            if let Err(e) = link
                .connect(
                    &network.server_addr,
                    network.server_port,
                    network.connect_timeout(),
                )
                .await
            {
                tracing::warn!(error = %e, "auto-connect failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()   => tracing::info!("shutting down"),
        r = receive_task         => tracing::error!("receive loop exited: {:?}", r),
        r = heartbeat_task       => tracing::error!("heartbeat exited: {:?}", r),
        r = link_printer         => tracing::error!("link printer exited: {:?}", r),
    }

    link.disconnect(DisconnectReason::User).await;
    Ok(())
}
