pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/connect", post(handlers::handle_connect))
        .route("/disconnect", post(handlers::handle_disconnect))
        .route(
            "/command",
            get(handlers::handle_command_output).post(handlers::handle_command),
        )
        .route("/ack", get(handlers::handle_ack))
        .route("/config", get(handlers::handle_config))
        .route("/telemetry", get(handlers::handle_telemetry))
        .route("/telemetry/poll", post(handlers::handle_telemetry_poll))
        .route(
            "/transfer",
            get(handlers::handle_transfer_status).post(handlers::handle_transfer),
        )
        .route("/daemon/shutdown", post(handlers::handle_shutdown))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    serve_on(listener, state).await
}

/// Serve on an already-bound listener.
pub async fn serve_on(listener: TcpListener, state: ApiState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}
