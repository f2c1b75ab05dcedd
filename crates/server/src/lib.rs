//! Switchboard server library.
//!
//! Provides a reusable serve function to run switchboard either from the binary, or from tests.

#![deny(missing_docs)]

mod logger;
mod prompt;

use std::{net::SocketAddr, sync::Arc};

use anyhow::anyhow;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::Config;
use realtime::{ClientKind, MiddleTier, ToolRegistry};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Configuration for serving switchboard.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized switchboard TOML configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown
    pub shutdown_signal: CancellationToken,
    /// Log filter string (e.g., "info" or "server=debug,realtime=debug")
    pub log_filter: String,
    /// The version string to log on startup
    pub version: String,
    /// Optional oneshot sender to send back the bound address (useful if port 0 was specified)
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Starts and runs the switchboard server with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    logger::init(&log_filter);

    // Log the version as the first message after logger initialization
    log::info!("Switchboard {version}");

    config.validate()?;

    let instructions = prompt::resolve(&config.session).await;

    if instructions.is_none() {
        log::warn!("No system prompt configured - the upstream default instructions apply");
    }

    let mut registry = ToolRegistry::new();

    if let Some(retrieval) = &config.retrieval {
        retrieval::register(&mut registry, retrieval);
    }

    if registry.is_empty() {
        log::warn!("No knowledge-base tools registered - configure [retrieval] to enable them");
    }

    let middle_tier = Arc::new(
        MiddleTier::new(&config, instructions, registry)
            .await
            .map_err(|err| anyhow!("Failed to initialize the middle tier: {err}"))?,
    );

    let mut app = Router::new()
        .route("/realtime", get(realtime_browser))
        .route("/realtime-acs", get(realtime_telephony))
        .route("/update-voice", post(update_voice))
        .with_state(middle_tier);

    if config.server.health.enabled {
        app = app.route(&config.server.health.path, get(health));
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    if let Some(sender) = bound_addr_sender {
        sender
            .send(listener.local_addr()?)
            .map_err(|_| anyhow!("Failed to send back bound address."))?;
    }

    log::info!("Browser realtime endpoint: ws://{listen_address}/realtime");
    log::info!("Telephony realtime endpoint: ws://{listen_address}/realtime-acs");

    // Run with graceful shutdown
    tokio::select! {
        result = axum::serve(listener, app) => {
            result.map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("Received shutdown signal, shutting down gracefully...");
        }
    }

    Ok(())
}

/// Upgrades a browser client; upstream events pass through apart from the
/// middle-tier rewrites.
async fn realtime_browser(
    State(middle_tier): State<Arc<MiddleTier>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let request_id = headers.get("x-ms-client-request-id").cloned();

    ws.on_upgrade(move |socket| middle_tier.serve(socket, ClientKind::Browser, request_id))
}

/// Upgrades a telephony media stream; frames are translated between the
/// telephony dialect and the upstream dialect.
async fn realtime_telephony(
    State(middle_tier): State<Arc<MiddleTier>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let request_id = headers.get("x-ms-client-request-id").cloned();

    ws.on_upgrade(move |socket| middle_tier.serve(socket, ClientKind::Telephony, request_id))
}

#[derive(Debug, Deserialize)]
struct UpdateVoice {
    voice: String,
}

/// Sets the voice used by sessions accepted after this call. Malformed
/// bodies are rejected with 400.
async fn update_voice(State(middle_tier): State<Arc<MiddleTier>>, body: Bytes) -> Response {
    let body: UpdateVoice = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            let error = Json(serde_json::json!({ "error": format!("malformed voice update: {err}") }));

            return (StatusCode::BAD_REQUEST, error).into_response();
        }
    };

    middle_tier.set_voice(body.voice);

    Json(serde_json::json!({ "status": "ok" })).into_response()
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}
