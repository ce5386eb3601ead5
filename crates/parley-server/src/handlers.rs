//! Connection handlers for Parley server.
//!
//! Authentication happens upstream: the session layer forwards the caller's
//! identity in a trusted header, and the socket is served as that identity.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, Metered};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parley_core::{serve_connection, Hub, Identity, InMemoryGateway, SystemClock};
use parley_transport::websocket;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    /// Server configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(hub: Hub, config: Config) -> Self {
        Self {
            hub,
            config: Arc::new(config),
        }
    }
}

/// Build the HTTP routes.
pub fn app(state: AppState) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/presence", get(presence_handler))
        .route("/api/messages", get(messages_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let store = Arc::new(InMemoryGateway::new());
    for user in &config.users {
        let identity = Identity::new(user.identity.as_str())
            .with_context(|| format!("Invalid seed user identity: {:?}", user.identity))?;
        store.add_user(identity, user.nickname.clone());
    }

    let (hub, tasks) = Hub::start(config.hub_config(), store, Arc::new(SystemClock::new()));
    hub.seed_from_gateway()
        .await
        .context("Failed to load users from store")?;

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Parley server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let result = axum::serve(listener, app(AppState::new(hub, config)))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    tasks.shutdown();
    result.context("Server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.hub.connection_count().await,
    }))
}

/// Presence table snapshot for operators.
async fn presence_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.presence_snapshot().await)
}

/// Query string of a history request.
#[derive(Debug, Deserialize)]
struct HistoryQuery {
    with: String,
    #[serde(default)]
    offset: usize,
}

/// One page of the caller's conversation with `with`, oldest first.
async fn messages_handler(
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(viewer) = identity_from_headers(&headers, &state.config.auth.identity_header) else {
        metrics::record_error("unauthenticated");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let Ok(other) = Identity::new(query.with) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match state.hub.history(&viewer, &other, query.offset).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => {
            error!(viewer = %viewer, other = %other, error = %e, "Failed to load history");
            metrics::record_error("history");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn identity_from_headers(headers: &HeaderMap, header: &str) -> Option<Identity> {
    let value = headers.get(header)?.to_str().ok()?;
    Identity::new(value).ok()
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let Some(identity) = identity_from_headers(&headers, &state.config.auth.identity_header) else {
        warn!("Rejecting WebSocket upgrade without a valid identity");
        metrics::record_error("unauthenticated");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let hub = state.hub.clone();
    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, hub, identity))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, hub: Hub, identity: Identity) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    debug!(identity = %identity, "WebSocket connected");

    let (reader, writer) = websocket::split(socket);
    serve_connection(hub, identity.clone(), Metered::new(reader), Metered::new(writer)).await;

    debug!(identity = %identity, "WebSocket disconnected");
}
