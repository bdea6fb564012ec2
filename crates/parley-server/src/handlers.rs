//! Connection handlers for the parley server.
//!
//! This module handles the HTTP surface, the WebSocket lifecycle, and
//! the bridge between a socket and the router: inbound text frames are
//! decoded and dispatched, outbound events are drained from the
//! connection's delivery queue and written back.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use parley_core::{
    MessageLedger, Principal, PrincipalDirectory, RoomRegistry, Router as RelayRouter,
    RouterConfig, RouterError, TypingTracker,
};
use parley_protocol::{codec, ServerEvent};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Registered principals; also serves the HTTP auth endpoints.
    pub directory: Arc<PrincipalDirectory>,
    /// The connection router.
    pub router: Arc<RelayRouter>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state and seed the default rooms.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let directory = Arc::new(PrincipalDirectory::new());
        let rooms = Arc::new(RoomRegistry::new());
        let ledger = Arc::new(MessageLedger::new());
        let typing = Arc::new(TypingTracker::new());

        let router_config = RouterConfig {
            default_rooms: config.rooms.default.clone(),
            history_page_size: config.limits.history_page_size,
        };
        let router = Arc::new(RelayRouter::with_config(
            directory.clone(),
            rooms,
            ledger,
            typing,
            router_config,
        ));
        router.seed_default_rooms();

        Self {
            directory,
            router,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Periodic sweep for typing entries whose stop event never arrived
    let sweeper = state.router.clone();
    let ttl = config.typing_ttl();
    let mut interval = tokio::time::interval(config.typing_sweep_interval());
    tokio::spawn(async move {
        loop {
            interval.tick().await;
            sweeper.sweep_typing(ttl);
        }
    });

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("parley server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
    password: String,
    #[serde(default)]
    email: String,
}

/// Register a new principal.
async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    match state
        .directory
        .register(&req.username, &req.password, &req.email)
    {
        Ok(principal) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "user": principal.summary() })),
        )
            .into_response(),
        Err(e) => {
            let status = match e {
                RouterError::DuplicateIdentity(_) => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

/// Verify credentials and return the principal's profile.
async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Response {
    match state.directory.authenticate(&req.username, &req.password) {
        Some(principal) => Json(serde_json::json!({ "user": principal.summary() })).into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Invalid credentials" })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct WsAuthParams {
    username: String,
    secret: String,
}

/// WebSocket upgrade handler.
///
/// Credentials are checked before the upgrade completes; a failed check
/// rejects the handshake with 401.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsAuthParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(principal) = state.directory.authenticate(&params.username, &params.secret) else {
        warn!(username = %params.username, "Rejected WebSocket handshake");
        metrics::record_error("auth");
        return (StatusCode::UNAUTHORIZED, "Invalid credentials").into_response();
    };

    ws.on_upgrade(move |socket| handle_websocket(socket, state, principal))
}

/// Handle an authenticated WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, principal: Principal) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    // Delivery queue the router fans out into
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<ServerEvent>();

    let connection_id = match state.router.attach(&principal.id, event_tx) {
        Ok(id) => id,
        Err(e) => {
            error!(principal = %principal.id, error = %e, "Attach failed");
            return;
        }
    };

    debug!(connection = %connection_id, principal = %principal.id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let max_event_size = state.config.limits.max_event_size;

    loop {
        tokio::select! {
            biased;

            // Drain the delivery queue
            Some(event) = event_rx.recv() => {
                match codec::encode(&event) {
                    Ok(text) => {
                        metrics::record_event(text.len(), "outbound");
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(connection = %connection_id, error = %e, "Encode failed");
                        metrics::record_error("encode");
                    }
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let start = Instant::now();

                        if text.len() > max_event_size {
                            warn!(connection = %connection_id, size = text.len(), "Oversize event");
                            metrics::record_error("oversize");
                            if send_event(&mut sender, &ServerEvent::Error {
                                message: "Event too large".to_string(),
                            }).await.is_err() {
                                break;
                            }
                            continue;
                        }

                        metrics::record_event(text.len(), "inbound");
                        match codec::decode(&text) {
                            Ok(event) => state.router.dispatch(&connection_id, event),
                            Err(e) => {
                                warn!(connection = %connection_id, error = %e, "Decode failed");
                                metrics::record_error("decode");
                                if send_event(&mut sender, &ServerEvent::Error {
                                    message: format!("Malformed event: {e}"),
                                }).await.is_err() {
                                    break;
                                }
                            }
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!(connection = %connection_id, "Ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.router.detach(&connection_id);
    metrics::set_active_rooms(state.router.stats().indexed_room_count);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Encode and send one event to the WebSocket.
async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<()> {
    let text = codec::encode(event)?;
    metrics::record_event(text.len(), "outbound");
    sender.send(Message::Text(text)).await?;
    Ok(())
}
