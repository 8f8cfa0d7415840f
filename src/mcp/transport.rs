//! HTTP + SSE transport for the MCP server.
//!
//! Two logical endpoints plus a health probe:
//!
//! - `POST /mcp` — one JSON-RPC request in, one envelope out
//! - `GET /sse` — long-lived Server-Sent-Events push stream
//! - `GET /health` — liveness probe, no side effects
//!
//! The transport owns the registry of live SSE clients. Each connection
//! gets an opaque id, an immediate `connected` event, and a structured
//! keepalive task that pushes `ping` events until the client is gone.
//! Every response carries permissive CORS headers, and a catch-panic layer
//! guarantees that an unexpected fault still produces a structured error
//! body rather than a stack trace on the wire.
//!
//! # Status codes
//!
//! 200 for protocol success, 500 for every protocol-level error (the error
//! kind travels only in the body's `error.code`), 400 only for a body that
//! is not parseable JSON at all.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::mcp::protocol::{
    self, DecodeError, ErrorCode, JsonRpcError, JsonRpcResponse, ProtocolError, RequestId,
};
use crate::mcp::session::Session;

/// Per-client channel capacity. A slow client that falls this far behind
/// starts losing best-effort events rather than blocking the sender.
const CLIENT_BUFFER: usize = 64;

/// Timing knobs for the SSE side of the transport.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Period between keepalive `ping` events per client.
    pub keepalive: Duration,
    /// Idle threshold after which the sweep evicts a client.
    pub idle_timeout: Duration,
    /// Period of the idle sweep.
    pub cleanup_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// One live SSE client.
struct SseClientEntry {
    /// Write handle into the client's event channel.
    sender: mpsc::Sender<Event>,
    /// Last explicit send/broadcast towards this client. Keepalive pings
    /// do not refresh this, so the idle sweep still works.
    last_activity: Instant,
}

/// Registry of live SSE clients, keyed by opaque id.
///
/// Mutated from the accept handler, the disconnect guard, keepalive tasks
/// and the idle sweep; the `RwLock` keeps insert/remove/iterate from
/// racing. Removal is idempotent.
#[derive(Default)]
pub struct SseRegistry {
    clients: RwLock<HashMap<String, SseClientEntry>>,
}

impl SseRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new client and returns its id and event receiver.
    ///
    /// The `connected` event is queued before the receiver is handed out,
    /// so it is always the first frame the client sees.
    pub async fn register(&self) -> (String, mpsc::Receiver<Event>) {
        let id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::channel(CLIENT_BUFFER);

        let payload = json!({
            "clientId": id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        // Capacity is fresh; this cannot fail.
        let _ = sender.try_send(sse_event("connected", &payload));

        let mut clients = self.clients.write().await;
        clients.insert(
            id.clone(),
            SseClientEntry {
                sender,
                last_activity: Instant::now(),
            },
        );
        tracing::info!(client_id = %id, clients = clients.len(), "SSE client registered");

        (id, receiver)
    }

    /// Sends an event to a single client.
    ///
    /// Returns whether the client was found. A send onto a closed channel
    /// deregisters the client as a side effect.
    pub async fn send(&self, client_id: &str, event: &str, data: &Value) -> bool {
        let sender = {
            let mut clients = self.clients.write().await;
            match clients.get_mut(client_id) {
                Some(entry) => {
                    entry.last_activity = Instant::now();
                    entry.sender.clone()
                }
                None => return false,
            }
        };

        match sender.try_send(sse_event(event, data)) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.remove(client_id).await;
                false
            }
        }
    }

    /// Broadcasts an event to every registered client, best-effort.
    ///
    /// The payload is serialised once; every client receives the same
    /// frame. Delivery is attempted on a snapshot of the registry, so a
    /// client disconnecting mid-broadcast may or may not receive it.
    /// Returns the number of clients the frame was queued for.
    pub async fn broadcast(&self, event: &str, data: &Value) -> usize {
        let targets: Vec<(String, mpsc::Sender<Event>)> = {
            let mut clients = self.clients.write().await;
            let now = Instant::now();
            clients
                .iter_mut()
                .map(|(id, entry)| {
                    entry.last_activity = now;
                    (id.clone(), entry.sender.clone())
                })
                .collect()
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sender) in targets {
            match sender.try_send(sse_event(event, data)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(id),
            }
        }
        for id in dead {
            self.remove(&id).await;
        }

        delivered
    }

    /// Pushes a keepalive `ping` to one client without refreshing its
    /// activity timestamp.
    ///
    /// Returns `false` when the client is no longer registered or its
    /// connection has closed; the caller's timer stops on `false`.
    pub async fn keepalive(&self, client_id: &str) -> bool {
        let sender = {
            let clients = self.clients.read().await;
            match clients.get(client_id) {
                Some(entry) => entry.sender.clone(),
                None => return false,
            }
        };

        let payload = json!({ "timestamp": chrono::Utc::now().to_rfc3339() });
        match sender.try_send(sse_event("ping", &payload)) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.remove(client_id).await;
                false
            }
        }
    }

    /// Deregisters a client. Idempotent; dropping the stored sender closes
    /// the client's stream if it is still open.
    pub async fn remove(&self, client_id: &str) {
        let mut clients = self.clients.write().await;
        if clients.remove(client_id).is_some() {
            tracing::info!(client_id = %client_id, clients = clients.len(), "SSE client removed");
        }
    }

    /// Evicts every client idle for longer than `max_idle`, force-closing
    /// its connection. Returns the number of evicted clients.
    pub async fn cleanup(&self, max_idle: Duration) -> usize {
        let mut clients = self.clients.write().await;
        let before = clients.len();
        clients.retain(|id, entry| {
            let keep = entry.last_activity.elapsed() <= max_idle;
            if !keep {
                tracing::info!(client_id = %id, "Evicting idle SSE client");
            }
            keep
        });
        before - clients.len()
    }

    /// Number of currently registered clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

/// Builds a wire frame: `event: <name>` line plus a `data:` line with the
/// JSON payload, blank-line terminated by the SSE encoder.
fn sse_event(name: &str, data: &Value) -> Event {
    Event::default().event(name).data(data.to_string())
}

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    /// The single protocol session.
    pub session: Arc<Session>,
    /// Live SSE client registry.
    pub sse: Arc<SseRegistry>,
    /// SSE timing configuration.
    pub config: TransportConfig,
}

impl AppState {
    /// Creates transport state around a session.
    #[must_use]
    pub fn new(session: Arc<Session>, config: TransportConfig) -> Self {
        Self {
            session,
            sse: Arc::new(SseRegistry::new()),
            config,
        }
    }
}

/// Builds the HTTP router: the two protocol endpoints, the health probe,
/// a structured 404 fallback, and the CORS/trace/catch-panic layers.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/mcp", post(mcp_post))
        .route("/sse", get(sse_get))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors)
        .with_state(state)
}

/// POST /mcp — the request/response endpoint.
///
/// Exactly one response body per request. Every code path ends in either
/// a success envelope or a fully-formed error envelope.
async fn mcp_post(State(state): State<AppState>, body: String) -> Response {
    // Transport-level parse: a body that is not JSON at all is a plain
    // client error, outside the protocol taxonomy.
    let value: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Rejecting unparseable request body");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Invalid JSON body: {e}") })),
            )
                .into_response();
        }
    };

    // Best-effort id before envelope validation, so error responses can
    // still echo it.
    let recovered_id = protocol::recover_id(&value);

    let request = match protocol::parse_value(value) {
        Ok(request) => request,
        Err(DecodeError::Envelope { detail } | DecodeError::Malformed { detail }) => {
            return error_envelope(recovered_id, ProtocolError::new(ErrorCode::ParseError, detail));
        }
    };

    tracing::debug!(method = %request.method, id = %request.id, "Dispatching request");

    match state.session.dispatch(&request).await {
        Ok(result) => (
            StatusCode::OK,
            Json(JsonRpcResponse::success(request.id, result)),
        )
            .into_response(),
        Err(err) => error_envelope(Some(request.id), err),
    }
}

/// Wraps a protocol error in the single fixed non-2xx transport status.
fn error_envelope(id: Option<RequestId>, err: ProtocolError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(JsonRpcError::new(id, err)),
    )
        .into_response()
}

/// Deregisters its client when the SSE response body is dropped, which is
/// the connection-close signal.
struct ConnectionGuard {
    id: String,
    registry: Arc<SseRegistry>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let registry = Arc::clone(&self.registry);
        let id = std::mem::take(&mut self.id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.remove(&id).await;
            });
        }
    }
}

/// GET /sse — the streaming endpoint.
async fn sse_get(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, receiver) = state.sse.register().await;

    spawn_keepalive(Arc::clone(&state.sse), id.clone(), state.config.keepalive);

    let guard = ConnectionGuard {
        id,
        registry: Arc::clone(&state.sse),
    };
    let stream = ReceiverStream::new(receiver).map(move |event| {
        let _held = &guard;
        Ok(event)
    });

    Sse::new(stream)
}

/// Spawns the per-connection keepalive task.
///
/// The task owns its own lifetime: it stops as soon as the client is no
/// longer registered, so deregistration cancels the timer and nothing
/// leaks.
fn spawn_keepalive(registry: Arc<SseRegistry>, client_id: String, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick of an interval fires immediately; skip it so the
        // first ping lands one full period after connect.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !registry.keepalive(&client_id).await {
                tracing::debug!(client_id = %client_id, "Keepalive stopped");
                break;
            }
        }
    });
}

/// GET /health — liveness probe.
async fn health(State(state): State<AppState>) -> Json<Value> {
    let info = state.session.server_info();
    Json(json!({
        "status": "healthy",
        "server": info.name,
        "version": info.version,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Fallback for unknown paths.
async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Not found", "path": uri.path() })),
    )
        .into_response()
}

/// Converts a handler panic into a structured error body. The panic
/// message goes into `error.data`, never into the message itself.
#[allow(clippy::needless_pass_by_value)] // signature fixed by CatchPanicLayer
fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(detail = %detail, "Handler panicked");

    let envelope = JsonRpcError::new(
        None,
        ProtocolError::internal("Internal error").with_data(json!({ "detail": detail })),
    );
    (StatusCode::INTERNAL_SERVER_ERROR, Json(envelope)).into_response()
}

/// The HTTP MCP server: a router plus lifecycle management.
pub struct McpServer {
    state: AppState,
}

impl McpServer {
    /// Creates a server around a session and transport configuration.
    #[must_use]
    pub fn new(session: Arc<Session>, config: TransportConfig) -> Self {
        Self {
            state: AppState::new(session, config),
        }
    }

    /// The transport state, for components that push SSE events.
    #[must_use]
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Builds the router for this server.
    #[must_use]
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Binds `addr` and serves until a shutdown signal arrives.
    ///
    /// Spawns the idle sweep alongside the listener; the sweep runs
    /// concurrently with client registration and is stopped when the
    /// server exits.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the listener or signal registration
    /// fails, or if the server loop fails.
    pub async fn serve(self, addr: SocketAddr) -> io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "Listening");

        let sweep = {
            let registry = Arc::clone(&self.state.sse);
            let config = self.state.config;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(config.cleanup_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let evicted = registry.cleanup(config.idle_timeout).await;
                    if evicted > 0 {
                        tracing::info!(evicted, "Idle sweep evicted SSE clients");
                    }
                }
            })
        };

        let shutdown = shutdown_signal()?;
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        sweep.abort();
        result
    }
}

/// Resolves when a termination signal arrives.
#[cfg(unix)]
fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
        }
    })
}

/// Resolves when Ctrl+C arrives.
#[cfg(windows)]
fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    Ok(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, shutting down");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain_one(receiver: &mut mpsc::Receiver<Event>) -> Event {
        receiver.recv().await.expect("event expected")
    }

    #[tokio::test]
    async fn register_queues_connected_event_first() {
        let registry = SseRegistry::new();
        let (id, mut rx) = registry.register().await;

        let event = drain_one(&mut rx).await;
        let rendered = format!("{event:?}");
        assert!(rendered.contains("connected"));
        assert!(rendered.contains(&id));
        assert_eq!(registry.client_count().await, 1);
    }

    #[tokio::test]
    async fn send_reports_unknown_client() {
        let registry = SseRegistry::new();
        assert!(!registry.send("nope", "update", &json!({})).await);
    }

    #[tokio::test]
    async fn send_reaches_registered_client() {
        let registry = SseRegistry::new();
        let (id, mut rx) = registry.register().await;
        drain_one(&mut rx).await; // connected

        assert!(registry.send(&id, "order", &json!({"orderId": 5})).await);
        let event = drain_one(&mut rx).await;
        assert!(format!("{event:?}").contains("orderId"));
    }

    #[tokio::test]
    async fn send_to_closed_connection_deregisters() {
        let registry = SseRegistry::new();
        let (id, rx) = registry.register().await;
        drop(rx); // simulate disconnect

        assert!(!registry.send(&id, "update", &json!({})).await);
        assert_eq!(registry.client_count().await, 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_all_clients() {
        let registry = SseRegistry::new();
        let (_, mut rx_a) = registry.register().await;
        let (_, mut rx_b) = registry.register().await;
        drain_one(&mut rx_a).await;
        drain_one(&mut rx_b).await;

        let delivered = registry.broadcast("monitoring", &json!({"alert": 1})).await;
        assert_eq!(delivered, 2);
        assert!(format!("{:?}", drain_one(&mut rx_a).await).contains("alert"));
        assert!(format!("{:?}", drain_one(&mut rx_b).await).contains("alert"));
    }

    #[tokio::test]
    async fn broadcast_skips_and_prunes_dead_clients() {
        let registry = SseRegistry::new();
        let (_, mut rx_live) = registry.register().await;
        let (_, rx_dead) = registry.register().await;
        drain_one(&mut rx_live).await;
        drop(rx_dead);

        let delivered = registry.broadcast("update", &json!({})).await;
        assert_eq!(delivered, 1);
        assert_eq!(registry.client_count().await, 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = SseRegistry::new();
        let (id, _rx) = registry.register().await;
        registry.remove(&id).await;
        registry.remove(&id).await;
        assert_eq!(registry.client_count().await, 0);
    }

    #[tokio::test]
    async fn keepalive_stops_for_unregistered_client() {
        let registry = SseRegistry::new();
        assert!(!registry.keepalive("gone").await);
    }

    #[tokio::test]
    async fn keepalive_pings_registered_client() {
        let registry = SseRegistry::new();
        let (id, mut rx) = registry.register().await;
        drain_one(&mut rx).await;

        assert!(registry.keepalive(&id).await);
        let event = drain_one(&mut rx).await;
        assert!(format!("{event:?}").contains("ping"));
    }

    #[tokio::test]
    async fn cleanup_evicts_idle_clients_only() {
        let registry = SseRegistry::new();
        let (stale_id, _stale_rx) = registry.register().await;
        let (fresh_id, _fresh_rx) = registry.register().await;

        // Backdate the stale client past the idle threshold.
        {
            let mut clients = registry.clients.write().await;
            clients.get_mut(&stale_id).unwrap().last_activity =
                Instant::now() - Duration::from_secs(3600);
        }

        let evicted = registry.cleanup(Duration::from_secs(1800)).await;
        assert_eq!(evicted, 1);

        let clients = registry.clients.read().await;
        assert!(!clients.contains_key(&stale_id));
        assert!(clients.contains_key(&fresh_id));
    }

    #[tokio::test]
    async fn keepalive_does_not_refresh_activity() {
        let registry = SseRegistry::new();
        let (id, _rx) = registry.register().await;

        {
            let mut clients = registry.clients.write().await;
            clients.get_mut(&id).unwrap().last_activity =
                Instant::now() - Duration::from_secs(3600);
        }

        assert!(registry.keepalive(&id).await);
        assert_eq!(registry.cleanup(Duration::from_secs(1800)).await, 1);
    }

    #[tokio::test]
    async fn explicit_send_refreshes_activity() {
        let registry = SseRegistry::new();
        let (id, _rx) = registry.register().await;

        {
            let mut clients = registry.clients.write().await;
            clients.get_mut(&id).unwrap().last_activity =
                Instant::now() - Duration::from_secs(3600);
        }

        assert!(registry.send(&id, "update", &json!({})).await);
        assert_eq!(registry.cleanup(Duration::from_secs(1800)).await, 0);
    }

    #[test]
    fn transport_config_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.keepalive, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Duration::from_secs(1800));
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
    }
}
