use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use poker_core::CardSource;
use poker_engine::{ManagerConfig, SessionManager};

use crate::client::{self, ClientId, ClientRegistry};
use crate::gateway::ProjectChannelGateway;
use crate::handlers::{self, HandlerState};
use crate::metrics::WS_CONNECTIONS_TOTAL;
use crate::rpc::{RpcRequest, RpcResponse};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    /// `0` binds an ephemeral port; the chosen one is on [`ServerHandle::port`].
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub client_registry: Arc<ClientRegistry>,
    pub metrics: Option<PrometheusHandle>,
    pub heartbeat_interval: Duration,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Wire the card source, gateway and session manager together and start
/// serving. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    cards: Arc<dyn CardSource>,
    manager_config: ManagerConfig,
    metrics: Option<PrometheusHandle>,
) -> Result<ServerHandle, std::io::Error> {
    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue));
    let gateway = Arc::new(ProjectChannelGateway::new(Arc::clone(&client_registry)));
    let manager = SessionManager::new(cards, gateway, manager_config);
    let handler_state = Arc::new(HandlerState::new(manager.clone(), Arc::clone(&client_registry)));

    let shutdown = CancellationToken::new();
    let cleanup = start_cleanup_task(
        Arc::clone(&handler_state),
        config.heartbeat_interval,
        shutdown.clone(),
    );

    let app_state = AppState {
        handler_state,
        client_registry,
        metrics,
        heartbeat_interval: config.heartbeat_interval,
    };

    let router = build_router(app_state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "planning poker server started");

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        manager,
        shutdown,
        server,
        _cleanup: cleanup,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    manager: SessionManager,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Stop accepting connections and wait for the listener to wind down.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.server.await;
        tracing::info!("planning poker server stopped");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serve one connection; release its seats when it goes away.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.client_registry.register();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    tracing::info!(client_id = %client_id, "websocket client connected");

    // Per-connection queue keeps one client's requests in order while
    // other clients proceed independently.
    let (msg_tx, msg_rx) = mpsc::channel::<(ClientId, String)>(64);
    let rpc = tokio::spawn(process_rpc_messages(
        msg_rx,
        Arc::clone(&state.handler_state),
        Arc::clone(&state.client_registry),
    ));

    client::handle_ws_connection(
        socket,
        client_id.clone(),
        rx,
        Arc::clone(&state.client_registry),
        msg_tx,
        state.heartbeat_interval,
    )
    .await;

    // The reader dropped its sender; let in-flight requests finish first.
    let _ = rpc.await;
    state.handler_state.release_client(&client_id).await;
    tracing::info!(client_id = %client_id, "websocket client disconnected");
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let resp = handlers::health(&state.handler_state, None);
    (StatusCode::OK, axum::Json(resp.result.unwrap_or_default()))
}

/// Prometheus text exposition.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}

/// Process incoming RPC messages from one WebSocket client.
async fn process_rpc_messages(
    mut rx: mpsc::Receiver<(ClientId, String)>,
    state: Arc<HandlerState>,
    registry: Arc<ClientRegistry>,
) {
    while let Some((client_id, raw_message)) = rx.recv().await {
        let request: RpcRequest = match serde_json::from_str(&raw_message) {
            Ok(req) => req,
            Err(_) => {
                let resp = RpcResponse::parse_error();
                if let Ok(json) = serde_json::to_string(&resp) {
                    let _ = registry.send_to(&client_id, json);
                }
                continue;
            }
        };

        let params = request.params.unwrap_or(serde_json::json!({}));
        let response =
            handlers::dispatch(&state, &client_id, &request.method, &params, request.id).await;
        if let Some(code) = response.error_code() {
            tracing::debug!(client_id = %client_id, method = %request.method, code, "rpc request failed");
        }

        if let Ok(json) = serde_json::to_string(&response) {
            let _ = registry.send_to(&client_id, json);
        }
    }
}

/// Periodically release clients that stopped answering pings.
fn start_cleanup_task(
    state: Arc<HandlerState>,
    heartbeat: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let timeout = client::client_timeout(heartbeat);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let dead = state.registry.dead_clients(timeout);
            for client_id in &dead {
                state.release_client(client_id).await;
            }
            if !dead.is_empty() {
                tracing::info!(removed = dead.len(), "dead client cleanup");
            }
        }
    })
}
