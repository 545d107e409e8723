//! HTTP routes and server startup.

use crate::config::Config;
use crate::metrics;
use crate::session;
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use courier_core::ChannelRegistry;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The channel registry.
    pub registry: ChannelRegistry,
    /// Server configuration.
    pub config: Config,
    /// Currently open WebSocket sessions.
    pub active_connections: AtomicUsize,
    next_connection: AtomicU64,
    shutdown: watch::Sender<bool>,
    // Never polled, so clones start from the initial value and see a
    // shutdown that happened before they were made.
    shutdown_rx: watch::Receiver<bool>,
}

impl AppState {
    /// Create new app state with an empty registry.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        Self {
            registry: ChannelRegistry::new(),
            config,
            active_connections: AtomicUsize::new(0),
            next_connection: AtomicU64::new(1),
            shutdown,
            shutdown_rx,
        }
    }

    /// Ask every open session to close.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Watch for [`AppState::shutdown`].
    ///
    /// `changed()` on the returned receiver resolves once shutdown has been
    /// requested, including when that happened before this call.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Reserve a session slot, or `None` if `max_connections` are open.
    ///
    /// The slot is released when the returned guard is dropped.
    pub fn try_reserve_connection(self: &Arc<Self>) -> Option<ConnectionSlot> {
        let max = self.config.server.max_connections;
        self.active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < max).then_some(open + 1)
            })
            .ok()?;
        Some(ConnectionSlot {
            state: Arc::clone(self),
        })
    }

    /// Allocate an identifier for a new connection.
    pub fn next_connection_id(&self) -> String {
        format!("conn_{}", self.next_connection.fetch_add(1, Ordering::Relaxed))
    }
}

/// One reserved entry in `AppState::active_connections`.
pub struct ConnectionSlot {
    state: Arc<AppState>,
}

impl ConnectionSlot {
    /// Get the state the slot was reserved from.
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.server.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve on an already bound listener until the server fails.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    serve_with_shutdown(listener, state, std::future::pending()).await
}

/// Serve until `signal` resolves, then stop accepting and close every session.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sessions = Arc::clone(&state);
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            signal.await;
            info!("Shutdown signal received, closing sessions");
            sessions.shutdown();
        })
        .await
        .context("Server error")
}

/// Bind the configured address and run the server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::install(config.metrics.port) {
            error!("Failed to start metrics exporter: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Courier listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.server.websocket_path
    );

    serve_with_shutdown(listener, Arc::new(AppState::new(config)), ctrl_c_or_term()).await?;
    info!("Courier stopped");
    Ok(())
}

/// Resolve on Ctrl+C, or SIGTERM on unix.
async fn ctrl_c_or_term() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.registry.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "channels": stats.channel_count,
        "pending_messages": stats.pending_messages,
        "connections": state.active_connections.load(Ordering::Relaxed),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = state.try_reserve_connection() else {
        warn!(
            max_connections = state.config.server.max_connections,
            "Rejecting connection: limit reached"
        );
        metrics::error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    ws.on_upgrade(move |socket| session::handle_websocket(socket, slot))
}
