//! Transport boundary: WebSocket connections plus the HTTP probe endpoints.
//!
//! One listener serves:
//! - `GET /ws` - participant connections
//! - `GET /health`, `GET /ready` - probes
//! - `GET /metrics` - Prometheus text, when a recorder handle is supplied

mod websocket;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::closure::ClosureHub;
use crate::errors::ServerError;
use crate::lifecycle::LifecycleObserver;
use crate::observability::{health_router, HealthState};
use crate::sync::lock;
use crate::waiting_room::WaitingRoom;

use websocket::{ws_handler, ConnectionState};

/// Accepts participant connections and reports their closure.
pub struct WebSocketTransport {
    bind_address: SocketAddr,
    connections: Arc<ConnectionState>,
    health: Arc<HealthState>,
    metrics: Option<PrometheusHandle>,
    shutdown_timeout: Duration,
    local_addr: Mutex<Option<SocketAddr>>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    #[must_use]
    pub fn new(
        bind_address: SocketAddr,
        max_connections: usize,
        closure_hub: Arc<ClosureHub>,
        waiting_room: Arc<WaitingRoom>,
        shutdown_timeout: Duration,
    ) -> Arc<Self> {
        Self::with_metrics(
            bind_address,
            max_connections,
            closure_hub,
            waiting_room,
            shutdown_timeout,
            None,
        )
    }

    /// Like [`WebSocketTransport::new`], also serving `/metrics` from `metrics`.
    #[must_use]
    pub fn with_metrics(
        bind_address: SocketAddr,
        max_connections: usize,
        closure_hub: Arc<ClosureHub>,
        waiting_room: Arc<WaitingRoom>,
        shutdown_timeout: Duration,
        metrics: Option<PrometheusHandle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bind_address,
            connections: Arc::new(ConnectionState::new(
                closure_hub,
                waiting_room,
                max_connections,
            )),
            health: Arc::new(HealthState::new()),
            metrics,
            shutdown_timeout,
            local_addr: Mutex::new(None),
            server: Mutex::new(None),
        })
    }

    /// Address actually bound, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    #[must_use]
    pub fn health(&self) -> Arc<HealthState> {
        Arc::clone(&self.health)
    }

    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.connections.active_connections()
    }

    fn router(&self) -> Router {
        let mut app = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(Arc::clone(&self.connections))
            .merge(health_router(Arc::clone(&self.health)));

        if let Some(handle) = self.metrics.clone() {
            app = app.route(
                "/metrics",
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            );
        }

        app.layer(TraceLayer::new_for_http())
    }
}

#[async_trait]
impl LifecycleObserver for WebSocketTransport {
    fn name(&self) -> &'static str {
        "transport"
    }

    async fn start(&self) -> Result<(), ServerError> {
        // Bind before spawning so a bad address fails startup.
        let listener = TcpListener::bind(self.bind_address)
            .await
            .map_err(|e| ServerError::Bind {
                address: self.bind_address.to_string(),
                reason: e.to_string(),
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("Failed to read local address: {e}")))?;
        *lock(&self.local_addr) = Some(local_addr);

        let app = self.router();
        let cancel = self.connections.cancel.clone();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                cancel.cancelled().await;
                info!(target: "table.transport", "HTTP server shutting down");
            });
            if let Err(e) = server.await {
                let e = ServerError::Transport(e.to_string());
                error!(target: "table.transport", error = %e, "HTTP server failed");
            }
        });
        *lock(&self.server) = Some(handle);

        self.health.set_ready();
        info!(target: "table.transport", addr = %local_addr, "Listening");
        Ok(())
    }

    async fn end(&self) {
        self.health.set_not_ready();
        self.connections.cancel.cancel();

        // Every open connection reports its closure before this returns.
        let tracker = &self.connections.tracker;
        tracker.close();
        if tokio::time::timeout(self.shutdown_timeout, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                target: "table.transport",
                open = self.connections.active_connections(),
                "Connections did not close in time"
            );
        }

        let server = lock(&self.server).take();
        if let Some(server) = server {
            let abort = server.abort_handle();
            if tokio::time::timeout(self.shutdown_timeout, server).await.is_err() {
                warn!(target: "table.transport", "HTTP server did not stop in time, aborting");
                abort.abort();
            }
        }

        info!(target: "table.transport", "Transport stopped");
    }
}
