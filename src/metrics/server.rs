//! Prometheus exporter for a running engine.
//!
//! `/metrics` serves the registry in text format. `/health` answers 503
//! while the last published snapshot shows callers blocked on the entropy
//! floor, so a health check notices a starved engine before its callers time out.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

use crate::metrics::{MetricsRegistry, MetricsSnapshot};

/// Exporter failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("metrics exporter stopped: {0}")]
    Serve(#[source] std::io::Error),
}

/// Where the exporter listens.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Listen address; all interfaces by default.
    pub bind_addr: SocketAddr,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self::with_port(9090)
    }
}

impl MetricsServerConfig {
    /// All interfaces on `port` (the `[output] metrics_port` setting).
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
        }
    }
}

/// Registry plus the last snapshot pushed by the sampling loop.
pub struct MetricsState {
    registry: MetricsRegistry,
    last: MetricsSnapshot,
}

impl MetricsState {
    /// Publishes a snapshot to the registry and keeps it for `/health`.
    pub fn update(&mut self, snapshot: &MetricsSnapshot) {
        self.registry.update(snapshot);
        self.last = snapshot.clone();
    }

    /// Whether the last snapshot shows callers waiting on the floor.
    pub fn is_starved(&self) -> bool {
        self.last.waiting_callers > 0
    }
}

type Shared = Arc<RwLock<MetricsState>>;

/// HTTP exporter over a [`MetricsRegistry`].
pub struct MetricsServer {
    config: MetricsServerConfig,
    state: Shared,
}

impl MetricsServer {
    /// Creates an exporter that has not started listening yet.
    pub fn new(config: MetricsServerConfig, registry: MetricsRegistry) -> Self {
        let state = MetricsState {
            registry,
            last: MetricsSnapshot::default(),
        };
        Self {
            config,
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Handle the sampling loop writes snapshots through.
    pub fn state(&self) -> Shared {
        Arc::clone(&self.state)
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(render_metrics))
            .route("/health", get(report_health))
            .layer(CorsLayer::permissive())
            .with_state(self.state())
    }

    /// Serves until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves, then drains open connections.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.config.bind_addr;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        tracing::info!(%addr, "Metrics exporter listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServerError::Serve)?;
        tracing::info!(%addr, "Metrics exporter stopped");
        Ok(())
    }
}

async fn render_metrics(State(state): State<Shared>) -> impl IntoResponse {
    match state.read().await.registry.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics encoding failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

async fn report_health(State(state): State<Shared>) -> impl IntoResponse {
    let state = state.read().await;
    if state.is_starved() {
        let body = format!("{} callers waiting for reseed", state.last.waiting_callers);
        (StatusCode::SERVICE_UNAVAILABLE, body)
    } else {
        (StatusCode::OK, "OK".to_string())
    }
}
