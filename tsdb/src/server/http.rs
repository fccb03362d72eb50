//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::signal;

use super::config::ServerConfig;
use super::handlers::{
    handle_events, handle_healthy, handle_metrics, handle_series, handle_stats, AppState,
};
use super::metrics::{HttpLabels, HttpLabelsWithStatus, HttpMethod, Metrics};
use crate::Tsdb;

/// HTTP server for the TimeSeriesDB query API.
pub struct TsdbServer {
    db: Arc<Tsdb>,
    config: ServerConfig,
}

impl TsdbServer {
    /// Create a new server.
    pub fn new(db: Arc<Tsdb>, config: ServerConfig) -> Self {
        Self { db, config }
    }

    /// Builds the router with all routes and middleware.
    pub fn router(db: Arc<Tsdb>, metrics: Arc<Metrics>) -> Router {
        let state = AppState { db, metrics };
        Router::new()
            .route("/series", get(handle_series))
            .route("/events", get(handle_events))
            .route("/stats", get(handle_stats))
            .route("/metrics", get(handle_metrics))
            .route("/-/healthy", get(handle_healthy))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                track_metrics,
            ))
            .with_state(state)
    }

    /// Run the HTTP server until SIGINT/SIGTERM.
    pub async fn run(self) {
        let metrics = Arc::new(Metrics::new());
        let app = Self::router(self.db, metrics);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        tracing::info!("Starting TimeSeriesDB HTTP server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .expect("failed to bind server port");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .expect("server error");

        tracing::info!("Server shut down gracefully");
    }
}

/// Records request count, latency and in-flight gauge per endpoint.
async fn track_metrics(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = HttpMethod::from(req.method());
    let endpoint = req.uri().path().to_string();
    let start = Instant::now();

    state.metrics.http_requests_in_flight.inc();
    let response = next.run(req).await;
    state.metrics.http_requests_in_flight.dec();

    state
        .metrics
        .http_request_duration_seconds
        .get_or_create(&HttpLabels {
            method: method.clone(),
            endpoint: endpoint.clone(),
        })
        .observe(start.elapsed().as_secs_f64());
    state
        .metrics
        .http_requests_total
        .get_or_create(&HttpLabelsWithStatus {
            method,
            endpoint,
            status: response.status().as_u16(),
        })
        .inc();

    response
}

/// Listen for SIGTERM (pod termination) and SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
