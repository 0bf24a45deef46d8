//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, pipeline status reporting, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (ready until shutdown begins)
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::application::services::trading::TradingFacade;
use crate::infrastructure::broadcast::ConnectionStats;
use crate::infrastructure::http::{ServerError, serve};
use crate::infrastructure::metrics::get_metrics_handle;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Ticker pricing status.
    pub tickers: TickerStatus,
    /// Stream client status.
    pub clients: ClientStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every monitored ticker has a price.
    Healthy,
    /// Some tickers are still waiting for a first price.
    Degraded,
    /// The service is shutting down.
    Unhealthy,
}

/// Ticker pricing counts.
#[derive(Debug, Clone, Serialize)]
pub struct TickerStatus {
    /// Monitored tickers.
    pub active: usize,
    /// Tickers with an observed price.
    pub priced: usize,
    /// Tickers still pending a first price.
    pub pending: usize,
}

/// Stream client counts.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    /// Active stream clients.
    pub active: usize,
    /// Connection history counters.
    pub connections: ConnectionStats,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    facade: Arc<TradingFacade>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, facade: Arc<TradingFacade>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            facade,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), ServerError> {
        serve("Health", self.port, router(self.state), self.cancel).await
    }
}

/// Health routes bound to `state`.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(|| async { "OK" }))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health(State(state): State<Arc<HealthServerState>>) -> Response {
    let report = state.report();
    let code = if report.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(report)).into_response()
}

async fn readiness(State(state): State<Arc<HealthServerState>>) -> (StatusCode, &'static str) {
    if state.facade.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn prometheus() -> Response {
    let Some(handle) = get_metrics_handle() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response();
    };
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], handle.render()).into_response()
}

impl HealthServerState {
    fn report(&self) -> HealthResponse {
        let facade = &self.facade;
        let tickers = TickerStatus::new(facade.ticker_count(), facade.pending_tickers().len());

        HealthResponse {
            status: HealthStatus::classify(facade.is_shutting_down(), &tickers),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            tickers,
            clients: ClientStatus {
                active: facade.clients().active_client_count(),
                connections: facade.connection_stats(),
            },
        }
    }
}

impl TickerStatus {
    const fn new(active: usize, pending: usize) -> Self {
        Self {
            active,
            priced: active.saturating_sub(pending),
            pending,
        }
    }
}

impl HealthStatus {
    const fn classify(shutting_down: bool, tickers: &TickerStatus) -> Self {
        if shutting_down {
            Self::Unhealthy
        } else if tickers.pending > 0 {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
