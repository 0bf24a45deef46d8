//! Ticker Stream Binary
//!
//! Starts the price monitor, the trading API and the health server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-stream
//! ```
//!
//! # Environment Variables
//!
//! - `TICKER_STREAM_ENV`: development | production (default: development)
//! - `PORT`: Trading API port (default: 8080)
//! - `HEALTH_PORT`: Health check and metrics port (default: 8082)
//! - `POLLING_INTERVAL_MS`: Monitor polling cadence (default: 2000)
//! - `MAX_ACTIVE_TICKERS`: Ceiling on monitored tickers (default: 100)
//! - `STREAM_INTERVAL_MS`: Stream cycle cadence (default: 2000)
//! - `PRICE_SOURCE`: simulated | http (default: simulated)
//! - `PRICE_SOURCE_URL`: URL template with `{ticker}` (required for http)
//! - `GRACEFUL_SHUTDOWN_TIMEOUT_MS`: Shutdown budget (default: 30000)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ticker_stream::infrastructure::{source, telemetry};
use ticker_stream::{
    ApiServer, HealthServer, HealthServerState, ServiceConfig, SourceSettings, TradingFacade,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Time allowed for servers to finish after cancellation.
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting ticker stream");

    let _metrics_handle = init_metrics().context("failed to initialize metrics")?;

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let price_source = source::from_settings(&config.source)?;
    let facade = TradingFacade::new(price_source, config.trading_settings());

    let server_token = CancellationToken::new();

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&facade),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        server_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let api_server = ApiServer::new(config.server.port, Arc::clone(&facade), server_token.clone());
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            tracing::error!(error = %e, "Trading API error");
        }
    });

    tracing::info!("Ticker stream ready");

    await_shutdown().await;

    tracing::info!(
        timeout_ms = u64::try_from(config.server.shutdown_timeout.as_millis()).unwrap_or(u64::MAX),
        "Graceful shutdown started"
    );

    match tokio::time::timeout(config.server.shutdown_timeout, facade.shutdown()).await {
        Ok(report) if report.is_clean() => {
            tracing::info!(stopped = report.stopped, "Monitors stopped");
        }
        Ok(report) => {
            for failure in &report.failures {
                tracing::warn!(error = %failure, "Session close failed during shutdown");
            }
        }
        Err(_) => tracing::warn!("Facade shutdown timed out"),
    }

    server_token.cancel();
    let drained = tokio::time::timeout(SERVER_DRAIN_TIMEOUT, async {
        let _ = tokio::join!(api_task, health_task);
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Servers did not stop within the drain timeout");
    }

    tracing::info!("Ticker stream stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        port = config.server.port,
        health_port = config.server.health_port,
        source = config.source.kind(),
        polling_interval_ms = u64::try_from(config.pipeline.polling_interval.as_millis())
            .unwrap_or(u64::MAX),
        max_active_tickers = config.pipeline.max_active_tickers,
        "Configuration loaded"
    );
    if let SourceSettings::Http(http) = &config.source {
        tracing::debug!(url_template = %http.url_template, pointer = %http.pointer, "HTTP source");
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
