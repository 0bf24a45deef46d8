//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Samples**: Price samples taken, by outcome, and their latency
//! - **Changes**: Detected price changes
//! - **Delivery**: Listener failures and per-client deliveries
//! - **Gauges**: Active tickers and connected stream clients
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns [`BuildError`] if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "ticker_stream_samples_total",
        "Total price samples taken, by outcome"
    );
    describe_counter!(
        "ticker_stream_price_changes_total",
        "Total detected price changes"
    );
    describe_counter!(
        "ticker_stream_listener_failures_total",
        "Total listener errors during price notification"
    );
    describe_counter!(
        "ticker_stream_deliveries_total",
        "Total stream client deliveries, by outcome"
    );

    describe_gauge!(
        "ticker_stream_active_tickers",
        "Number of tickers currently monitored"
    );
    describe_gauge!(
        "ticker_stream_clients",
        "Number of active stream clients"
    );

    describe_histogram!(
        "ticker_stream_sample_seconds",
        "Time to take one price sample, including retries"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for sample outcomes.
#[derive(Debug, Clone, Copy)]
pub enum SampleOutcome {
    /// A price was read.
    Success,
    /// All attempts failed.
    Failure,
}

impl SampleOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Metric labels for client delivery outcomes.
#[derive(Debug, Clone, Copy)]
pub enum DeliveryOutcome {
    /// Queued for the client.
    Delivered,
    /// Client buffer full; update skipped.
    Dropped,
    /// Client gone; marked inactive.
    Failed,
}

impl DeliveryOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Dropped => "dropped",
            Self::Failed => "failed",
        }
    }
}

/// Record one completed sample and how long it took.
pub fn record_sample(outcome: SampleOutcome, duration: Duration) {
    counter!(
        "ticker_stream_samples_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!("ticker_stream_sample_seconds").record(duration.as_secs_f64());
}

/// Record a detected price change.
pub fn record_price_change(ticker: &str) {
    counter!(
        "ticker_stream_price_changes_total",
        "ticker" => ticker.to_string()
    )
    .increment(1);
}

/// Record listener errors from one notification.
pub fn record_listener_failures(count: u64) {
    if count > 0 {
        counter!("ticker_stream_listener_failures_total").increment(count);
    }
}

/// Record client deliveries.
pub fn record_deliveries(outcome: DeliveryOutcome, count: u64) {
    if count > 0 {
        counter!(
            "ticker_stream_deliveries_total",
            "outcome" => outcome.as_str()
        )
        .increment(count);
    }
}

/// Update the monitored ticker count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_tickers(count: usize) {
    gauge!("ticker_stream_active_tickers").set(count as f64);
}

/// Update the active stream client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_clients(count: usize) {
    gauge!("ticker_stream_clients").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_outcome_as_str() {
        assert_eq!(SampleOutcome::Success.as_str(), "success");
        assert_eq!(SampleOutcome::Failure.as_str(), "failure");
    }

    #[test]
    fn delivery_outcome_as_str() {
        assert_eq!(DeliveryOutcome::Delivered.as_str(), "delivered");
        assert_eq!(DeliveryOutcome::Dropped.as_str(), "dropped");
        assert_eq!(DeliveryOutcome::Failed.as_str(), "failed");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_sample(SampleOutcome::Success, Duration::from_millis(5));
        record_price_change("BTCUSD");
        record_listener_failures(0);
        record_listener_failures(2);
        record_deliveries(DeliveryOutcome::Dropped, 1);
        set_active_tickers(3);
        set_clients(1);
    }
}
