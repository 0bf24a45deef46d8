//! Monitor Registry
//!
//! Owns the set of monitored tickers. For each ticker it keeps exactly one
//! [`TickerMonitor`] and the [`PriceSession`] backing it, creating both on
//! the first subscription and tearing both down when the last subscriber
//! leaves.
//!
//! Every monitor forwards its changes into the shared
//! [`SubscriptionRegistry`], which fans them out to listeners.
//!
//! Subscribe, unsubscribe and shutdown are serialised by an async mutex so
//! two concurrent subscriptions for a new ticker open a single session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::application::ports::{PriceSession, SharedPriceSource, SourceError};
use crate::application::services::monitor::TickerMonitor;
use crate::application::services::retry::RetryConfig;
use crate::domain::market::{PriceSample, Ticker};
use crate::domain::subscription::{
    ListenerError, PriceListener, SubscriberId, SubscriptionRegistry,
};
use crate::infrastructure::metrics;

// =============================================================================
// Types
// =============================================================================

/// Settings applied to every monitor the registry creates.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Polling cadence.
    pub polling_interval: Duration,
    /// Retry policy for each sample.
    pub retry: RetryConfig,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(2),
            retry: RetryConfig::default(),
        }
    }
}

/// Result of [`MonitorRegistry::shutdown_all`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Monitors that were stopped.
    pub stopped: usize,
    /// Sessions that failed to close.
    pub failures: Vec<SourceError>,
}

impl ShutdownReport {
    /// Whether every session closed cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct MonitorEntry {
    monitor: TickerMonitor,
    session: Arc<dyn PriceSession>,
}

/// Monitor sink that forwards changes into the subscription registry.
struct SubscriptionForwarder {
    subscriptions: Arc<SubscriptionRegistry>,
}

impl PriceListener for SubscriptionForwarder {
    fn on_price(&self, sample: &PriceSample) -> Result<(), ListenerError> {
        let report = self.subscriptions.notify(&sample.ticker, sample);
        metrics::record_listener_failures(u64::try_from(report.failed).unwrap_or(u64::MAX));
        Ok(())
    }
}

// =============================================================================
// Monitor Registry
// =============================================================================

/// Ticker → monitor mapping with one upstream session per ticker.
pub struct MonitorRegistry {
    source: SharedPriceSource,
    subscriptions: Arc<SubscriptionRegistry>,
    settings: MonitorSettings,
    monitors: RwLock<HashMap<Ticker, MonitorEntry>>,
    lifecycle: Mutex<()>,
}

impl std::fmt::Debug for MonitorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorRegistry")
            .field("source", &self.source.name())
            .field("monitors", &self.monitors.read().len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl MonitorRegistry {
    /// Create an empty registry over `source`.
    #[must_use]
    pub fn new(
        source: SharedPriceSource,
        subscriptions: Arc<SubscriptionRegistry>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            source,
            subscriptions,
            settings,
            monitors: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
        }
    }

    /// The subscription registry monitors publish into.
    #[must_use]
    pub const fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    /// Subscribe `listener` to `ticker`, starting a monitor if none exists.
    ///
    /// # Errors
    ///
    /// Returns the [`SourceError`] from opening the session. Nothing is
    /// registered in that case.
    pub async fn subscribe(
        &self,
        ticker: &Ticker,
        subscriber: SubscriberId,
        listener: Arc<dyn PriceListener>,
    ) -> Result<(), SourceError> {
        let _guard = self.lifecycle.lock().await;

        if self.monitors.read().contains_key(ticker) {
            tracing::warn!(ticker = %ticker, subscriber, "Ticker already monitored");
            self.subscriptions
                .subscribe(ticker.clone(), subscriber, listener);
            return Ok(());
        }

        let session = self.source.open(ticker).await?;

        let forwarder: Arc<dyn PriceListener> = Arc::new(SubscriptionForwarder {
            subscriptions: Arc::clone(&self.subscriptions),
        });
        let monitor = TickerMonitor::new(
            ticker.clone(),
            Arc::clone(&session),
            forwarder,
            self.settings.retry,
        );

        self.subscriptions
            .subscribe(ticker.clone(), subscriber, listener);
        monitor.start(self.settings.polling_interval);

        let count = {
            let mut monitors = self.monitors.write();
            monitors.insert(ticker.clone(), MonitorEntry { monitor, session });
            monitors.len()
        };
        metrics::set_active_tickers(count);

        tracing::info!(
            ticker = %ticker,
            source = self.source.name(),
            active = count,
            "Monitoring started"
        );
        Ok(())
    }

    /// Remove `subscriber` from `ticker`.
    ///
    /// Returns `true` when that was the last subscriber and the monitor was
    /// torn down.
    pub async fn unsubscribe(&self, ticker: &Ticker, subscriber: SubscriberId) -> bool {
        let _guard = self.lifecycle.lock().await;

        if self.subscriptions.unsubscribe(ticker, subscriber) > 0 {
            return false;
        }

        let (entry, count) = {
            let mut monitors = self.monitors.write();
            let entry = monitors.remove(ticker);
            (entry, monitors.len())
        };

        let Some(entry) = entry else {
            return false;
        };

        entry.monitor.stop();
        if let Err(e) = entry.session.close().await {
            tracing::warn!(ticker = %ticker, error = %e, "Failed to close price session");
        }
        metrics::set_active_tickers(count);

        tracing::info!(ticker = %ticker, active = count, "Monitoring stopped");
        true
    }

    /// Monitored tickers, sorted.
    #[must_use]
    pub fn active_tickers(&self) -> Vec<Ticker> {
        let mut tickers: Vec<Ticker> = self.monitors.read().keys().cloned().collect();
        tickers.sort();
        tickers
    }

    /// Last price observed by the monitor for `ticker`.
    #[must_use]
    pub fn current_price(&self, ticker: &Ticker) -> Option<String> {
        self.monitors
            .read()
            .get(ticker)
            .and_then(|entry| entry.monitor.current_price())
    }

    /// Whether a monitor exists for `ticker`.
    #[must_use]
    pub fn is_monitoring(&self, ticker: &Ticker) -> bool {
        self.monitors.read().contains_key(ticker)
    }

    /// Whether the monitor for `ticker` is currently polling.
    #[must_use]
    pub fn is_polling(&self, ticker: &Ticker) -> bool {
        self.monitors
            .read()
            .get(ticker)
            .is_some_and(|entry| entry.monitor.is_running())
    }

    /// Subscribers registered for `ticker`.
    #[must_use]
    pub fn subscriber_count(&self, ticker: &Ticker) -> usize {
        self.subscriptions.subscriber_count(ticker)
    }

    /// Number of monitored tickers.
    #[must_use]
    pub fn monitor_count(&self) -> usize {
        self.monitors.read().len()
    }

    /// Stop every monitor, close every session and clear all subscriptions.
    ///
    /// Close failures are collected; the sweep always completes.
    pub async fn shutdown_all(&self) -> ShutdownReport {
        let _guard = self.lifecycle.lock().await;

        let entries: Vec<(Ticker, MonitorEntry)> = self.monitors.write().drain().collect();
        let mut report = ShutdownReport::default();

        for (ticker, entry) in entries {
            entry.monitor.stop();
            report.stopped += 1;

            if let Err(e) = entry.session.close().await {
                tracing::warn!(ticker = %ticker, error = %e, "Failed to close price session");
                report.failures.push(e);
            }
        }

        self.subscriptions.clear_all();
        metrics::set_active_tickers(0);

        tracing::info!(
            stopped = report.stopped,
            failures = report.failures.len(),
            "All monitors shut down"
        );
        report
    }
}

// =============================================================================
// Tests
// =============================================================================
