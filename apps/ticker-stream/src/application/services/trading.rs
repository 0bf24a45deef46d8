//! Trading Facade
//!
//! Single entry point for the transport layer. Validates ticker commands,
//! holds the authoritative active-ticker set, and composes the monitor,
//! subscription and client registries.
//!
//! The facade subscribes to every ticker it adds under one reserved
//! subscriber id; its listener broadcasts each change to all stream clients.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::application::ports::{MarketSnapshot, SharedPriceSource, SourceError};
use crate::application::services::orchestrator::{
    MonitorRegistry, MonitorSettings, ShutdownReport,
};
use crate::application::services::stream::{StreamSession, StreamSettings};
use crate::domain::market::{PriceSample, Ticker, TickerError};
use crate::domain::subscription::{
    ListenerError, PriceListener, SubscriberId, SubscriptionRegistry,
};
use crate::infrastructure::broadcast::{ClientRegistry, ConnectionStats};

/// Subscriber id the facade registers its fan-out listener under.
pub const FACADE_SUBSCRIBER: SubscriberId = 0;

/// Default ceiling on simultaneously monitored tickers.
pub const DEFAULT_MAX_ACTIVE_TICKERS: usize = 100;

// =============================================================================
// Errors
// =============================================================================

/// Failure of a facade command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TradingError {
    /// The ticker string is malformed.
    #[error("invalid ticker format: {0}")]
    Validation(#[from] TickerError),

    /// The ticker is already monitored.
    #[error("ticker {0} already exists")]
    Duplicate(Ticker),

    /// The ticker is not monitored.
    #[error("ticker {0} not found")]
    NotFound(Ticker),

    /// The active-ticker ceiling was reached.
    #[error("maximum number of active tickers reached ({limit})")]
    Capacity {
        /// Configured ceiling.
        limit: usize,
    },

    /// Opening the price source failed.
    #[error("failed to subscribe to ticker: {0}")]
    Source(#[from] SourceError),

    /// The facade has been shut down.
    #[error("service is shutting down")]
    ShuttingDown,
}

impl TradingError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "INVALID_TICKER",
            Self::Duplicate(_) => "TICKER_ALREADY_EXISTS",
            Self::NotFound(_) => "TICKER_NOT_FOUND",
            Self::Capacity { .. } => "MAX_TICKERS_REACHED",
            Self::Source(_) => "SUBSCRIPTION_FAILED",
            Self::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}

// =============================================================================
// Views
// =============================================================================

/// Response of [`TradingFacade::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingStatus {
    /// Number of monitored tickers.
    pub active_tickers: usize,
    /// Number of active stream clients.
    pub active_streams: usize,
    /// Monitored tickers, sorted.
    pub tickers: Vec<Ticker>,
}

/// Response of [`TradingFacade::ticker_info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerInfo {
    /// The ticker.
    pub ticker: Ticker,
    /// Last observed price.
    pub price: Option<String>,
    /// Whether the poll loop is running.
    pub is_polling: bool,
    /// Subscribers registered for the ticker.
    pub subscribers: usize,
}

/// Facade settings.
#[derive(Debug, Clone)]
pub struct TradingSettings {
    /// Ceiling on simultaneously monitored tickers.
    pub max_active_tickers: usize,
    /// Monitor cadence and retry.
    pub monitor: MonitorSettings,
    /// Stream cycle and buffer.
    pub stream: StreamSettings,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            max_active_tickers: DEFAULT_MAX_ACTIVE_TICKERS,
            monitor: MonitorSettings::default(),
            stream: StreamSettings::default(),
        }
    }
}

/// Listener that broadcasts every change to all stream clients.
struct ClientFanout {
    clients: Arc<ClientRegistry>,
}

impl PriceListener for ClientFanout {
    fn on_price(&self, sample: &PriceSample) -> Result<(), ListenerError> {
        let report = self.clients.broadcast(sample);
        tracing::debug!(
            ticker = %sample.ticker,
            delivered = report.delivered,
            dropped = report.dropped,
            failed = report.failed,
            "Price update broadcast"
        );
        Ok(())
    }
}

// =============================================================================
// Trading Facade
// =============================================================================

/// Entry point for ticker lifecycle commands and price streams.
pub struct TradingFacade {
    monitors: MonitorRegistry,
    clients: Arc<ClientRegistry>,
    fanout: Arc<dyn PriceListener>,
    active: RwLock<BTreeSet<Ticker>>,
    lifecycle: Mutex<()>,
    shutting_down: AtomicBool,
    settings: TradingSettings,
}

impl std::fmt::Debug for TradingFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingFacade")
            .field("monitors", &self.monitors)
            .field("clients", &self.clients)
            .field("active", &self.active.read().len())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl TradingFacade {
    /// Build a facade over `source`.
    #[must_use]
    pub fn new(source: SharedPriceSource, settings: TradingSettings) -> Arc<Self> {
        let clients = Arc::new(ClientRegistry::new());
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let monitors = MonitorRegistry::new(source, subscriptions, settings.monitor.clone());
        let fanout: Arc<dyn PriceListener> = Arc::new(ClientFanout {
            clients: Arc::clone(&clients),
        });

        Arc::new(Self {
            monitors,
            clients,
            fanout,
            active: RwLock::new(BTreeSet::new()),
            lifecycle: Mutex::new(()),
            shutting_down: AtomicBool::new(false),
            settings,
        })
    }

    /// Start monitoring `raw`.
    ///
    /// # Errors
    ///
    /// Checked in order: [`TradingError::Validation`],
    /// [`TradingError::Duplicate`], [`TradingError::Capacity`],
    /// [`TradingError::ShuttingDown`]; then [`TradingError::Source`] if the
    /// session cannot be opened. A failed add changes nothing.
    pub async fn add_ticker(&self, raw: &str) -> Result<Ticker, TradingError> {
        let ticker = Ticker::parse(raw)?;
        let _guard = self.lifecycle.lock().await;

        if self.active.read().contains(&ticker) {
            return Err(TradingError::Duplicate(ticker));
        }

        let limit = self.settings.max_active_tickers;
        if self.active.read().len() >= limit {
            return Err(TradingError::Capacity { limit });
        }

        if self.is_shutting_down() {
            return Err(TradingError::ShuttingDown);
        }

        self.monitors
            .subscribe(&ticker, FACADE_SUBSCRIBER, Arc::clone(&self.fanout))
            .await?;
        self.active.write().insert(ticker.clone());

        tracing::info!(ticker = %ticker, active = self.ticker_count(), "Ticker added");
        Ok(ticker)
    }

    /// Stop monitoring `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`TradingError::Validation`] for malformed input and
    /// [`TradingError::NotFound`] if the ticker is not monitored.
    pub async fn remove_ticker(&self, raw: &str) -> Result<Ticker, TradingError> {
        let ticker = Ticker::parse(raw)?;
        let _guard = self.lifecycle.lock().await;

        if !self.active.read().contains(&ticker) {
            return Err(TradingError::NotFound(ticker));
        }

        self.active.write().remove(&ticker);
        self.monitors.unsubscribe(&ticker, FACADE_SUBSCRIBER).await;

        tracing::info!(ticker = %ticker, active = self.ticker_count(), "Ticker removed");
        Ok(ticker)
    }

    /// Active tickers and stream count.
    #[must_use]
    pub fn status(&self) -> TradingStatus {
        let tickers: Vec<Ticker> = self.active.read().iter().cloned().collect();
        TradingStatus {
            active_tickers: tickers.len(),
            active_streams: self.clients.active_client_count(),
            tickers,
        }
    }

    /// Details for one monitored ticker.
    ///
    /// # Errors
    ///
    /// Returns [`TradingError::Validation`] or [`TradingError::NotFound`].
    pub fn ticker_info(&self, raw: &str) -> Result<TickerInfo, TradingError> {
        let ticker = Ticker::parse(raw)?;

        if !self.active.read().contains(&ticker) {
            return Err(TradingError::NotFound(ticker));
        }

        Ok(TickerInfo {
            price: self.monitors.current_price(&ticker),
            is_polling: self.monitors.is_polling(&ticker),
            subscribers: self.monitors.subscriber_count(&ticker),
            ticker,
        })
    }

    /// Whether `raw` names a monitored ticker. Malformed input is `false`.
    #[must_use]
    pub fn is_ticker_active(&self, raw: &str) -> bool {
        Ticker::parse(raw).is_ok_and(|ticker| self.active.read().contains(&ticker))
    }

    /// Number of monitored tickers.
    #[must_use]
    pub fn ticker_count(&self) -> usize {
        self.active.read().len()
    }

    /// Tickers with no observed price yet.
    #[must_use]
    pub fn pending_tickers(&self) -> Vec<Ticker> {
        self.active
            .read()
            .iter()
            .filter(|ticker| self.monitors.current_price(ticker).is_none())
            .cloned()
            .collect()
    }

    /// Stream connection counters.
    #[must_use]
    pub fn connection_stats(&self) -> ConnectionStats {
        self.clients.connection_stats()
    }

    /// Client registry shared with stream sessions.
    #[must_use]
    pub const fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Open a new price stream.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn open_stream(self: &Arc<Self>) -> StreamSession {
        StreamSession::open(
            Arc::clone(&self.clients),
            Arc::clone(self) as Arc<dyn MarketSnapshot>,
            self.settings.stream,
        )
    }

    /// Whether [`Self::shutdown`] has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Stop all monitoring and end every open stream.
    ///
    /// Later `add_ticker` calls fail with [`TradingError::ShuttingDown`].
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shutting_down.store(true, Ordering::SeqCst);
        let _guard = self.lifecycle.lock().await;

        let report = self.monitors.shutdown_all().await;
        self.active.write().clear();
        let clients = self.clients.remove_all();

        tracing::info!(
            stopped = report.stopped,
            close_failures = report.failures.len(),
            clients,
            "Trading facade shut down"
        );
        report
    }
}

impl MarketSnapshot for TradingFacade {
    fn active_tickers(&self) -> Vec<Ticker> {
        self.active.read().iter().cloned().collect()
    }

    fn current_price(&self, ticker: &Ticker) -> Option<String> {
        self.monitors.current_price(ticker)
    }
}

// =============================================================================
// Tests
// =============================================================================
