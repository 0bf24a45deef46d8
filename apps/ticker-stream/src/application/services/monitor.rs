//! Ticker Monitor
//!
//! Owns the polling loop for exactly one ticker. Each tick takes a sample
//! (with bounded retry), compares it to the last observed price and forwards
//! it to the sink only when the text differs.
//!
//! The loop runs as its own tokio task and is stopped through a
//! [`CancellationToken`] checked at the top of every iteration and between
//! retry attempts. A sample that is in flight when the monitor stops is
//! allowed to finish; its result is discarded and no retry follows it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::PriceSession;
use crate::application::services::retry::{RetryConfig, retry};
use crate::domain::market::{PriceSample, Ticker};
use crate::domain::subscription::PriceListener;
use crate::infrastructure::metrics::{self, SampleOutcome};

/// Default polling cadence.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(2);

/// Smallest accepted polling cadence.
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_millis(1);

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug, Default)]
struct MonitorState {
    last_price: RwLock<Option<String>>,
    running: AtomicBool,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

// =============================================================================
// Ticker Monitor
// =============================================================================

/// Polling worker for one ticker.
pub struct TickerMonitor {
    ticker: Ticker,
    session: Arc<dyn PriceSession>,
    sink: Arc<dyn PriceListener>,
    retry: RetryConfig,
    interval: Mutex<Duration>,
    state: Arc<MonitorState>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for TickerMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickerMonitor")
            .field("ticker", &self.ticker)
            .field("interval", &*self.interval.lock())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl TickerMonitor {
    /// Create a stopped monitor.
    #[must_use]
    pub fn new(
        ticker: Ticker,
        session: Arc<dyn PriceSession>,
        sink: Arc<dyn PriceListener>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            ticker,
            session,
            sink,
            retry,
            interval: Mutex::new(DEFAULT_POLLING_INTERVAL),
            state: Arc::new(MonitorState::default()),
            worker: Mutex::new(None),
        }
    }

    /// Ticker this monitor samples.
    #[must_use]
    pub const fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    /// Start polling every `interval`.
    ///
    /// One sample is taken immediately. Calling `start` while running logs
    /// a warning and changes nothing. A zero interval is raised to
    /// [`MIN_POLLING_INTERVAL`]. Must be called inside a tokio runtime.
    pub fn start(&self, interval: Duration) {
        let interval = interval.max(MIN_POLLING_INTERVAL);
        let mut worker = self.worker.lock();

        if worker.is_some() {
            tracing::warn!(ticker = %self.ticker, "Monitor already running");
            return;
        }

        *self.interval.lock() = interval;
        self.state.running.store(true, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let poller = Poller {
            ticker: self.ticker.clone(),
            session: Arc::clone(&self.session),
            sink: Arc::clone(&self.sink),
            retry: self.retry,
            state: Arc::clone(&self.state),
        };
        let handle = tokio::spawn(poller.run(interval, cancel.clone()));

        *worker = Some(Worker { cancel, handle });

        tracing::info!(
            ticker = %self.ticker,
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "Monitor started"
        );
    }

    /// Stop polling. No-op when not running.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        worker.cancel.cancel();
        self.state.running.store(false, Ordering::SeqCst);
        // The task exits on its own; an in-flight sample is left to finish.
        drop(worker.handle);

        tracing::info!(ticker = %self.ticker, "Monitor stopped");
    }

    /// Whether the polling loop is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Last observed price, if any sample succeeded.
    #[must_use]
    pub fn current_price(&self) -> Option<String> {
        self.state.last_price.read().clone()
    }

    /// Current polling cadence.
    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        *self.interval.lock()
    }

    /// Change the polling cadence, restarting the loop if it is running.
    pub fn set_polling_interval(&self, interval: Duration) {
        if self.is_running() {
            self.stop();
            self.start(interval);
        } else {
            *self.interval.lock() = interval;
        }
    }
}

impl Drop for TickerMonitor {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
        }
    }
}

// =============================================================================
// Poll Loop
// =============================================================================

struct Poller {
    ticker: Ticker,
    session: Arc<dyn PriceSession>,
    sink: Arc<dyn PriceListener>,
    retry: RetryConfig,
    state: Arc<MonitorState>,
}

impl Poller {
    async fn run(self, interval: Duration, cancel: CancellationToken) {
        self.poll_once(&cancel).await;

        let mut ticks = tokio::time::interval_at(Instant::now() + interval, interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticks.tick() => {}
            }

            self.poll_once(&cancel).await;
        }

        tracing::debug!(ticker = %self.ticker, "Poll loop exited");
    }

    async fn poll_once(&self, cancel: &CancellationToken) {
        let session = &*self.session;
        let started = std::time::Instant::now();
        let result = retry(&self.retry, cancel, || session.sample()).await;
        let elapsed = started.elapsed();

        if cancel.is_cancelled() {
            tracing::debug!(ticker = %self.ticker, "Discarding sample taken after stop");
            return;
        }

        match result {
            Ok(price) => {
                metrics::record_sample(SampleOutcome::Success, elapsed);
                self.observe(price);
            }
            Err(e) => {
                metrics::record_sample(SampleOutcome::Failure, elapsed);
                tracing::warn!(
                    ticker = %self.ticker,
                    error = %e,
                    "Price sample failed, keeping last price"
                );
            }
        }
    }

    fn observe(&self, price: String) {
        {
            let mut last = self.state.last_price.write();
            if last.as_deref() == Some(price.as_str()) {
                return;
            }
            *last = Some(price.clone());
        }

        tracing::debug!(ticker = %self.ticker, price = %price, "Price changed");
        metrics::record_price_change(self.ticker.as_str());

        let sample = PriceSample::new(self.ticker.clone(), price);
        if let Err(e) = self.sink.on_price(&sample) {
            tracing::warn!(ticker = %self.ticker, error = %e, "Price sink rejected update");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
