//! Subscription Registry
//!
//! Maps each ticker to the listeners interested in its price changes.
//!
//! # Design
//!
//! The registry tracks:
//! - Which subscribers are registered for each ticker
//! - One listener handle per (ticker, subscriber) pair
//! - Removal of a ticker entry once its last subscriber leaves
//!
//! The registry knows nothing about transports. A listener is any
//! [`PriceListener`]; the trading facade registers one that broadcasts to
//! stream clients, tests register closures.
//!
//! Delivery iterates a snapshot taken under the read lock, so listeners may
//! subscribe or unsubscribe (even themselves) while being notified.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::market::{PriceSample, Ticker};

// =============================================================================
// Types
// =============================================================================

/// Identifier of a logical subscriber within one ticker's entry.
pub type SubscriberId = u64;

/// Failure reported by a listener for one delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenerError {
    /// The listener refused or failed to process the update.
    #[error("listener rejected update: {0}")]
    Rejected(String),

    /// The listener's downstream is gone.
    #[error("listener disconnected")]
    Disconnected,
}

/// Receiver of price changes for subscribed tickers.
#[cfg_attr(test, mockall::automock)]
pub trait PriceListener: Send + Sync {
    /// Handle one price change.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the update could not be handled. The
    /// error is isolated to this listener.
    fn on_price(&self, sample: &PriceSample) -> Result<(), ListenerError>;
}

impl<F> PriceListener for F
where
    F: Fn(&PriceSample) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_price(&self, sample: &PriceSample) -> Result<(), ListenerError> {
        self(sample)
    }
}

/// Outcome of one [`SubscriptionRegistry::notify`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    /// Listeners that accepted the update.
    pub delivered: usize,
    /// Listeners that returned an error.
    pub failed: usize,
}

type ListenerMap = HashMap<SubscriberId, Arc<dyn PriceListener>>;

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe ticker → listener mapping.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use ticker_stream::domain::market::{PriceSample, Ticker};
/// use ticker_stream::domain::subscription::{ListenerError, SubscriptionRegistry};
///
/// let registry = SubscriptionRegistry::new();
/// let btc = Ticker::parse("BTCUSD").unwrap();
///
/// let listener = Arc::new(|_: &PriceSample| Ok::<(), ListenerError>(()));
/// assert!(registry.subscribe(btc.clone(), 1, listener.clone()));
/// assert!(!registry.subscribe(btc.clone(), 1, listener));
///
/// let report = registry.notify(&btc, &PriceSample::new(btc.clone(), "1.00"));
/// assert_eq!(report.delivered, 1);
///
/// assert_eq!(registry.unsubscribe(&btc, 1), 0);
/// assert!(!registry.has_subscribers(&btc));
/// ```
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<Ticker, ListenerMap>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("tickers", &self.entries.read().len())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `ticker` under `subscriber`.
    ///
    /// Returns `false` when the pair was already registered; the existing
    /// listener is kept.
    pub fn subscribe(
        &self,
        ticker: Ticker,
        subscriber: SubscriberId,
        listener: Arc<dyn PriceListener>,
    ) -> bool {
        let mut entries = self.entries.write();
        let listeners = entries.entry(ticker).or_default();

        if listeners.contains_key(&subscriber) {
            return false;
        }

        listeners.insert(subscriber, listener);
        true
    }

    /// Remove `subscriber` from `ticker`.
    ///
    /// Returns the number of subscribers left for the ticker. The ticker
    /// entry is dropped when that reaches zero.
    pub fn unsubscribe(&self, ticker: &Ticker, subscriber: SubscriberId) -> usize {
        let mut entries = self.entries.write();
        let Some(listeners) = entries.get_mut(ticker) else {
            return 0;
        };

        listeners.remove(&subscriber);
        let remaining = listeners.len();

        if remaining == 0 {
            entries.remove(ticker);
        }

        remaining
    }

    /// Deliver `sample` to every listener registered for `ticker`.
    ///
    /// Never fails as a whole. Each listener error is logged and counted.
    pub fn notify(&self, ticker: &Ticker, sample: &PriceSample) -> NotifyReport {
        let snapshot: Vec<(SubscriberId, Arc<dyn PriceListener>)> = {
            let entries = self.entries.read();
            entries
                .get(ticker)
                .map(|listeners| {
                    listeners
                        .iter()
                        .map(|(id, listener)| (*id, Arc::clone(listener)))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut report = NotifyReport::default();

        for (subscriber, listener) in snapshot {
            match listener.on_price(sample) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        ticker = %ticker,
                        subscriber,
                        error = %e,
                        "Listener failed to handle price update"
                    );
                }
            }
        }

        report
    }

    /// Number of subscribers for `ticker`.
    #[must_use]
    pub fn subscriber_count(&self, ticker: &Ticker) -> usize {
        self.entries.read().get(ticker).map_or(0, HashMap::len)
    }

    /// Whether anyone is subscribed to `ticker`.
    #[must_use]
    pub fn has_subscribers(&self, ticker: &Ticker) -> bool {
        self.subscriber_count(ticker) > 0
    }

    /// Tickers with at least one subscriber, sorted.
    #[must_use]
    pub fn active_tickers(&self) -> Vec<Ticker> {
        let mut tickers: Vec<Ticker> = self.entries.read().keys().cloned().collect();
        tickers.sort();
        tickers
    }

    /// Subscriber count summed over all tickers.
    #[must_use]
    pub fn total_subscriber_count(&self) -> usize {
        self.entries.read().values().map(HashMap::len).sum()
    }

    /// Drop every subscriber of `ticker`, returning how many were removed.
    pub fn clear(&self, ticker: &Ticker) -> usize {
        self.entries.write().remove(ticker).map_or(0, |l| l.len())
    }

    /// Drop every subscription.
    pub fn clear_all(&self) {
        self.entries.write().clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn ticker(raw: &str) -> Ticker {
        Ticker::parse(raw).unwrap()
    }

    fn counting_listener(counter: &Arc<AtomicUsize>) -> Arc<dyn PriceListener> {
        let counter = Arc::clone(counter);
        Arc::new(move |_: &PriceSample| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), ListenerError>(())
        })
    }

    #[test]
    fn subscribe_is_idempotent_per_pair() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        assert!(registry.subscribe(ticker("AAPL"), 1, counting_listener(&counter)));
        assert!(!registry.subscribe(ticker("AAPL"), 1, counting_listener(&counter)));
        assert!(registry.subscribe(ticker("AAPL"), 2, counting_listener(&counter)));

        assert_eq!(registry.subscriber_count(&ticker("AAPL")), 2);

        registry.notify(&ticker("AAPL"), &PriceSample::new(ticker("AAPL"), "1"));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_last_removes_entry() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        registry.subscribe(ticker("AAPL"), 1, counting_listener(&counter));
        registry.subscribe(ticker("AAPL"), 2, counting_listener(&counter));

        assert_eq!(registry.unsubscribe(&ticker("AAPL"), 1), 1);
        assert!(registry.has_subscribers(&ticker("AAPL")));

        assert_eq!(registry.unsubscribe(&ticker("AAPL"), 2), 0);
        assert!(!registry.has_subscribers(&ticker("AAPL")));
        assert!(registry.active_tickers().is_empty());
    }

    #[test]
    fn unsubscribe_unknown_is_noop() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.subscribe(ticker("AAPL"), 1, counting_listener(&counter));

        assert_eq!(registry.unsubscribe(&ticker("MSFT"), 1), 0);
        assert_eq!(registry.unsubscribe(&ticker("AAPL"), 99), 1);
        assert_eq!(registry.total_subscriber_count(), 1);
    }

    #[test]
    fn notify_only_reaches_matching_ticker() {
        let registry = SubscriptionRegistry::new();
        let aapl = Arc::new(AtomicUsize::new(0));
        let msft = Arc::new(AtomicUsize::new(0));

        registry.subscribe(ticker("AAPL"), 1, counting_listener(&aapl));
        registry.subscribe(ticker("MSFT"), 1, counting_listener(&msft));

        let report = registry.notify(&ticker("AAPL"), &PriceSample::new(ticker("AAPL"), "1"));

        assert_eq!(report, NotifyReport { delivered: 1, failed: 0 });
        assert_eq!(aapl.load(Ordering::SeqCst), 1);
        assert_eq!(msft.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn notify_without_subscribers_is_empty() {
        let registry = SubscriptionRegistry::new();
        let report = registry.notify(&ticker("AAPL"), &PriceSample::new(ticker("AAPL"), "1"));
        assert_eq!(report, NotifyReport::default());
    }

    #[test]
    fn failing_listener_does_not_block_others() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut failing = MockPriceListener::new();
        failing
            .expect_on_price()
            .times(1)
            .returning(|_| Err(ListenerError::Rejected("boom".to_string())));

        registry.subscribe(ticker("AAPL"), 1, counting_listener(&counter));
        registry.subscribe(ticker("AAPL"), 2, Arc::new(failing));
        registry.subscribe(ticker("AAPL"), 3, counting_listener(&counter));

        let report = registry.notify(&ticker("AAPL"), &PriceSample::new(ticker("AAPL"), "1"));

        assert_eq!(report, NotifyReport { delivered: 2, failed: 1 });
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_can_unsubscribe_itself_during_notify() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let inner = Arc::clone(&registry);
        let inner_calls = Arc::clone(&calls);
        let listener: Arc<dyn PriceListener> = Arc::new(move |sample: &PriceSample| {
            inner_calls.fetch_add(1, Ordering::SeqCst);
            inner.unsubscribe(&sample.ticker, 1);
            inner.subscribe(ticker("NEWONE"), 7, Arc::new(|_: &PriceSample| Ok::<(), ListenerError>(())));
            Ok::<(), ListenerError>(())
        });

        registry.subscribe(ticker("AAPL"), 1, listener);

        let sample = PriceSample::new(ticker("AAPL"), "1");
        registry.notify(&ticker("AAPL"), &sample);
        registry.notify(&ticker("AAPL"), &sample);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.active_tickers(), vec![ticker("NEWONE")]);
    }

    #[test]
    fn active_tickers_are_sorted() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for raw in ["MSFT", "AAPL", "GOOG"] {
            registry.subscribe(ticker(raw), 1, counting_listener(&counter));
        }

        assert_eq!(
            registry.active_tickers(),
            vec![ticker("AAPL"), ticker("GOOG"), ticker("MSFT")]
        );
    }

    #[test]
    fn clear_and_clear_all() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        registry.subscribe(ticker("AAPL"), 1, counting_listener(&counter));
        registry.subscribe(ticker("AAPL"), 2, counting_listener(&counter));
        registry.subscribe(ticker("MSFT"), 1, counting_listener(&counter));

        assert_eq!(registry.clear(&ticker("AAPL")), 2);
        assert_eq!(registry.clear(&ticker("AAPL")), 0);
        assert_eq!(registry.total_subscriber_count(), 1);

        registry.clear_all();
        assert_eq!(registry.total_subscriber_count(), 0);
    }

    #[test]
    fn thread_safety_concurrent_subscribe_and_notify() {
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for i in 0..10u64 {
            let r = Arc::clone(&registry);
            let listener = counting_listener(&counter);
            handles.push(thread::spawn(move || {
                r.subscribe(ticker("SHARED"), i, Arc::clone(&listener));
                r.subscribe(ticker(&format!("SYM{i}")), i, listener);
                r.notify(&ticker("SHARED"), &PriceSample::new(ticker("SHARED"), "1"));
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.subscriber_count(&ticker("SHARED")), 10);
        // SYM0-SYM9 plus SHARED
        assert_eq!(registry.active_tickers().len(), 11);
        assert_eq!(registry.total_subscriber_count(), 20);
    }
}
