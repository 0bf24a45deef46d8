//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use ticker_stream::application::services::retry::RetryConfig;
use ticker_stream::{
    MonitorSettings, PriceSession, PriceSource, SourceError, StreamSettings, Ticker,
    TradingFacade, TradingSettings,
};

/// Source whose sessions replay a per-ticker script, repeating the last
/// entry once the script runs out. Tickers without a script fail to open.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, Vec<Result<String, String>>>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script a sequence of prices for `ticker`.
    pub fn script(&self, ticker: &str, prices: &[&str]) {
        self.scripts.lock().insert(
            ticker.to_string(),
            prices.iter().map(|p| Ok((*p).to_string())).collect(),
        );
    }

    /// Script a sequence where `Err` entries are sample failures.
    pub fn script_results(&self, ticker: &str, results: Vec<Result<&str, &str>>) {
        self.scripts.lock().insert(
            ticker.to_string(),
            results
                .into_iter()
                .map(|r| r.map(str::to_string).map_err(str::to_string))
                .collect(),
        );
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for ScriptedSource {
    async fn open(&self, ticker: &Ticker) -> Result<Arc<dyn PriceSession>, SourceError> {
        let script = self
            .scripts
            .lock()
            .get(ticker.as_str())
            .cloned()
            .ok_or_else(|| SourceError::unavailable(ticker, "no script"))?;

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedSession {
            ticker: ticker.clone(),
            script: Mutex::new(script.into_iter().collect()),
            closed: Arc::clone(&self.closed),
        }))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedSession {
    ticker: Ticker,
    script: Mutex<VecDeque<Result<String, String>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl PriceSession for ScriptedSession {
    async fn sample(&self) -> Result<String, SourceError> {
        let mut script = self.script.lock();
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        match next {
            Some(Ok(price)) => Ok(price),
            Some(Err(reason)) => Err(SourceError::extraction_failed(&self.ticker, reason)),
            None => Err(SourceError::extraction_failed(&self.ticker, "empty script")),
        }
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Facade settings with two-second cadences and no sample retries.
pub fn test_settings() -> TradingSettings {
    TradingSettings {
        max_active_tickers: 3,
        monitor: MonitorSettings {
            polling_interval: Duration::from_secs(2),
            retry: RetryConfig::fixed(0, Duration::from_millis(500)),
        },
        stream: StreamSettings {
            cycle_interval: Duration::from_secs(2),
            buffer: 16,
        },
    }
}

pub fn facade_with(source: &Arc<ScriptedSource>) -> Arc<TradingFacade> {
    TradingFacade::new(
        Arc::clone(source) as Arc<dyn PriceSource>,
        test_settings(),
    )
}
