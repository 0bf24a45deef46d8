//! Simulated random-walk price source.
//!
//! Each session starts from a random price and moves by at most
//! `volatility` per sample. Prices are formatted with two decimals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::application::ports::{PriceSession, PriceSource, SourceError};
use crate::domain::market::Ticker;
use crate::infrastructure::config::SimulatedSettings;

const MIN_START_PRICE: f64 = 10.0;
const MAX_START_PRICE: f64 = 500.0;

/// Random-walk [`PriceSource`].
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    settings: SimulatedSettings,
    seed: Option<u64>,
}

impl SimulatedSource {
    /// Create a source with thread-seeded sessions.
    #[must_use]
    pub const fn new(settings: SimulatedSettings) -> Self {
        Self {
            settings,
            seed: None,
        }
    }

    /// Create a source whose sessions all start from the same seed.
    #[must_use]
    pub const fn seeded(settings: SimulatedSettings, seed: u64) -> Self {
        Self {
            settings,
            seed: Some(seed),
        }
    }
}

#[async_trait]
impl PriceSource for SimulatedSource {
    async fn open(&self, ticker: &Ticker) -> Result<Arc<dyn PriceSession>, SourceError> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let start = Decimal::try_from(rng.random_range(MIN_START_PRICE..MAX_START_PRICE))
            .map_err(|e| SourceError::unavailable(ticker, e))?;

        tracing::debug!(ticker = %ticker, start = %format_price(start), "Simulated session opened");

        Ok(Arc::new(SimulatedSession {
            ticker: ticker.clone(),
            volatility: finite_or_zero(self.settings.volatility).abs(),
            failure_rate: finite_or_zero(self.settings.failure_rate).clamp(0.0, 1.0),
            walk: Mutex::new(Walk { rng, price: start }),
            closed: AtomicBool::new(false),
        }))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

struct Walk {
    rng: StdRng,
    price: Decimal,
}

struct SimulatedSession {
    ticker: Ticker,
    volatility: f64,
    failure_rate: f64,
    walk: Mutex<Walk>,
    closed: AtomicBool,
}

impl SimulatedSession {
    fn step(&self) -> Result<String, SourceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SourceError::extraction_failed(&self.ticker, "session closed"));
        }

        let mut walk = self.walk.lock();
        if walk.rng.random_bool(self.failure_rate) {
            return Err(SourceError::extraction_failed(
                &self.ticker,
                "simulated sample failure",
            ));
        }

        let delta = if self.volatility > 0.0 {
            walk.rng.random_range(-self.volatility..=self.volatility)
        } else {
            0.0
        };
        let factor = Decimal::ONE
            + Decimal::try_from(delta)
                .map_err(|e| SourceError::extraction_failed(&self.ticker, e))?;

        let floor = Decimal::new(1, 2);
        walk.price = (walk.price * factor).max(floor);
        Ok(format_price(walk.price))
    }
}

#[async_trait]
impl PriceSession for SimulatedSession {
    async fn sample(&self) -> Result<String, SourceError> {
        self.step()
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

const fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

fn format_price(price: Decimal) -> String {
    format!(
        "{:.2}",
        price.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(volatility: f64, failure_rate: f64) -> SimulatedSettings {
        SimulatedSettings {
            volatility,
            failure_rate,
        }
    }

    fn ticker() -> Ticker {
        Ticker::parse("BTCUSD").unwrap()
    }

    fn decimals(price: &str) -> usize {
        price.split_once('.').map_or(0, |(_, frac)| frac.len())
    }

    #[tokio::test]
    async fn prices_have_two_decimals() {
        let source = SimulatedSource::seeded(settings(0.01, 0.0), 7);
        let session = source.open(&ticker()).await.unwrap();

        for _ in 0..50 {
            let price = session.sample().await.unwrap();
            assert_eq!(decimals(&price), 2, "price {price}");
            assert!(price.parse::<Decimal>().unwrap() >= Decimal::new(1, 2));
        }
    }

    #[tokio::test]
    async fn zero_volatility_is_flat() {
        let source = SimulatedSource::seeded(settings(0.0, 0.0), 1);
        let session = source.open(&ticker()).await.unwrap();

        let first = session.sample().await.unwrap();
        let second = session.sample().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn same_seed_same_walk() {
        let source = SimulatedSource::seeded(settings(0.05, 0.0), 42);
        let a = source.open(&ticker()).await.unwrap();
        let b = source.open(&ticker()).await.unwrap();

        for _ in 0..10 {
            assert_eq!(a.sample().await.unwrap(), b.sample().await.unwrap());
        }
    }

    #[tokio::test]
    async fn failure_rate_one_always_fails() {
        let source = SimulatedSource::seeded(settings(0.01, 1.0), 3);
        let session = source.open(&ticker()).await.unwrap();

        let err = session.sample().await.unwrap_err();
        assert!(matches!(err, SourceError::ExtractionFailed { .. }));
    }

    #[tokio::test]
    async fn closed_session_stops_sampling() {
        let source = SimulatedSource::new(settings(0.01, 0.0));
        let session = source.open(&ticker()).await.unwrap();

        session.close().await.unwrap();
        assert!(session.sample().await.is_err());
        assert!(session.close().await.is_ok());
    }

    #[tokio::test]
    async fn out_of_range_settings_are_sanitised() {
        let source = SimulatedSource::seeded(settings(f64::NAN, 7.0), 5);
        let session = source.open(&ticker()).await.unwrap();
        assert!(session.sample().await.is_err());
    }

    #[test]
    fn format_rounds_to_cents() {
        assert_eq!(format_price(Decimal::new(123_455, 3)), "123.46");
        assert_eq!(format_price(Decimal::new(7, 0)), "7.00");
    }
}
