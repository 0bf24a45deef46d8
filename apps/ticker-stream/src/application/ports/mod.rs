//! Port Interfaces
//!
//! Contracts between the monitoring pipeline and the outside world,
//! following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`PriceSource`]: opens a per-ticker sampling session
//! - [`PriceSession`]: produces one price string per call
//!
//! ## Driver Ports (Inbound)
//!
//! - [`MarketSnapshot`]: read view used by stream sessions

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::market::Ticker;

// =============================================================================
// Errors
// =============================================================================

/// Failure reported by a price source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// A session could not be opened for the ticker.
    #[error("price source unavailable for {ticker}: {reason}")]
    Unavailable {
        /// Ticker the session was requested for.
        ticker: String,
        /// Underlying cause.
        reason: String,
    },

    /// A sample was taken but no price could be read from it.
    #[error("failed to extract price for {ticker}: {reason}")]
    ExtractionFailed {
        /// Ticker being sampled.
        ticker: String,
        /// Underlying cause.
        reason: String,
    },

    /// Releasing the session failed.
    #[error("failed to close session for {ticker}: {reason}")]
    CloseFailed {
        /// Ticker whose session was closing.
        ticker: String,
        /// Underlying cause.
        reason: String,
    },
}

impl SourceError {
    /// Build an [`SourceError::Unavailable`].
    pub fn unavailable(ticker: &Ticker, reason: impl ToString) -> Self {
        Self::Unavailable {
            ticker: ticker.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Build an [`SourceError::ExtractionFailed`].
    pub fn extraction_failed(ticker: &Ticker, reason: impl ToString) -> Self {
        Self::ExtractionFailed {
            ticker: ticker.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Build an [`SourceError::CloseFailed`].
    pub fn close_failed(ticker: &Ticker, reason: impl ToString) -> Self {
        Self::CloseFailed {
            ticker: ticker.to_string(),
            reason: reason.to_string(),
        }
    }
}

// =============================================================================
// Price Source
// =============================================================================

/// Factory for per-ticker sampling sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Open a session that samples `ticker`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unavailable`] when the ticker cannot be
    /// sampled at all.
    async fn open(&self, ticker: &Ticker) -> Result<Arc<dyn PriceSession>, SourceError>;

    /// Short name for logs and health output.
    fn name(&self) -> &'static str;
}

/// One open sampling session for exactly one ticker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSession: Send + Sync {
    /// Take one sample, returning the formatted price text.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::ExtractionFailed`] when no price could be read.
    async fn sample(&self) -> Result<String, SourceError>;

    /// Release the session.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::CloseFailed`] when the release did not succeed.
    async fn close(&self) -> Result<(), SourceError>;
}

/// Shared price source handle.
pub type SharedPriceSource = Arc<dyn PriceSource>;

// =============================================================================
// Market Snapshot
// =============================================================================

/// Read-only view over the monitored ticker set.
#[cfg_attr(test, mockall::automock)]
pub trait MarketSnapshot: Send + Sync {
    /// Currently monitored tickers, sorted.
    fn active_tickers(&self) -> Vec<Ticker>;

    /// Last observed price for `ticker`, if any.
    fn current_price(&self, ticker: &Ticker) -> Option<String>;
}
