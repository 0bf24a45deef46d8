//! Stream Message Types
//!
//! The messages a stream client receives, one JSON object per line.
//! Every message carries a `type` tag and an epoch-millisecond timestamp.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::market::{PriceSample, Ticker};

/// Price text sent for a ticker that has not been sampled yet.
pub const PENDING_PRICE: &str = "pending";

// =============================================================================
// Messages
// =============================================================================

/// One line of a price stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Sent once when the stream opens.
    #[serde(rename_all = "camelCase")]
    Status {
        /// Human readable greeting.
        message: String,
        /// Tickers being monitored at open time.
        active_ticker_count: usize,
        /// Epoch milliseconds.
        timestamp: i64,
    },

    /// Latest known price for one ticker.
    #[serde(rename_all = "camelCase")]
    PriceUpdate {
        /// Ticker the price belongs to.
        ticker: Ticker,
        /// Price text or [`PENDING_PRICE`].
        price: String,
        /// Epoch milliseconds.
        timestamp: i64,
    },

    /// Closes every stream cycle.
    Heartbeat {
        /// Epoch milliseconds.
        timestamp: i64,
    },

    /// Terminal failure. The stream ends after this message.
    Error {
        /// Failure description.
        message: String,
        /// Epoch milliseconds.
        timestamp: i64,
    },
}

impl StreamMessage {
    /// Opening status message.
    #[must_use]
    pub fn status(active_ticker_count: usize) -> Self {
        Self::Status {
            message: "Connected to price stream".to_string(),
            active_ticker_count,
            timestamp: now_millis(),
        }
    }

    /// Price update, using [`PENDING_PRICE`] when no price is known.
    #[must_use]
    pub fn price_update(ticker: Ticker, price: Option<String>) -> Self {
        Self::PriceUpdate {
            ticker,
            price: price.unwrap_or_else(|| PENDING_PRICE.to_string()),
            timestamp: now_millis(),
        }
    }

    /// Price update built from a detected change.
    #[must_use]
    pub fn from_sample(sample: &PriceSample) -> Self {
        Self::PriceUpdate {
            ticker: sample.ticker.clone(),
            price: sample.price.clone(),
            timestamp: sample.observed_at.timestamp_millis(),
        }
    }

    /// Cycle heartbeat.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: now_millis(),
        }
    }

    /// Terminal error.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: now_millis(),
        }
    }

    /// Wire name of the message type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::PriceUpdate { .. } => "price_update",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize as a single newline-terminated JSON line.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; not expected for these types.
    pub fn to_ndjson_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle of one stream session.
///
/// Transitions only move forward: `Connecting → Streaming → Draining →
/// Closed`. `Connecting` may also go straight to `Draining`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Registered, status not yet emitted.
    Connecting,
    /// Emitting cycles and updates.
    Streaming,
    /// Terminating; cleanup pending.
    Draining,
    /// Cleanup done; no more messages.
    Closed,
}

impl SessionState {
    /// Whether moving to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Streaming | Self::Draining)
                | (Self::Streaming, Self::Draining)
                | (Self::Draining, Self::Closed)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Tests
// =============================================================================
