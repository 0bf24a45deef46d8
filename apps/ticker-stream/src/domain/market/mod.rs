//! Market Identity Types
//!
//! Ticker identifiers and the price samples produced for them.
//!
//! A [`Ticker`] can only be built through [`Ticker::parse`], so every
//! ticker that reaches a registry has already been normalised and checked
//! against `^[A-Z0-9]{2,15}$`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum ticker length after normalisation.
pub const MIN_TICKER_LEN: usize = 2;

/// Maximum ticker length after normalisation.
pub const MAX_TICKER_LEN: usize = 15;

// =============================================================================
// Ticker
// =============================================================================

/// A normalised instrument identifier (e.g. `BTCUSD`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    /// Parse and normalise a raw ticker string.
    ///
    /// Surrounding whitespace is trimmed and letters are uppercased before
    /// validation.
    ///
    /// # Errors
    ///
    /// Returns [`TickerError`] when the normalised value is empty, outside
    /// the allowed length range, or contains anything but ASCII letters and
    /// digits.
    pub fn parse(raw: &str) -> Result<Self, TickerError> {
        let normalized = raw.trim().to_ascii_uppercase();

        if normalized.is_empty() {
            return Err(TickerError::Empty);
        }

        if let Some(invalid) = normalized.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(TickerError::InvalidCharacter {
                ticker: normalized,
                invalid,
            });
        }

        let len = normalized.len();
        if len < MIN_TICKER_LEN {
            return Err(TickerError::TooShort(normalized));
        }
        if len > MAX_TICKER_LEN {
            return Err(TickerError::TooLong(normalized));
        }

        Ok(Self(normalized))
    }

    /// The normalised ticker text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Ticker {
    type Err = TickerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Ticker {
    type Error = TickerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Ticker> for String {
    fn from(ticker: Ticker) -> Self {
        ticker.0
    }
}

impl AsRef<str> for Ticker {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Ticker validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickerError {
    /// Nothing left after trimming.
    #[error("ticker cannot be empty")]
    Empty,

    /// Fewer than [`MIN_TICKER_LEN`] characters.
    #[error("ticker {0} is too short - must be at least {MIN_TICKER_LEN} characters")]
    TooShort(String),

    /// More than [`MAX_TICKER_LEN`] characters.
    #[error("ticker {0} is too long - must be {MAX_TICKER_LEN} characters or less")]
    TooLong(String),

    /// Contains a character outside `[A-Z0-9]`.
    #[error("ticker {ticker} contains invalid character {invalid:?} - only letters and numbers allowed")]
    InvalidCharacter {
        /// The normalised input.
        ticker: String,
        /// First offending character.
        invalid: char,
    },
}

// =============================================================================
// Price Sample
// =============================================================================

/// One observed price for a ticker.
///
/// The price is opaque: formatting is owned by the source that produced it,
/// and change detection compares the exact string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSample {
    /// Ticker the price belongs to.
    pub ticker: Ticker,
    /// Source-formatted price text.
    pub price: String,
    /// When the sample was taken.
    pub observed_at: DateTime<Utc>,
}

impl PriceSample {
    /// Create a sample observed now.
    #[must_use]
    pub fn new(ticker: Ticker, price: impl Into<String>) -> Self {
        Self {
            ticker,
            price: price.into(),
            observed_at: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    #[test_case("BTCUSD", "BTCUSD" ; "already normalised")]
    #[test_case("btcusd", "BTCUSD" ; "lowercase")]
    #[test_case("  ethUsd \n", "ETHUSD" ; "padded mixed case")]
    #[test_case("A1", "A1" ; "minimum length")]
    #[test_case("ABCDEFGHIJKLMNO", "ABCDEFGHIJKLMNO" ; "maximum length")]
    fn parse_accepts(raw: &str, expected: &str) {
        assert_eq!(Ticker::parse(raw).unwrap().as_str(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "whitespace only")]
    #[test_case("B" ; "too short")]
    #[test_case("ABCDEFGHIJKLMNOP" ; "too long")]
    #[test_case("BTC-USD" ; "dash")]
    #[test_case("BTC USD" ; "inner space")]
    #[test_case("BTC/USD" ; "slash")]
    #[test_case("ÄBC" ; "non ascii letter")]
    fn parse_rejects(raw: &str) {
        assert!(Ticker::parse(raw).is_err());
    }

    #[test]
    fn parse_reports_specific_error() {
        assert_eq!(Ticker::parse(" "), Err(TickerError::Empty));
        assert_eq!(
            Ticker::parse("x"),
            Err(TickerError::TooShort("X".to_string()))
        );
        assert!(matches!(
            Ticker::parse("BTC-USD"),
            Err(TickerError::InvalidCharacter { invalid: '-', .. })
        ));
    }

    #[test]
    fn serde_round_trips_through_string() {
        let ticker = Ticker::parse("solusd").unwrap();
        assert_eq!(serde_json::to_string(&ticker).unwrap(), "\"SOLUSD\"");

        let parsed: Ticker = serde_json::from_str("\"solusd\"").unwrap();
        assert_eq!(parsed, ticker);

        assert!(serde_json::from_str::<Ticker>("\"s\"").is_err());
    }

    #[test]
    fn sample_serializes_camel_case() {
        let sample = PriceSample::new(Ticker::parse("BTCUSD").unwrap(), "64,012.55");
        let json = serde_json::to_value(&sample).unwrap();

        assert_eq!(json["ticker"], "BTCUSD");
        assert_eq!(json["price"], "64,012.55");
        assert!(json.get("observedAt").is_some());
    }

    proptest! {
        #[test]
        fn any_valid_shape_normalises_to_uppercase(raw in "[a-zA-Z0-9]{2,15}") {
            let ticker = Ticker::parse(&raw).unwrap();
            prop_assert_eq!(ticker.as_str(), raw.to_ascii_uppercase());
        }

        #[test]
        fn overlong_input_is_rejected(raw in "[A-Z0-9]{16,40}") {
            prop_assert!(matches!(Ticker::parse(&raw), Err(TickerError::TooLong(_))));
        }
    }
}
