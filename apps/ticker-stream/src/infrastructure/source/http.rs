//! JSON-over-HTTP price source.
//!
//! Samples a price by GETting a per-ticker URL and reading the value at a
//! JSON pointer. The value may be a JSON string or number.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::application::ports::{PriceSession, PriceSource, SourceError};
use crate::domain::market::Ticker;
use crate::infrastructure::config::HttpSourceSettings;

/// Placeholder replaced by the ticker in the URL template.
pub const TICKER_PLACEHOLDER: &str = "{ticker}";

/// HTTP source construction error.
#[derive(Debug, thiserror::Error)]
pub enum HttpSourceError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// [`PriceSource`] backed by a JSON HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpJsonSource {
    client: reqwest::Client,
    url_template: String,
    pointer: String,
}

impl HttpJsonSource {
    /// Create a new HTTP source.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &HttpSourceSettings) -> Result<Self, HttpSourceError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            client,
            url_template: settings.url_template.clone(),
            pointer: settings.pointer.clone(),
        })
    }

    fn url_for(&self, ticker: &Ticker) -> String {
        self.url_template
            .replace(TICKER_PLACEHOLDER, ticker.as_str())
    }
}

#[async_trait]
impl PriceSource for HttpJsonSource {
    async fn open(&self, ticker: &Ticker) -> Result<Arc<dyn PriceSession>, SourceError> {
        let url = self.url_for(ticker);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::unavailable(ticker, e))?;

        if !response.status().is_success() {
            return Err(SourceError::unavailable(
                ticker,
                format!("probe returned {}", response.status()),
            ));
        }

        tracing::debug!(ticker = %ticker, url = %url, "HTTP price session opened");

        Ok(Arc::new(HttpSession {
            ticker: ticker.clone(),
            client: self.client.clone(),
            url,
            pointer: self.pointer.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

struct HttpSession {
    ticker: Ticker,
    client: reqwest::Client,
    url: String,
    pointer: String,
}

#[async_trait]
impl PriceSession for HttpSession {
    async fn sample(&self) -> Result<String, SourceError> {
        let body: Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SourceError::extraction_failed(&self.ticker, e))?
            .json()
            .await
            .map_err(|e| SourceError::extraction_failed(&self.ticker, e))?;

        extract_price(&body, &self.pointer)
            .ok_or_else(|| {
                SourceError::extraction_failed(
                    &self.ticker,
                    format!("no price at {}", self.pointer),
                )
            })
    }

    async fn close(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

fn extract_price(body: &Value, pointer: &str) -> Option<String> {
    match body.pointer(pointer)? {
        Value::String(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
