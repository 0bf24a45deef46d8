//! Trading HTTP API
//!
//! JSON command endpoints plus a line-delimited JSON price stream.
//!
//! # Endpoints
//!
//! - `POST /trading.v1.TradingService/AddTicker` - start monitoring a ticker
//! - `POST /trading.v1.TradingService/RemoveTicker` - stop monitoring a ticker
//! - `POST|GET /trading.v1.TradingService/StreamPrices` - NDJSON price stream
//! - `GET /status` - active tickers and stream count

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::trading::{TradingError, TradingFacade, TradingStatus};

/// Content type of the price stream.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Create the router with all trading endpoints.
pub fn create_router(facade: Arc<TradingFacade>) -> Router {
    Router::new()
        .route("/trading.v1.TradingService/AddTicker", post(add_ticker))
        .route("/trading.v1.TradingService/RemoveTicker", post(remove_ticker))
        .route(
            "/trading.v1.TradingService/StreamPrices",
            get(stream_prices).post(stream_prices),
        )
        .route("/status", get(status))
        .with_state(facade)
}

// =============================================================================
// Request / Response Types
// =============================================================================

/// Body of the ticker commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerRequest {
    /// Raw ticker symbol.
    pub ticker: String,
}

/// Empty success body.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Empty {}

/// Error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Human readable message.
    pub error: String,
    /// Stable error code.
    pub code: &'static str,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

// =============================================================================
// Handlers
// =============================================================================

async fn add_ticker(
    State(facade): State<Arc<TradingFacade>>,
    body: Result<Json<TickerRequest>, JsonRejection>,
) -> Result<Json<Empty>, ApiError> {
    let Json(request) = body?;
    facade.add_ticker(&request.ticker).await?;
    Ok(Json(Empty {}))
}

async fn remove_ticker(
    State(facade): State<Arc<TradingFacade>>,
    body: Result<Json<TickerRequest>, JsonRejection>,
) -> Result<Json<Empty>, ApiError> {
    let Json(request) = body?;
    facade.remove_ticker(&request.ticker).await?;
    Ok(Json(Empty {}))
}

async fn stream_prices(State(facade): State<Arc<TradingFacade>>) -> Result<Response, ApiError> {
    if facade.is_shutting_down() {
        return Err(ApiError::Trading(TradingError::ShuttingDown));
    }

    let session = facade.open_stream();
    tracing::info!(client_id = %session.client_id(), "Price stream opened");

    let lines = session
        .into_stream()
        .map(|message| message.to_ndjson_line());

    Ok((
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(lines),
    )
        .into_response())
}

async fn status(State(facade): State<Arc<TradingFacade>>) -> Json<TradingStatus> {
    Json(facade.status())
}

// =============================================================================
// Errors
// =============================================================================

/// API error converted into a JSON error response.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body could not be parsed.
    #[error("invalid request body: {0}")]
    BadRequest(String),
    /// A facade command failed.
    #[error(transparent)]
    Trading(#[from] TradingError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Trading(TradingError::Validation(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Trading(TradingError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Trading(TradingError::Duplicate(_)) => StatusCode::CONFLICT,
            Self::Trading(TradingError::Capacity { .. }) => StatusCode::TOO_MANY_REQUESTS,
            Self::Trading(TradingError::Source(_)) => StatusCode::BAD_GATEWAY,
            Self::Trading(TradingError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_REQUEST",
            Self::Trading(error) => error.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Request rejected");
        }

        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Server
// =============================================================================

/// Trading API HTTP server.
pub struct ApiServer {
    port: u16,
    facade: Arc<TradingFacade>,
    cancel: CancellationToken,
}

impl ApiServer {
    /// Create a new API server.
    #[must_use]
    pub const fn new(port: u16, facade: Arc<TradingFacade>, cancel: CancellationToken) -> Self {
        Self {
            port,
            facade,
            cancel,
        }
    }

    /// Run the API server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the server stops with
    /// an error.
    pub async fn run(self) -> Result<(), ServerError> {
        serve("Trading API", self.port, create_router(self.facade), self.cancel).await
    }
}

/// Bind `port` on all interfaces and serve `app` until `cancel` fires.
///
/// # Errors
///
/// Returns `ServerError` if binding fails or axum reports a fatal error.
pub async fn serve(
    name: &'static str,
    port: u16,
    app: Router,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::BindFailed(port, e.to_string()))?;

    tracing::info!(server = name, port, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

    tracing::info!(server = name, "Stopped");
    Ok(())
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::application::ports::SourceError;
    use crate::domain::market::{Ticker, TickerError};

    fn ticker() -> Ticker {
        Ticker::parse("AAPL").unwrap()
    }

    #[test_case(ApiError::BadRequest("eof".into()), StatusCode::BAD_REQUEST, "INVALID_REQUEST" ; "bad body")]
    #[test_case(TradingError::Validation(TickerError::Empty).into(), StatusCode::BAD_REQUEST, "INVALID_TICKER" ; "validation")]
    #[test_case(TradingError::NotFound(ticker()).into(), StatusCode::NOT_FOUND, "TICKER_NOT_FOUND" ; "not found")]
    #[test_case(TradingError::Duplicate(ticker()).into(), StatusCode::CONFLICT, "TICKER_ALREADY_EXISTS" ; "duplicate")]
    #[test_case(TradingError::Capacity { limit: 1 }.into(), StatusCode::TOO_MANY_REQUESTS, "MAX_TICKERS_REACHED" ; "capacity")]
    #[test_case(TradingError::Source(SourceError::unavailable(&ticker(), "down")).into(), StatusCode::BAD_GATEWAY, "SUBSCRIPTION_FAILED" ; "source")]
    #[test_case(TradingError::ShuttingDown.into(), StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN" ; "shutting down")]
    fn error_mapping(error: ApiError, status: StatusCode, code: &str) {
        assert_eq!(error.status(), status);
        assert_eq!(error.code(), code);
    }

    #[test]
    fn empty_body_serializes_as_object() {
        assert_eq!(serde_json::to_string(&Empty {}).unwrap(), "{}");
    }
}
