#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Ticker Stream - Price Monitor and Fan-out Service
//!
//! Polls a price source once per active ticker, detects price changes,
//! and multiplexes them to any number of line-delimited JSON stream clients.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `market`: Validated tickers and price samples
//!   - `subscription`: Ticker to listener registry
//!   - `streaming`: Stream wire messages and session states
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Price source and market snapshot interfaces
//!   - `services`: Monitors, monitor registry, stream sessions, trading facade
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `broadcast`: Stream client registry
//!   - `source`: Simulated and HTTP price sources
//!   - `http`: Trading API and NDJSON stream endpoint
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! PriceSource ──► TickerMonitor ──► SubscriptionRegistry ──► TradingFacade
//!  (per ticker)    (change only)                                  │
//!                                                                 ▼
//!                                  StreamSession ◄── ClientRegistry ──► Client N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core ticker and stream types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{PriceSample, Ticker, TickerError};
pub use domain::streaming::{SessionState, StreamMessage};
pub use domain::subscription::{PriceListener, SubscriberId, SubscriptionRegistry};

// Application
pub use application::ports::{PriceSession, PriceSource, SharedPriceSource, SourceError};
pub use application::services::monitor::TickerMonitor;
pub use application::services::orchestrator::{MonitorRegistry, MonitorSettings, ShutdownReport};
pub use application::services::stream::{StreamSession, StreamSettings};
pub use application::services::trading::{
    TradingError, TradingFacade, TradingSettings, TradingStatus,
};

// Infrastructure
pub use infrastructure::broadcast::{ClientId, ClientRegistry, ConnectionStats};
pub use infrastructure::config::{ConfigError, Environment, ServiceConfig, SourceSettings};
pub use infrastructure::health::{HealthServer, HealthServerState};
pub use infrastructure::http::{ApiServer, ServerError, create_router};
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
