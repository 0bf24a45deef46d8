//! Service Configuration Settings
//!
//! Configuration types for the ticker stream service, loaded from
//! environment variables. Unparseable numbers fall back to their defaults;
//! values that cannot work (zero intervals, zero capacity, an HTTP source
//! without a URL) are rejected.

use std::time::Duration;

use crate::application::services::orchestrator::MonitorSettings;
use crate::application::services::retry::RetryConfig;
use crate::application::services::stream::StreamSettings;
use crate::application::services::trading::TradingSettings;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Local development.
    #[default]
    Development,
    /// Production deployment.
    Production,
}

impl Environment {
    /// Parse environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    /// Check if this is production.
    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Trading API port.
    pub port: u16,
    /// Health check and metrics port.
    pub health_port: u16,
    /// Time allowed for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            health_port: 8082,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Simulated random-walk source settings.
#[derive(Debug, Clone)]
pub struct SimulatedSettings {
    /// Maximum relative move per sample (0.002 = ±0.2%).
    pub volatility: f64,
    /// Probability that a sample fails.
    pub failure_rate: f64,
}

impl Default for SimulatedSettings {
    fn default() -> Self {
        Self {
            volatility: 0.002,
            failure_rate: 0.0,
        }
    }
}

/// HTTP JSON source settings.
#[derive(Debug, Clone)]
pub struct HttpSourceSettings {
    /// URL with a `{ticker}` placeholder.
    pub url_template: String,
    /// JSON pointer to the price field.
    pub pointer: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Which price source to run.
#[derive(Debug, Clone)]
pub enum SourceSettings {
    /// Random-walk source.
    Simulated(SimulatedSettings),
    /// JSON-over-HTTP source.
    Http(HttpSourceSettings),
}

impl SourceSettings {
    /// Short name of the source kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Simulated(_) => "simulated",
            Self::Http(_) => "http",
        }
    }
}

/// Monitoring pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Monitor polling cadence.
    pub polling_interval: Duration,
    /// Ceiling on monitored tickers.
    pub max_active_tickers: usize,
    /// Retries after a failed sample.
    pub sample_max_retries: u32,
    /// Delay between sample retries.
    pub sample_retry_delay: Duration,
    /// Stream cycle cadence.
    pub stream_interval: Duration,
    /// Per-client update buffer.
    pub stream_buffer: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_millis(2000),
            max_active_tickers: 100,
            sample_max_retries: 2,
            sample_retry_delay: Duration::from_millis(500),
            stream_interval: Duration::from_millis(2000),
            stream_buffer: 256,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Deployment environment.
    pub environment: Environment,
    /// Server ports and shutdown.
    pub server: ServerSettings,
    /// Pipeline cadence and limits.
    pub pipeline: PipelineSettings,
    /// Price source selection.
    pub source: SourceSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            server: ServerSettings::default(),
            pipeline: PipelineSettings::default(),
            source: SourceSettings::Simulated(SimulatedSettings::default()),
        }
    }
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let environment = env
            .get("TICKER_STREAM_ENV")
            .map(|s| Environment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            port: env.parse("PORT", server_defaults.port),
            health_port: env.parse("HEALTH_PORT", server_defaults.health_port),
            shutdown_timeout: env.millis(
                "GRACEFUL_SHUTDOWN_TIMEOUT_MS",
                server_defaults.shutdown_timeout,
            ),
        };

        let defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            polling_interval: env.millis("POLLING_INTERVAL_MS", defaults.polling_interval),
            max_active_tickers: env.parse("MAX_ACTIVE_TICKERS", defaults.max_active_tickers),
            sample_max_retries: env.parse("SAMPLE_MAX_RETRIES", defaults.sample_max_retries),
            sample_retry_delay: env.millis("SAMPLE_RETRY_DELAY_MS", defaults.sample_retry_delay),
            stream_interval: env.millis("STREAM_INTERVAL_MS", defaults.stream_interval),
            stream_buffer: env.parse("STREAM_BUFFER", defaults.stream_buffer),
        };

        require_nonzero("POLLING_INTERVAL_MS", pipeline.polling_interval.is_zero())?;
        require_nonzero("STREAM_INTERVAL_MS", pipeline.stream_interval.is_zero())?;
        require_nonzero("MAX_ACTIVE_TICKERS", pipeline.max_active_tickers == 0)?;
        require_nonzero("STREAM_BUFFER", pipeline.stream_buffer == 0)?;

        let source = match env
            .get("PRICE_SOURCE")
            .map(|s| s.trim().to_lowercase())
            .as_deref()
        {
            None | Some("" | "simulated") => {
                let defaults = SimulatedSettings::default();
                SourceSettings::Simulated(SimulatedSettings {
                    volatility: env.parse("SIMULATED_VOLATILITY", defaults.volatility),
                    failure_rate: env
                        .parse("SIMULATED_FAILURE_RATE", defaults.failure_rate)
                        .clamp(0.0, 1.0),
                })
            }
            Some("http") => {
                let url_template = env
                    .get("PRICE_SOURCE_URL")
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| ConfigError::MissingEnvVar("PRICE_SOURCE_URL".to_string()))?;
                SourceSettings::Http(HttpSourceSettings {
                    url_template,
                    pointer: env
                        .get("PRICE_SOURCE_POINTER")
                        .unwrap_or_else(|| "/price".to_string()),
                    timeout: env.millis("PRICE_SOURCE_TIMEOUT_MS", Duration::from_millis(5000)),
                })
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "PRICE_SOURCE".to_string(),
                    value: other.to_string(),
                });
            }
        };

        Ok(Self {
            environment,
            server,
            pipeline,
            source,
        })
    }

    /// Facade settings derived from the pipeline section.
    #[must_use]
    pub fn trading_settings(&self) -> TradingSettings {
        TradingSettings {
            max_active_tickers: self.pipeline.max_active_tickers,
            monitor: MonitorSettings {
                polling_interval: self.pipeline.polling_interval,
                retry: RetryConfig::fixed(
                    self.pipeline.sample_max_retries,
                    self.pipeline.sample_retry_delay,
                ),
            },
            stream: StreamSettings {
                cycle_interval: self.pipeline.stream_interval,
                buffer: self.pipeline.stream_buffer,
            },
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable must be greater than zero.
    #[error("environment variable {0} must be greater than zero")]
    ZeroValue(String),
    /// Environment variable has an unsupported value.
    #[error("environment variable {key} has unsupported value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}

fn require_nonzero(key: &str, is_zero: bool) -> Result<(), ConfigError> {
    if is_zero {
        Err(ConfigError::ZeroValue(key.to_string()))
    } else {
        Ok(())
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
