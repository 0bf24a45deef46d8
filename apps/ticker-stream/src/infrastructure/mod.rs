//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the process-level servers.

/// Stream client registry and per-client sinks.
pub mod broadcast;

/// Environment-driven configuration.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Trading HTTP API and NDJSON price stream.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Simulated and HTTP price sources.
pub mod source;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
