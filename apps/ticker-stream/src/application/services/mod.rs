//! Application Services
//!
//! Services that run the monitoring pipeline and coordinate between ports.
//!
//! - `monitor`: per-ticker poll loop with change detection
//! - `orchestrator`: one monitor and session per subscribed ticker
//! - `stream`: per-client message sequence
//! - `trading`: facade used by the transport layer

/// Bounded retry for price samples.
pub mod retry;

/// Per-ticker polling worker.
pub mod monitor;

/// Monitor registry.
pub mod orchestrator;

/// Per-client stream sessions.
pub mod stream;

/// Trading facade.
pub mod trading;
