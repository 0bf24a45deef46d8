//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the monitoring services and the port interfaces
//! that define how the pipeline reaches price sources.

/// Port interfaces for price sources and market snapshots.
pub mod ports;

/// Monitoring, orchestration and streaming services.
pub mod services;
