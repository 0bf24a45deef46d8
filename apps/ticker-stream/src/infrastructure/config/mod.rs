//! Configuration Module
//!
//! Environment-driven configuration for the ticker stream service.

mod settings;

pub use settings::{
    ConfigError, Environment, HttpSourceSettings, PipelineSettings, ServerSettings,
    ServiceConfig, SimulatedSettings, SourceSettings,
};
