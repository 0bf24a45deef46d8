//! Price Source Adapters
//!
//! Concrete [`PriceSource`](crate::application::ports::PriceSource)
//! implementations selected by configuration.

mod http;
mod simulated;

use std::sync::Arc;

pub use http::{HttpJsonSource, HttpSourceError};
pub use simulated::SimulatedSource;

use crate::application::ports::SharedPriceSource;
use crate::infrastructure::config::SourceSettings;

/// Build the configured price source.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be constructed.
pub fn from_settings(settings: &SourceSettings) -> Result<SharedPriceSource, HttpSourceError> {
    let source: SharedPriceSource = match settings {
        SourceSettings::Simulated(sim) => Arc::new(SimulatedSource::new(sim.clone())),
        SourceSettings::Http(http) => Arc::new(HttpJsonSource::new(http)?),
    };
    tracing::info!(source = source.name(), "Price source configured");
    Ok(source)
}
