//! Domain Layer - Core pricing types and subscription bookkeeping.
//!
//! This layer contains the ticker identity, price samples, stream message
//! shapes, and the listener registry. Nothing here performs I/O.

/// Ticker identifiers and price samples.
pub mod market;

/// Stream message types and session states.
pub mod streaming;

/// Ticker to listener registry.
pub mod subscription;
