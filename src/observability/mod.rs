//! # Observability
//!
//! Structured logging setup and the reconciliation counters. Metrics are emitted through
//! the `metrics` facade; exporting them is left to whichever recorder the embedding
//! process installs.

// Structured logging
pub mod logging;

// Reconciliation counters
pub mod metrics;

pub use logging::init_logging;
