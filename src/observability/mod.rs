//! # Observability Module
//!
//! Structured logging initialisation and the counters recorded by import, export and
//! external login flows.

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
