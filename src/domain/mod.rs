//! Domain layer for the crunch simulation
//!
//! This module contains the issue model, the error taxonomy and the ports the
//! services depend on.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{ArgPosition, SimError, SimResult};
pub use ports::QueueGauge;
