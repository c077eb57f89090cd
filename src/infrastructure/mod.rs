//! Infrastructure layer module
//!
//! Configuration loading and logging setup. Nothing in the simulation core
//! depends on this layer.

pub mod config;
pub mod logging;
