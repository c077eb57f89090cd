//! Crunch - issue pipeline simulation
//!
//! A generator fills a bounded backlog with issues, a worker with finite
//! throughput works through the issues assigned to it, and a monitor turns
//! backlog pressure into a disapproval score. The run ends when disapproval
//! saturates.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): issues, errors, ports and the configuration model
//! - **Service Layer** (`services`): queues, event channels and the timed components
//! - **Infrastructure Layer** (`infrastructure`): configuration loading and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```no_run
//! use crunch::{Config, Session};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let session = Session::new(&Config::default())?;
//!     session.start();
//!     let summary = session.wait_for_end().await;
//!     println!("survived {}", summary.elapsed);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{Config, Issue, IssueId, IssueSnapshot, IssueStatus};
pub use domain::{ArgPosition, QueueGauge, SimError, SimResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    BoundedQueue, Clock, DisapprovalMonitor, IssueGenerator, PushRejected, QueueEvent, Session,
    SessionSummary, Worker,
};
