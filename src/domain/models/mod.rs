pub mod config;
pub mod issue;

pub use config::{
    AutopilotConfig, BacklogConfig, ClockConfig, Config, GeneratorConfig, LoggingConfig,
    MonitorConfig, WorkerConfig,
};
pub use issue::{round2, IdSequence, Issue, IssueId, IssueSnapshot, IssueStatus};
