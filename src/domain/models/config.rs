use serde::{Deserialize, Serialize};

/// Main configuration structure for a crunch session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Backlog queue configuration
    #[serde(default)]
    pub backlog: BacklogConfig,

    /// Worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Issue generator configuration
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Disapproval monitor configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Session clock configuration
    #[serde(default)]
    pub clock: ClockConfig,

    /// Automatic issue assignment
    #[serde(default)]
    pub autopilot: AutopilotConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Log file rotation: daily, hourly or never
    #[serde(default = "default_log_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_log_rotation(),
        }
    }
}

/// Backlog ("todo") queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BacklogConfig {
    /// Maximum number of waiting issues (1-20)
    #[serde(default = "default_backlog_capacity")]
    pub capacity: usize,
}

const fn default_backlog_capacity() -> usize {
    10
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            capacity: default_backlog_capacity(),
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Capacity of the worker's active queue (1-20)
    #[serde(default = "default_max_active_issues")]
    pub max_active_issues: usize,

    /// Base throughput per term, in complexity units
    #[serde(default = "default_work_points")]
    pub work_points: f64,

    /// Length of one work term in milliseconds
    #[serde(default = "default_term_interval_ms")]
    pub term_interval_ms: u64,

    /// Weight of the per-issue context switch penalty
    #[serde(default = "default_issue_penalty")]
    pub issue_penalty: f64,

    /// Weight of the per-project context switch penalty
    #[serde(default = "default_project_penalty")]
    pub project_penalty: f64,
}

const fn default_max_active_issues() -> usize {
    5
}

const fn default_work_points() -> f64 {
    4.0
}

const fn default_term_interval_ms() -> u64 {
    1000
}

const fn default_issue_penalty() -> f64 {
    0.5
}

const fn default_project_penalty() -> f64 {
    0.8
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_active_issues: default_max_active_issues(),
            work_points: default_work_points(),
            term_interval_ms: default_term_interval_ms(),
            issue_penalty: default_issue_penalty(),
            project_penalty: default_project_penalty(),
        }
    }
}

/// Issue generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GeneratorConfig {
    /// Project names issues are drawn from
    #[serde(default = "default_project_names")]
    pub project_names: Vec<String>,

    /// Share of the backlog capacity produced per second, in (0, 1)
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_project_names() -> Vec<String> {
    vec![
        "Lenono".to_string(),
        "Apple".to_string(),
        "Qmartic".to_string(),
    ]
}

const fn default_rate() -> f64 {
    0.05
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            project_names: default_project_names(),
            rate: default_rate(),
            seed: None,
        }
    }
}

/// Disapproval monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Sampling period in milliseconds
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Disapproval added per sample when the backlog is full
    #[serde(default = "default_max_increase")]
    pub max_increase: f64,
}

const fn default_sample_interval_ms() -> u64 {
    1000
}

const fn default_max_increase() -> f64 {
    8.0
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            max_increase: default_max_increase(),
        }
    }
}

/// Session clock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClockConfig {
    /// Tick period in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

const fn default_tick_interval_ms() -> u64 {
    1000
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Automatic assignment of backlog issues to the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AutopilotConfig {
    /// Whether issues are assigned without a player
    #[serde(default = "default_autopilot_enabled")]
    pub enabled: bool,

    /// How often the autopilot looks for work to assign, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Stop assigning while the worker's stress is at or above this value
    #[serde(default = "default_max_stress")]
    pub max_stress: f64,
}

const fn default_autopilot_enabled() -> bool {
    true
}

const fn default_poll_interval_ms() -> u64 {
    250
}

const fn default_max_stress() -> f64 {
    100.0
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            enabled: default_autopilot_enabled(),
            poll_interval_ms: default_poll_interval_ms(),
            max_stress: default_max_stress(),
        }
    }
}
