use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::services::bounded_queue::{MAX_QUEUE_CAPACITY, MIN_QUEUE_CAPACITY};

/// Project-local configuration directory
pub const CONFIG_DIR: &str = ".crunch";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "CRUNCH_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {section} capacity: {value}. Must be between 1 and 20")]
    InvalidCapacity { section: &'static str, value: usize },

    #[error("Invalid work_points: {0}. Must be positive")]
    InvalidWorkPoints(f64),

    #[error("Invalid {name} penalty: {value}. Must be between 0 and 1")]
    InvalidPenalty { name: &'static str, value: f64 },

    #[error("Invalid generation rate: {0}. Must be strictly between 0 and 1")]
    InvalidRate(f64),

    #[error("Project names cannot be empty")]
    EmptyProjectNames,

    #[error("Invalid {0}: must be at least 1 millisecond")]
    InvalidInterval(&'static str),

    #[error("Invalid max_increase: {0}. Must be a non-negative number")]
    InvalidMaxIncrease(f64),

    #[error("Invalid max_stress: {0}. Must be between 0 and 100")]
    InvalidMaxStress(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .crunch/config.yaml (project config)
    /// 3. .crunch/local.yaml (local overrides, optional)
    /// 4. Environment variables (CRUNCH_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment()
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, with environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment() -> Figment {
        let dir = Path::new(CONFIG_DIR);
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    ///
    /// Enforces the same ranges the simulation components check on
    /// construction, so a bad file is reported before anything starts.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let queue_range = MIN_QUEUE_CAPACITY..=MAX_QUEUE_CAPACITY;

        if !queue_range.contains(&config.backlog.capacity) {
            return Err(ConfigError::InvalidCapacity {
                section: "backlog",
                value: config.backlog.capacity,
            });
        }

        // Worker
        let worker = &config.worker;
        if !queue_range.contains(&worker.max_active_issues) {
            return Err(ConfigError::InvalidCapacity {
                section: "worker",
                value: worker.max_active_issues,
            });
        }
        if !worker.work_points.is_finite() || worker.work_points <= 0.0 {
            return Err(ConfigError::InvalidWorkPoints(worker.work_points));
        }
        if worker.term_interval_ms == 0 {
            return Err(ConfigError::InvalidInterval("term_interval_ms"));
        }
        for (name, value) in [
            ("issue", worker.issue_penalty),
            ("project", worker.project_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidPenalty { name, value });
            }
        }

        // Generator
        let generator = &config.generator;
        if !(generator.rate > 0.0 && generator.rate < 1.0) {
            return Err(ConfigError::InvalidRate(generator.rate));
        }
        if generator.project_names.is_empty()
            || generator.project_names.iter().any(|name| name.trim().is_empty())
        {
            return Err(ConfigError::EmptyProjectNames);
        }

        // Monitor, clock and autopilot
        if config.monitor.sample_interval_ms == 0 {
            return Err(ConfigError::InvalidInterval("sample_interval_ms"));
        }
        if !config.monitor.max_increase.is_finite() || config.monitor.max_increase < 0.0 {
            return Err(ConfigError::InvalidMaxIncrease(config.monitor.max_increase));
        }
        if config.clock.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidInterval("tick_interval_ms"));
        }
        if config.autopilot.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidInterval("poll_interval_ms"));
        }
        if !(0.0..=100.0).contains(&config.autopilot.max_stress) {
            return Err(ConfigError::InvalidMaxStress(config.autopilot.max_stress));
        }

        // Logging
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backlog.capacity, 10);
        assert_eq!(config.worker.max_active_issues, 5);
        assert!((config.worker.work_points - 4.0).abs() < f64::EPSILON);
        assert!((config.generator.rate - 0.05).abs() < f64::EPSILON);
        assert_eq!(config.generator.project_names, vec!["Lenono", "Apple", "Qmartic"]);
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
backlog:
  capacity: 15
worker:
  max_active_issues: 3
  work_points: 6.5
generator:
  project_names: [Alpha, Beta]
  rate: 0.2
  seed: 99
logging:
  level: debug
  format: json
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.backlog.capacity, 15);
        assert_eq!(config.worker.max_active_issues, 3);
        assert!((config.worker.work_points - 6.5).abs() < f64::EPSILON);
        assert_eq!(config.worker.term_interval_ms, 1000);
        assert_eq!(config.generator.project_names, vec!["Alpha", "Beta"]);
        assert_eq!(config.generator.seed, Some(99));
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.monitor.sample_interval_ms, 1000);

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_capacity_bounds() {
        for capacity in [0, 21] {
            let mut config = Config::default();
            config.backlog.capacity = capacity;
            assert!(matches!(
                ConfigLoader::validate(&config),
                Err(ConfigError::InvalidCapacity { section: "backlog", .. })
            ));
        }

        let mut config = Config::default();
        config.worker.max_active_issues = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidCapacity { section: "worker", value: 0 })
        ));
    }

    #[test]
    fn test_validate_work_points() {
        let mut config = Config::default();
        config.worker.work_points = 0.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidWorkPoints(_))
        ));
    }

    #[test]
    fn test_validate_penalties() {
        let mut config = Config::default();
        config.worker.project_penalty = 1.5;
        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidPenalty { name, .. }) => assert_eq!(name, "project"),
            other => panic!("Expected InvalidPenalty error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rate() {
        for rate in [0.0, 1.0, -0.5, f64::NAN] {
            let mut config = Config::default();
            config.generator.rate = rate;
            assert!(matches!(
                ConfigLoader::validate(&config),
                Err(ConfigError::InvalidRate(_))
            ));
        }
    }

    #[test]
    fn test_validate_project_names() {
        let mut config = Config::default();
        config.generator.project_names.clear();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyProjectNames)
        ));

        config.generator.project_names = vec!["Apple".to_string(), "  ".to_string()];
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyProjectNames)
        ));
    }

    #[test]
    fn test_validate_intervals() {
        let mut config = Config::default();
        config.clock.tick_interval_ms = 0;
        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidInterval(name)) => assert_eq!(name, "tick_interval_ms"),
            other => panic!("Expected InvalidInterval error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogLevel(level)) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();

        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogFormat(format)) => assert_eq!(format, "xml"),
            other => panic!("Expected InvalidLogFormat error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = ConfigLoader::load_from_file("/nonexistent/crunch.yaml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_load_from_file_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "generator:\n  rate: 2.0").unwrap();
        file.flush().unwrap();

        let err = ConfigLoader::load_from_file(file.path()).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn test_env_override() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "worker:\n  work_points: 3.0\nlogging:\n  level: warn").unwrap();
        file.flush().unwrap();

        temp_env::with_vars(
            [
                ("CRUNCH_WORKER__WORK_POINTS", Some("7.5")),
                ("CRUNCH_BACKLOG__CAPACITY", Some("12")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert!((config.worker.work_points - 7.5).abs() < f64::EPSILON);
                assert_eq!(config.backlog.capacity, 12);
                assert_eq!(config.logging.level, "warn");
            },
        );
    }

    #[test]
    fn test_hierarchical_merging() {
        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "backlog:\n  capacity: 8\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "backlog:\n  capacity: 16\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.backlog.capacity, 16, "Override should win");
        assert_eq!(
            config.logging.level, "debug",
            "Override should win for nested fields"
        );
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
        assert_eq!(config.worker.max_active_issues, 5, "Defaults fill the rest");
    }
}
