//! Host configuration
//!
//! Durations are stored as integers so the TOML stays readable:
//!
//! ```toml
//! keep_clean = true
//! wait_time_ms = 1000
//! sweep_interval_secs = 60
//! max_sessions = 512
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default time to wait for sessions to close during shutdown
pub const DEFAULT_WAIT_TIME_MS: u64 = 1000;

/// Default period between sweeps of dead sessions
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Configuration applied to a service host while it is still Ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Periodically evict sessions whose connection is gone
    pub keep_clean: bool,
    /// Upper bound on the shutdown drain, in milliseconds
    pub wait_time_ms: u64,
    /// Seconds between sweeps
    pub sweep_interval_secs: u64,
    /// Maximum number of concurrent sessions (unbounded if unset)
    pub max_sessions: Option<usize>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            keep_clean: true,
            wait_time_ms: DEFAULT_WAIT_TIME_MS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            max_sessions: None,
        }
    }
}

impl HostConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: HostConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Reject values the host would refuse at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wait_time_ms == 0 {
            return Err(ConfigError::Invalid(
                "wait_time_ms must be greater than zero".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_sessions == Some(0) {
            return Err(ConfigError::Invalid(
                "max_sessions must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Shutdown wait time
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }

    /// Sweep period
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Validate a wait time, returning the reason it is rejected
pub fn check_wait_time(wait_time: Duration) -> Option<String> {
    wait_time
        .is_zero()
        .then(|| "A wait time is zero or less.".to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_values() {
        let config = HostConfig::default();
        assert!(config.keep_clean);
        assert_eq!(config.wait_time(), Duration::from_secs(1));
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        assert!(config.max_sessions.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = HostConfig::from_toml_str("wait_time_ms = 250").unwrap();
        assert_eq!(config.wait_time(), Duration::from_millis(250));
        assert!(config.keep_clean);
        assert_eq!(config.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS);
    }

    #[test]
    fn test_full_toml() {
        let toml_str = r#"
keep_clean = false
wait_time_ms = 5000
sweep_interval_secs = 10
max_sessions = 64
"#;
        let config = HostConfig::from_toml_str(toml_str).unwrap();
        assert!(!config.keep_clean);
        assert_eq!(config.wait_time(), Duration::from_secs(5));
        assert_eq!(config.sweep_interval(), Duration::from_secs(10));
        assert_eq!(config.max_sessions, Some(64));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = HostConfig {
            keep_clean: false,
            wait_time_ms: 42,
            sweep_interval_secs: 7,
            max_sessions: Some(3),
        };
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = HostConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_zero_wait_time_rejected() {
        let result = HostConfig::from_toml_str("wait_time_ms = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let result = HostConfig::from_toml_str("sweep_interval_secs = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_max_sessions_rejected() {
        let result = HostConfig::from_toml_str("max_sessions = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result = HostConfig::from_toml_str("keep_clean = \"sometimes\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "keep_clean = false").unwrap();
        writeln!(file, "wait_time_ms = 300").unwrap();

        let config = HostConfig::load(file.path()).unwrap();
        assert!(!config.keep_clean);
        assert_eq!(config.wait_time(), Duration::from_millis(300));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = HostConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_check_wait_time() {
        assert!(check_wait_time(Duration::ZERO).is_some());
        assert!(check_wait_time(Duration::from_nanos(1)).is_none());
    }
}
