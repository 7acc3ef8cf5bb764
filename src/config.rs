//! Runtime configuration: optional TOML file, serde defaults, env overrides.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Pause between a rejected primary query and the secondary attempt
    pub fallback_delay_ms: u64,
    pub fallback_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Wait before re-opening a secondary listener that failed to open
    pub retry_interval_secs: u64,
    pub poll_interval_ms: u64,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            fallback_delay_ms: 250,
            fallback_timeout_secs: 30,
            read_timeout_secs: 30,
            retry_interval_secs: 5,
            poll_interval_ms: 2000,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from `path` if given, then apply environment overrides.
    ///
    /// A missing file is a configuration error; an absent `--config` flag
    /// just means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("failed to read {}: {e}", path.display()))
                })?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid TOML: {e}")))
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(ms) = env_u64("EVAL_FALLBACK_DELAY_MS") {
            self.fallback_delay_ms = ms;
        }
        if let Some(ms) = env_u64("EVAL_POLL_INTERVAL_MS") {
            self.poll_interval_ms = ms;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("fallback_timeout_secs", self.fallback_timeout_secs),
            ("read_timeout_secs", self.read_timeout_secs),
            ("retry_interval_secs", self.retry_interval_secs),
            ("poll_interval_ms", self.poll_interval_ms),
            ("max_connections", u64::from(self.max_connections)),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_secs(self.fallback_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml("fallback_delay_ms = 300\nlog_filter = \"debug\"").unwrap();
        assert_eq!(config.fallback_delay_ms, 300);
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.read_timeout_secs, 30);
        assert_eq!(config.max_connections, 5);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = Config {
            read_timeout_secs: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn malformed_toml_is_config_error() {
        assert!(matches!(
            Config::from_toml("fallback_delay_ms = \"soon\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rankings.toml");
        std::fs::write(&path, "retry_interval_secs = 9\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.retry_interval(), Duration::from_secs(9));
    }
}
