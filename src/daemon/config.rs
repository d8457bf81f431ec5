use std::{io::ErrorKind, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::utils::time::duration_millis;

use super::categorize::DEFAULT_WINDOW_TITLE_MAX_LEN;

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Tunables of the tracker. Every field has a default, so a config file only needs to mention
/// what it changes. Durations are written in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    #[serde(with = "duration_millis")]
    pub tick_interval: Duration,
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    #[serde(with = "duration_millis")]
    pub idle_threshold: Duration,
    #[serde(with = "duration_millis")]
    pub idle_sample_interval: Duration,
    #[serde(with = "duration_millis")]
    pub input_poll_interval: Duration,
    pub persist_max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub persist_initial_backoff: Duration,
    pub persist_queue_capacity: usize,
    pub window_title_max_len: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(5),
            idle_threshold: Duration::from_secs(180),
            idle_sample_interval: Duration::from_secs(5),
            input_poll_interval: Duration::from_secs(1),
            persist_max_attempts: 3,
            persist_initial_backoff: Duration::from_millis(100),
            persist_queue_capacity: 64,
            window_title_max_len: DEFAULT_WINDOW_TITLE_MAX_LEN,
        }
    }
}

impl TrackerConfig {
    /// Reads the config at `path`. A missing file means defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config at {path:?}, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {path:?}")),
        };

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Config {path:?} is malformed"))?;
        info!("Loaded config from {path:?}");
        Ok(config.sanitized())
    }

    /// Shortest session that is kept: one tick, and never less than a second. A quarter of a
    /// tick is taken off to absorb wakeup jitter between consecutive ticks.
    pub fn min_session_duration(&self) -> Duration {
        let nominal = self.tick_interval.max(Duration::from_secs(1));
        nominal.saturating_sub(self.tick_interval / 4)
    }

    fn sanitized(self) -> Self {
        let defaults = Self::default();
        let non_zero = |value: Duration, default: Duration| {
            if value.is_zero() {
                default
            } else {
                value
            }
        };
        Self {
            tick_interval: non_zero(self.tick_interval, defaults.tick_interval),
            heartbeat_interval: non_zero(self.heartbeat_interval, defaults.heartbeat_interval),
            idle_sample_interval: non_zero(
                self.idle_sample_interval,
                defaults.idle_sample_interval,
            ),
            input_poll_interval: non_zero(self.input_poll_interval, defaults.input_poll_interval),
            persist_max_attempts: self.persist_max_attempts.max(1),
            persist_queue_capacity: self.persist_queue_capacity.max(1),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use tempfile::tempdir;

    use super::TrackerConfig;

    #[test]
    fn test_missing_config_is_default() -> Result<()> {
        let dir = tempdir()?;
        let config = TrackerConfig::load(&dir.path().join("config.json"))?;
        assert_eq!(config, TrackerConfig::default());
        Ok(())
    }

    #[test]
    fn test_partial_config() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"idle_threshold": 60000, "tick_interval": 0}"#)?;

        let config = TrackerConfig::load(&path)?;

        assert_eq!(config.idle_threshold, Duration::from_secs(60));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.persist_max_attempts, 3);
        Ok(())
    }

    #[test]
    fn test_malformed_config_fails() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json")?;
        assert!(TrackerConfig::load(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_min_session_duration() {
        let mut config = TrackerConfig::default();
        assert_eq!(config.min_session_duration(), Duration::from_millis(750));
        config.tick_interval = Duration::from_millis(200);
        assert_eq!(config.min_session_duration(), Duration::from_millis(950));
        config.tick_interval = Duration::from_secs(2);
        assert_eq!(config.min_session_duration(), Duration::from_millis(1500));
    }
}
