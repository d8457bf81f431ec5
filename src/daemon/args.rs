use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use clap::Parser;
use tracing::level_filters::LevelFilter;

use super::config::{TrackerConfig, CONFIG_FILE_NAME};

#[derive(Parser, Debug)]
pub struct DaemonArgs {
    /// Run in the current process instead of detaching.
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Config file. Defaults to config.json inside the application directory.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// This option is for debugging purposes only.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    /// Seconds without input after which the user is considered idle.
    #[arg(long = "idle-threshold")]
    pub idle_threshold: Option<u64>,
}

impl DaemonArgs {
    /// Loads the config file and applies overrides given on the command line.
    pub fn tracker_config(&self, app_dir: &Path) -> Result<TrackerConfig> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| app_dir.join(CONFIG_FILE_NAME));
        let mut config = TrackerConfig::load(&path)?;
        if let Some(seconds) = self.idle_threshold {
            config.idle_threshold = Duration::from_secs(seconds);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use clap::Parser;
    use tempfile::tempdir;

    use super::DaemonArgs;

    #[test]
    fn test_command_line_overrides_file() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"idle_threshold": 60000, "heartbeat_interval": 2000}"#,
        )?;

        let args = DaemonArgs::parse_from(["screentime-daemon", "--idle-threshold", "30"]);
        let config = args.tracker_config(dir.path())?;

        assert_eq!(config.idle_threshold, Duration::from_secs(30));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(2));
        Ok(())
    }

    #[test]
    fn test_explicit_config_path() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("custom.json");
        std::fs::write(&path, r#"{"tick_interval": 2000}"#)?;

        let args = DaemonArgs::parse_from([
            "screentime-daemon",
            "--config",
            path.to_str().unwrap(),
            "--log-filter",
            "info",
        ]);
        let config = args.tracker_config(dir.path())?;

        assert_eq!(config.tick_interval, Duration::from_secs(2));
        assert!(args.log.is_some());
        Ok(())
    }
}
