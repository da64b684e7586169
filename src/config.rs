use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default kill threshold in minutes.
pub const DEFAULT_KILL_MINUTES: u32 = 5;
/// Default check interval in minutes.
pub const DEFAULT_CHECK_MINUTES: u32 = 1;

/// What to watch and how aggressively. Built once from the command line and
/// never mutated while the monitor runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub process_name: String,
    pub kill_minutes: u32,
    pub check_minutes: u32,
}

impl MonitorConfig {
    /// Watch `process_name` with the default thresholds (kill after 5, check every 1).
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            kill_minutes: DEFAULT_KILL_MINUTES,
            check_minutes: DEFAULT_CHECK_MINUTES,
        }
    }

    pub fn with_kill_minutes(mut self, kill_minutes: u32) -> Self {
        self.kill_minutes = kill_minutes;
        self
    }

    pub fn with_check_minutes(mut self, check_minutes: u32) -> Self {
        self.check_minutes = check_minutes;
        self
    }
}

/// Top-level configuration loaded from agewatch.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct WatchConfig {
    pub monitor: MonitorDefaults,
    pub shutdown: ShutdownConfig,
    pub status: StatusConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorDefaults {
    pub default_kill_minutes: u32,
    pub default_check_minutes: u32,
    pub max_kill_failures: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub stop_file: PathBuf,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StatusConfig {
    pub file: Option<PathBuf>,
}

// --- Default implementations ---

impl Default for MonitorDefaults {
    fn default() -> Self {
        Self {
            default_kill_minutes: DEFAULT_KILL_MINUTES,
            default_check_minutes: DEFAULT_CHECK_MINUTES,
            max_kill_failures: 3,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            stop_file: PathBuf::from("STOP"),
        }
    }
}

impl MonitorDefaults {
    /// Config used to fill in whichever time argument fails to parse.
    pub fn fallback_for(&self, process_name: &str) -> MonitorConfig {
        MonitorConfig::new(process_name)
            .with_kill_minutes(self.default_kill_minutes)
            .with_check_minutes(self.default_check_minutes)
    }
}

/// Errors that can occur while loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load config from `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<WatchConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(WatchConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_monitor_config_defaults() {
        let config = MonitorConfig::new("notepad");
        assert_eq!(config.process_name, "notepad");
        assert_eq!(config.kill_minutes, 5);
        assert_eq!(config.check_minutes, 1);
    }

    #[test]
    fn test_monitor_config_overrides() {
        let config = MonitorConfig::new("sleep")
            .with_kill_minutes(30)
            .with_check_minutes(2);
        assert_eq!(config.kill_minutes, 30);
        assert_eq!(config.check_minutes, 2);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.monitor.default_kill_minutes, 5);
        assert_eq!(config.monitor.default_check_minutes, 1);
        assert_eq!(config.monitor.max_kill_failures, 3);
        assert_eq!(config.shutdown.stop_file, PathBuf::from("STOP"));
        assert!(config.status.file.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agewatch.toml");
        std::fs::write(
            &path,
            "[monitor]\ndefault_kill_minutes = 10\n\n[status]\nfile = \"watch.status\"\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.monitor.default_kill_minutes, 10);
        assert_eq!(config.monitor.default_check_minutes, 1);
        assert_eq!(config.status.file, Some(PathBuf::from("watch.status")));
        assert_eq!(config.shutdown.stop_file, PathBuf::from("STOP"));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agewatch.toml");
        std::fs::write(&path, "[monitor\nnot toml").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_fallback_for_uses_configured_defaults() {
        let defaults = MonitorDefaults {
            default_kill_minutes: 15,
            default_check_minutes: 3,
            max_kill_failures: 3,
        };
        let config = defaults.fallback_for("worker");
        assert_eq!(config, MonitorConfig::new("worker").with_kill_minutes(15).with_check_minutes(3));
    }
}
