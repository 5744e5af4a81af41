use crate::error::{GleanerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "gleaner.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// StorageConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/gleaner.redb")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// QueueConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Base directory; each action gets `<dir>/<action-id>/`.
    #[serde(default = "default_queue_dir")]
    pub dir: PathBuf,
}

fn default_queue_dir() -> PathBuf {
    PathBuf::from("./data/queue")
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dir: default_queue_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// CollectorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Seconds one sweep spreads its sources over.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Per-fetch timeout. Unset means a fetch only ends with its sweep.
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_window_secs() -> u64 {
    300
}

fn default_pool_size() -> usize {
    10
}

fn default_user_agent() -> String {
    format!("gleaner/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            pool_size: default_pool_size(),
            fetch_timeout_secs: None,
            user_agent: default_user_agent(),
        }
    }
}

impl CollectorConfig {
    pub fn window(&self) -> usize {
        usize::try_from(self.window_secs).unwrap_or(usize::MAX)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// LogConfig
// ---------------------------------------------------------------------------

pub const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Holds `collector.log` and `action.log`.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./log")
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Read and validate `path`. Error-level findings fail the load.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            GleanerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let cfg = Self::parse(&data)?;
        cfg.check()?;
        Ok(cfg)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Err(GleanerError::Config("config file is empty".into()));
        }
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            crate::io::ensure_dir(parent)?;
        }
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Fails with the first error-level finding of `validate`.
    pub fn check(&self) -> Result<()> {
        match self
            .validate()
            .into_iter()
            .find(|w| w.level == WarnLevel::Error)
        {
            Some(w) => Err(GleanerError::Config(w.message)),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level, message: String| warnings.push(ConfigWarning { level, message });

        if !LOG_LEVELS.contains(&self.log.level.as_str()) {
            push(
                WarnLevel::Error,
                format!(
                    "unknown log level '{}' (expected one of {})",
                    self.log.level,
                    LOG_LEVELS.join(", ")
                ),
            );
        }
        if self.collector.window_secs == 0 {
            push(WarnLevel::Error, "collector.window_secs must be at least 1".into());
        }
        if self.collector.pool_size == 0 {
            push(WarnLevel::Error, "collector.pool_size must be at least 1".into());
        }
        if self.collector.fetch_timeout_secs == Some(0) {
            push(WarnLevel::Error, "collector.fetch_timeout_secs must be at least 1 when set".into());
        }

        if self.collector.user_agent.trim().is_empty() {
            push(WarnLevel::Warning, "collector.user_agent is empty".into());
        }
        if let Some(timeout) = self.collector.fetch_timeout_secs {
            if timeout > self.collector.window_secs {
                push(
                    WarnLevel::Warning,
                    format!(
                        "collector.fetch_timeout_secs ({timeout}) exceeds window_secs ({})",
                        self.collector.window_secs
                    ),
                );
            }
        }
        if self.collector.pool_size > 1000 {
            push(
                WarnLevel::Warning,
                format!("collector.pool_size={} is unusually large", self.collector.pool_size),
            );
        }

        warnings
    }
}
