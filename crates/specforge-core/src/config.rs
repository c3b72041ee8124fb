//! Runtime configuration.
//!
//! Every section has serde defaults, so a TOML file only needs the keys it
//! overrides. Durations are stored as milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub bus: BusConfig,
    pub scheduler: SchedulerConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Events kept in the in-memory history ring.
    pub history_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fallback admission tick; also the spacing between retries.
    pub tick_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Queue depth above which an alert is raised.
    pub queue_alert_threshold: usize,
    /// Alerts kept before the oldest is dropped.
    pub alert_capacity: usize,
    pub default_max_retries: u32,
    /// Hard limit on a single provider call. `None` disables it.
    pub task_timeout_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            heartbeat_interval_ms: 5_000,
            queue_alert_threshold: 100,
            alert_capacity: 50,
            default_max_retries: 3,
            task_timeout_ms: Some(120_000),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Hard limit on one stage's delegated action. `None` disables it.
    pub stage_timeout_ms: Option<u64>,
    /// Schedule the AI documentation sub-step when a scheduler is attached.
    pub ai_documentation: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_ms: Some(300_000),
            ai_documentation: true,
        }
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_ms.map(Duration::from_millis)
    }
}

impl ForgeConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: ForgeConfig = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw, &path.display().to_string())
    }

    /// Load from `path` when given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "scheduler.tick_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.scheduler.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "scheduler.heartbeat_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.scheduler.alert_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "scheduler.alert_capacity",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = ForgeConfig::from_toml_str(
            r#"
            [scheduler]
            tick_interval_ms = 20
            "#,
            "inline",
        )
        .unwrap();
        assert_eq!(config.scheduler.tick_interval(), Duration::from_millis(20));
        assert_eq!(config.scheduler.default_max_retries, 3);
        assert_eq!(config.bus.history_capacity, 1000);
    }

    #[test]
    fn zero_tick_rejected() {
        let err = ForgeConfig::from_toml_str("[scheduler]\ntick_interval_ms = 0\n", "inline")
            .unwrap_err();
        assert!(err.to_string().contains("scheduler.tick_interval_ms"));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forge.toml");
        std::fs::write(&path, "[pipeline]\nai_documentation = false\n").unwrap();
        let config = ForgeConfig::load(&path).unwrap();
        assert!(!config.pipeline.ai_documentation);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = ForgeConfig::load(Path::new("/nonexistent/forge.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
