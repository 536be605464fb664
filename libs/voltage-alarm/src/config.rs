//! Engine configuration
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`VOLTAGE_ALARM_`, nested with `__`)
//! 2. `config/alarm.json`
//! 3. `config/alarm.toml`
//! 4. `config/alarm.yaml`
//! 5. Default values

use crate::error::{AlarmEngineError, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use voltage_rtdb::{FileStateStore, MemoryRtdb, StateStore};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "VOLTAGE_ALARM_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker shards
    pub workers: usize,
    /// Bounded queue length per shard
    pub queue_capacity: usize,
    /// Time-tick period
    pub tick_interval_ms: u64,
    pub state: StateConfig,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            tick_interval_ms: 1000,
            state: StateConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(AlarmEngineError::config("workers must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(AlarmEngineError::config("queue_capacity must be at least 1"));
        }
        if self.tick_interval_ms == 0 {
            return Err(AlarmEngineError::config("tick_interval_ms must be positive"));
        }
        if self.state.backend == StateBackend::File && self.state.dir.is_none() {
            return Err(AlarmEngineError::config("state.dir is required for the file backend"));
        }
        Ok(())
    }
}

/// Where checkpoints live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackend,
    pub dir: Option<PathBuf>,
}

impl StateConfig {
    /// Build the configured checkpoint store
    pub fn open_store(&self) -> Result<Arc<dyn StateStore>> {
        match (self.backend, &self.dir) {
            (StateBackend::Memory, _) => Ok(Arc::new(MemoryRtdb::new())),
            (StateBackend::File, Some(dir)) => Ok(Arc::new(FileStateStore::open(dir)?)),
            (StateBackend::File, None) => {
                Err(AlarmEngineError::config("state.dir is required for the file backend"))
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration from defaults, `config/alarm.*` and the environment
pub fn load_config() -> Result<EngineConfig> {
    let config: EngineConfig = Figment::from(Serialized::defaults(EngineConfig::default()))
        .merge(Yaml::file("config/alarm.yaml"))
        .merge(Toml::file("config/alarm.toml"))
        .merge(Json::file("config/alarm.json"))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| AlarmEngineError::config(format!("Failed to load configuration: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a specific file on top of the defaults
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> Result<EngineConfig> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| AlarmEngineError::config("Config file must have an extension"))?;

    let figment = Figment::from(Serialized::defaults(EngineConfig::default()));
    let figment = match extension {
        "toml" => figment.merge(Toml::file(path)),
        "yaml" | "yml" => figment.merge(Yaml::file(path)),
        "json" => figment.merge(Json::file(path)),
        _ => {
            return Err(AlarmEngineError::config(format!(
                "Unsupported config file format: {}",
                extension
            )))
        },
    };

    let config: EngineConfig = figment.extract().map_err(|e| {
        AlarmEngineError::config(format!("Failed to load configuration from file: {}", e))
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.state.backend, StateBackend::Memory);
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let file = write_config(
            ".yaml",
            "workers: 2\nstate:\n  backend: file\n  dir: /tmp/alarm-state\nlogging:\n  json: true\n",
        );
        let config = load_config_from_file(file.path()).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.state.backend, StateBackend::File);
        assert_eq!(config.state.dir, Some(PathBuf::from("/tmp/alarm-state")));
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_and_json_files() {
        let toml = write_config(".toml", "tick_interval_ms = 250\n");
        assert_eq!(load_config_from_file(toml.path()).unwrap().tick_interval_ms, 250);

        let json = write_config(".json", r#"{"queue_capacity": 8}"#);
        assert_eq!(load_config_from_file(json.path()).unwrap().queue_capacity, 8);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let file = write_config(".toml", "workers = 0\n");
        assert!(matches!(
            load_config_from_file(file.path()),
            Err(AlarmEngineError::Config(_))
        ));

        let file = write_config(".yaml", "state:\n  backend: file\n");
        assert!(load_config_from_file(file.path()).is_err());
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_config(".ini", "workers=1");
        let err = load_config_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported"));
    }

    #[test]
    fn test_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("VOLTAGE_ALARM_WORKERS", "8");
            jail.set_env("VOLTAGE_ALARM_LOGGING__LEVEL", "debug");
            let config = load_config().unwrap();
            assert_eq!(config.workers, 8);
            assert_eq!(config.logging.level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_file_backend_opens_store() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateConfig {
            backend: StateBackend::File,
            dir: Some(dir.path().to_path_buf()),
        };
        assert!(state.open_store().is_ok());
    }
}
