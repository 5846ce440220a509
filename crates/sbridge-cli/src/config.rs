use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sbridge_provider::HostnamePolicy;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub url: Url,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CostConfig {
    /// Hourly price per VM size, used by the cost report.
    #[serde(default)]
    pub rates: HashMap<String, f64>,
}

/// Startup configuration, read once. `cluster_name` and `connection`
/// are required; everything else has defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub cluster_name: String,
    pub connection: ConnectionConfig,

    /// Regex patterns a provider hostname must match to be accepted.
    /// Empty means per-node defaults apply.
    #[serde(default)]
    pub valid_hostnames: Vec<String>,

    /// Fault-injection probability in [0, 1] for command and REST
    /// calls. 0 disables.
    #[serde(default)]
    pub chaos_mode: f64,

    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    #[serde(default = "default_keep_alive_file")]
    pub keep_alive_file: PathBuf,

    #[serde(default = "default_partition_snapshot")]
    pub partition_snapshot: PathBuf,

    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    #[serde(default)]
    pub cost: CostConfig,
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/opt/slurm-bridge/sbridge.pid")
}

fn default_keep_alive_file() -> PathBuf {
    PathBuf::from("/etc/slurm/keep_alive.conf")
}

fn default_partition_snapshot() -> PathBuf {
    PathBuf::from("/opt/slurm-bridge/partitions.json")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("/var/log/sbridge.log")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/opt/slurm-bridge")
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut config: AppConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                source: e,
            })?;

        if let Ok(chaos) = std::env::var("SBRIDGE_CHAOS_MODE") {
            config.chaos_mode = chaos
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("SBRIDGE_CHAOS_MODE={}", chaos)))?;
        }
        if !(0.0..=1.0).contains(&config.chaos_mode) {
            return Err(ConfigError::Invalid(format!(
                "chaos_mode must lie in [0, 1], got {}",
                config.chaos_mode
            )));
        }
        // Fail fast on patterns that would otherwise break every resume.
        HostnamePolicy::from_patterns(&config.valid_hostnames)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }

    pub fn hostname_policy(&self) -> HostnamePolicy {
        // Validated at load time.
        HostnamePolicy::from_patterns(&self.valid_hostnames).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "cluster_name": "c1",
                "connection": {
                    "url": "https://fleet.example.com/",
                    "username": "admin",
                    "password": "secret"
                }
            }"#,
        );
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.cluster_name, "c1");
        assert_eq!(config.chaos_mode, 0.0);
        assert_eq!(config.lock_file, PathBuf::from("/opt/slurm-bridge/sbridge.pid"));
    }

    #[test]
    fn missing_required_fields_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, r#"{ "cluster_name": "c1" }"#);
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn chaos_mode_outside_the_unit_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "cluster_name": "c1",
                "connection": {
                    "url": "https://fleet.example.com/",
                    "username": "admin",
                    "password": "secret"
                },
                "chaos_mode": 1.5
            }"#,
        );
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn bad_hostname_patterns_are_rejected_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "cluster_name": "c1",
                "connection": {
                    "url": "https://fleet.example.com/",
                    "username": "admin",
                    "password": "secret"
                },
                "valid_hostnames": ["["]
            }"#,
        );
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Invalid(_))));
    }
}
