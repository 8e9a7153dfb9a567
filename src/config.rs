//! MirrorSync Configuration
//!
//! Configuration structures for the mirroring service: the primary node,
//! any replica nodes hosted by this process, and transfer tuning.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main MirrorSync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Primary node configuration (optional - a process may host replicas only)
    #[serde(default)]
    pub primary: Option<PrimaryConfig>,

    /// Replica nodes hosted by this process
    #[serde(default)]
    pub replicas: Vec<ReplicaConfig>,

    /// Transfer tuning
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Client-role download configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Primary node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryConfig {
    /// Address to bind the file-serving listener
    #[serde(default = "default_primary_address")]
    pub bind_address: String,

    /// Directory holding the authoritative file set
    #[serde(default = "default_primary_root")]
    pub storage_root: PathBuf,
}

/// Replica node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Replica identifier (unique within the process)
    pub id: u32,

    /// Address to bind the file-serving listener
    pub bind_address: String,

    /// Directory holding this replica's mirrored file set
    pub storage_root: PathBuf,

    /// Primary address to register with and sync from
    pub primary_address: String,

    /// Address other nodes should use to reach this replica
    /// (defaults to bind_address)
    #[serde(default)]
    pub advertise_address: Option<String>,
}

/// Transfer tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Abort a transfer if no bytes arrive within this interval.
    /// Reset on every received chunk.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Minimum interval between progress samples in milliseconds
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

/// Client-role download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Directory where failover downloads are written
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions

fn default_primary_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_primary_root() -> PathBuf {
    PathBuf::from("shared_primary")
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_idle_timeout_ms() -> u64 {
    5000
}

fn default_progress_interval_ms() -> u64 {
    250
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            downloads_dir: default_downloads_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            primary: Some(PrimaryConfig {
                bind_address: default_primary_address(),
                storage_root: default_primary_root(),
            }),
            replicas: Vec::new(),
            transfer: TransferConfig::default(),
            client: ClientConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl MirrorConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: MirrorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.primary.is_none() && self.replicas.is_empty() {
            return Err(crate::Error::Config(
                "configuration defines neither a primary nor any replicas".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for replica in &self.replicas {
            if !seen.insert(replica.id) {
                return Err(crate::Error::Config(format!(
                    "duplicate replica id {}",
                    replica.id
                )));
            }
            if replica.bind_address.is_empty() {
                return Err(crate::Error::Config(format!(
                    "replica {} has an empty bind_address",
                    replica.id
                )));
            }
            if replica.primary_address.is_empty() {
                return Err(crate::Error::Config(format!(
                    "replica {} has an empty primary_address",
                    replica.id
                )));
            }
        }

        Ok(())
    }

    /// Find the configuration for one replica id
    pub fn replica(&self, id: u32) -> Option<&ReplicaConfig> {
        self.replicas.iter().find(|r| r.id == id)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer.connect_timeout_ms)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer.idle_timeout_ms)
    }

    /// Get progress sample interval as Duration
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.transfer.progress_interval_ms)
    }
}

impl ReplicaConfig {
    /// Address other nodes should use to reach this replica
    pub fn advertise_address(&self) -> &str {
        self.advertise_address
            .as_deref()
            .unwrap_or(&self.bind_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[primary]
bind_address = "0.0.0.0:8000"
storage_root = "shared_primary"

[[replicas]]
id = 1
bind_address = "0.0.0.0:8001"
storage_root = "replicas/replica_1"
primary_address = "127.0.0.1:8000"

[[replicas]]
id = 2
bind_address = "0.0.0.0:8002"
storage_root = "replicas/replica_2"
primary_address = "127.0.0.1:8000"

[transfer]
idle_timeout_ms = 2000
"#;

        let config = MirrorConfig::from_str(toml).unwrap();
        assert_eq!(config.replicas.len(), 2);
        assert_eq!(config.idle_timeout(), Duration::from_millis(2000));
        assert_eq!(config.replica(2).unwrap().bind_address, "0.0.0.0:8002");
    }

    #[test]
    fn test_duplicate_replica_ids_rejected() {
        let toml = r#"
[[replicas]]
id = 1
bind_address = "0.0.0.0:8001"
storage_root = "a"
primary_address = "127.0.0.1:8000"

[[replicas]]
id = 1
bind_address = "0.0.0.0:8002"
storage_root = "b"
primary_address = "127.0.0.1:8000"
"#;

        assert!(MirrorConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_empty_config_rejected() {
        assert!(MirrorConfig::from_str("").is_err());
    }
}
