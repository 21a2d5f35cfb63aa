//! Daemon configuration

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network configuration
    pub network: NetworkConfig,
    /// Seed peers
    pub bootstrap: BootstrapConfig,
    /// Persistence configuration
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// UDP port the overlay node listens on
    pub listen_port: u16,
    /// HTTP port for the raw key/value front-end
    pub web_port: u16,
    /// HTTP port for the JSON-RPC front-end
    pub rpc_port: u16,
    /// Serve the web front-end
    pub web_enabled: bool,
    /// Serve the JSON-RPC front-end
    pub rpc_enabled: bool,
}

/// Bootstrap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Seed peer addresses (host:port)
    pub nodes: Vec<String>,
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Seconds between state snapshots
    pub snapshot_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                listen_port: 8335,
                web_port: 8080,
                rpc_port: 8336,
                web_enabled: true,
                rpc_enabled: true,
            },
            bootstrap: BootstrapConfig { nodes: vec![] },
            storage: StorageConfig {
                snapshot_interval_secs: 600,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl NodeConfig {
    /// Load configuration from file
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Load or create default configuration
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path).await
        } else {
            let config = Self::default();
            config.save(path).await?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = toml::to_string_pretty(self)?;
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.snapshot_interval_secs == 0 {
            anyhow::bail!("snapshot_interval_secs must be nonzero");
        }

        let mut ports = vec![self.network.listen_port];
        if self.network.web_enabled {
            ports.push(self.network.web_port);
        }
        if self.network.rpc_enabled {
            ports.push(self.network.rpc_port);
        }
        ports.sort_unstable();
        ports.dedup();
        if ports.len() != 1 + self.network.web_enabled as usize + self.network.rpc_enabled as usize
        {
            anyhow::bail!("listen, web and rpc ports must be distinct");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = NodeConfig::load_or_create(&path).await.unwrap();
        assert!(path.exists());

        let reloaded = NodeConfig::load(&path).await.unwrap();
        assert_eq!(config.network.listen_port, reloaded.network.listen_port);
        assert_eq!(
            config.storage.snapshot_interval_secs,
            reloaded.storage.snapshot_interval_secs
        );
    }

    #[test]
    fn test_validation_rejects_port_clash() {
        let mut config = NodeConfig::default();
        assert!(config.validate().is_ok());

        config.network.web_port = config.network.rpc_port;
        assert!(config.validate().is_err());
    }
}
