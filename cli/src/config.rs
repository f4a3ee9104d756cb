// Configuration management for the tteams CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/tteams/config.json
// - Linux: ~/.config/tteams/config.json
// - Windows: %APPDATA%\tteams\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tteams_core::config::{DiscoveryConfig, NetworkInterface, DEFAULT_CHUNK_SIZE, DEFAULT_PORT};
use tteams_core::NodeConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name shown to other nodes
    pub nickname: String,

    /// Stable node identity, generated on first load
    pub identity: String,

    /// Interface name shown in logs
    pub interface: String,

    /// Address advertised to neighbors and bound for listening
    pub address: Ipv4Addr,

    /// Port for listening
    pub listen_port: u16,

    /// Neighbors greeted on startup, `ip` or `ip:port`
    pub neighbors: Vec<String>,

    /// Chat chunk size in bytes
    pub chunk_size: usize,

    /// Timing settings
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub greet_min_ms: u64,
    pub greet_max_ms: u64,
    pub heartbeat_min_ms: u64,
    pub heartbeat_max_ms: u64,
    pub rpc_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nickname: default_nickname(),
            identity: String::new(),
            interface: "lo".to_string(),
            address: Ipv4Addr::LOCALHOST,
            listen_port: DEFAULT_PORT,
            neighbors: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            network: NetworkConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let discovery = DiscoveryConfig::default();
        Self {
            greet_min_ms: discovery.greet_min_ms,
            greet_max_ms: discovery.greet_max_ms,
            heartbeat_min_ms: discovery.heartbeat_min_ms,
            heartbeat_max_ms: discovery.heartbeat_max_ms,
            rpc_timeout_ms: 2000,
        }
    }
}

fn default_nickname() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "anonymous".to_string())
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("tteams");
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform), used for logs
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("tteams");
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    /// Load config from `path`, creating it with defaults if missing.
    /// A config without an identity gets a fresh one, which is saved
    /// right away so it survives restarts.
    pub fn load_from(path: &Path) -> Result<Self> {
        let existed = path.exists();
        let mut config: Config = if existed {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Config::default()
        };
        let fresh = config.identity.is_empty();
        if fresh {
            config.identity = uuid::Uuid::new_v4().to_string();
        }
        if fresh || !existed {
            config.save_to(path)?;
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    pub fn add_neighbor(&mut self, neighbor: String) {
        if !self.neighbors.contains(&neighbor) {
            self.neighbors.push(neighbor);
        }
    }

    pub fn remove_neighbor(&mut self, neighbor: &str) {
        self.neighbors.retain(|n| n != neighbor);
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "nickname" => {
                if value.trim().is_empty() {
                    anyhow::bail!("Nickname cannot be empty");
                }
                self.nickname = value.to_string();
            }
            "identity" => anyhow::bail!("Identity is generated and cannot be set"),
            "interface" => self.interface = value.to_string(),
            "address" => self.address = value.parse().context("Invalid IPv4 address")?,
            "listen_port" => self.listen_port = value.parse().context("Invalid port number")?,
            "neighbors" => {
                self.neighbors = value
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "chunk_size" => self.chunk_size = value.parse().context("Invalid number")?,
            "greet_min_ms" => self.network.greet_min_ms = value.parse().context("Invalid number")?,
            "greet_max_ms" => self.network.greet_max_ms = value.parse().context("Invalid number")?,
            "heartbeat_min_ms" => {
                self.network.heartbeat_min_ms = value.parse().context("Invalid number")?
            }
            "heartbeat_max_ms" => {
                self.network.heartbeat_max_ms = value.parse().context("Invalid number")?
            }
            "rpc_timeout_ms" => {
                self.network.rpc_timeout_ms = value.parse().context("Invalid number")?
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("nickname".to_string(), self.nickname.clone()),
            ("identity".to_string(), self.identity.clone()),
            ("interface".to_string(), self.interface.clone()),
            ("address".to_string(), self.address.to_string()),
            ("listen_port".to_string(), self.listen_port.to_string()),
            ("neighbors".to_string(), self.neighbors.join(",")),
            ("chunk_size".to_string(), self.chunk_size.to_string()),
            ("greet_min_ms".to_string(), self.network.greet_min_ms.to_string()),
            ("greet_max_ms".to_string(), self.network.greet_max_ms.to_string()),
            ("heartbeat_min_ms".to_string(), self.network.heartbeat_min_ms.to_string()),
            ("heartbeat_max_ms".to_string(), self.network.heartbeat_max_ms.to_string()),
            ("rpc_timeout_ms".to_string(), self.network.rpc_timeout_ms.to_string()),
        ]
    }

    /// Node settings derived from this file.
    pub fn node_config(&self) -> NodeConfig {
        let network = &self.network;
        let mut node = NodeConfig::new(self.nickname.clone(), self.identity.clone())
            .with_interface(NetworkInterface::new(
                self.interface.clone(),
                self.address,
                self.listen_port,
            ))
            .with_chunk_size(self.chunk_size)
            .with_discovery(
                DiscoveryConfig::default()
                    .with_greet(network.greet_min_ms, network.greet_max_ms)
                    .with_heartbeat(network.heartbeat_min_ms, network.heartbeat_max_ms),
            )
            .with_rpc_timeout(network.rpc_timeout_ms);
        for neighbor in &self.neighbors {
            node = node.with_neighbor(neighbor.clone());
        }
        node
    }
}
