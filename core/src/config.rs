// Node configuration
//
// Everything a node needs to boot: who it is, where it listens, which
// neighbors to greet, and the tunable periods of its workers. Chunk size
// and jitter bounds are runtime settings, not protocol constants.

use crate::local::MAX_CHUNK_SIZE;
use crate::timer::JitterRange;
use crate::TeamsError;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

/// Default chat chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 9090;

/// Interface the node listens on and advertises to its neighbors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Default for NetworkInterface {
    fn default() -> Self {
        Self {
            name: "lo".to_string(),
            address: Ipv4Addr::LOCALHOST,
            port: DEFAULT_PORT,
        }
    }
}

impl NetworkInterface {
    pub fn new(name: impl Into<String>, address: Ipv4Addr, port: u16) -> Self {
        Self {
            name: name.into(),
            address,
            port,
        }
    }

    /// `ip:port` string other nodes use to reach this one.
    pub fn address_and_port(&self) -> String {
        SocketAddrV4::new(self.address, self.port).to_string()
    }
}

/// Greet and heartbeat periods, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub greet_min_ms: u64,
    pub greet_max_ms: u64,
    pub heartbeat_min_ms: u64,
    pub heartbeat_max_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            greet_min_ms: 5000,
            greet_max_ms: 6000,
            heartbeat_min_ms: 100,
            heartbeat_max_ms: 1000,
        }
    }
}

impl DiscoveryConfig {
    pub fn greet_range(&self) -> JitterRange {
        JitterRange::from_millis(self.greet_min_ms, self.greet_max_ms)
    }

    pub fn heartbeat_range(&self) -> JitterRange {
        JitterRange::from_millis(self.heartbeat_min_ms, self.heartbeat_max_ms)
    }

    /// Set greet period bounds
    pub fn with_greet(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.greet_min_ms = min_ms;
        self.greet_max_ms = max_ms;
        self
    }

    /// Set heartbeat period bounds
    pub fn with_heartbeat(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.heartbeat_min_ms = min_ms;
        self.heartbeat_max_ms = max_ms;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BroadcasterConfig {
    /// Upper bound on how long the dispatcher sleeps without a wake-up.
    pub poll_interval_ms: u64,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportConfig {
    pub rpc_timeout_ms: u64,
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: 2000,
            max_frame_size: crate::protocol::MAX_FRAME_SIZE,
        }
    }
}

impl TransportConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Idle time after which the local bridge sends a heartbeat frame.
    pub heartbeat_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 500,
        }
    }
}

/// Complete settings of one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    pub nickname: String,
    pub identity: String,
    pub interface: NetworkInterface,
    /// `ip` or `ip:port`; a bare ip uses the node's own port.
    pub neighbors: Vec<String>,
    pub chunk_size: usize,
    pub discovery: DiscoveryConfig,
    pub broadcaster: BroadcasterConfig,
    pub transport: TransportConfig,
    pub bridge: BridgeConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            nickname: String::new(),
            identity: String::new(),
            interface: NetworkInterface::default(),
            neighbors: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            discovery: DiscoveryConfig::default(),
            broadcaster: BroadcasterConfig::default(),
            transport: TransportConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(nickname: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            identity: identity.into(),
            ..Self::default()
        }
    }

    pub fn with_interface(mut self, interface: NetworkInterface) -> Self {
        self.interface = interface;
        self
    }

    pub fn with_neighbor(mut self, neighbor: impl Into<String>) -> Self {
        self.neighbors.push(neighbor.into());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.broadcaster.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn with_rpc_timeout(mut self, rpc_timeout_ms: u64) -> Self {
        self.transport.rpc_timeout_ms = rpc_timeout_ms;
        self
    }

    pub fn with_bridge_heartbeat(mut self, heartbeat_interval_ms: u64) -> Self {
        self.bridge.heartbeat_interval_ms = heartbeat_interval_ms;
        self
    }

    /// Address this node advertises in greets.
    pub fn address(&self) -> String {
        self.interface.address_and_port()
    }

    /// Neighbor list normalized to `ip:port`.
    pub fn neighbor_addresses(&self) -> Result<Vec<String>, TeamsError> {
        self.neighbors
            .iter()
            .map(|neighbor| normalize_neighbor(neighbor, self.interface.port))
            .collect()
    }

    pub fn validate(&self) -> Result<(), TeamsError> {
        if self.nickname.trim().is_empty() {
            return Err(TeamsError::InvalidConfig("nickname is empty".into()));
        }
        if self.identity.trim().is_empty() {
            return Err(TeamsError::InvalidConfig("identity is empty".into()));
        }
        if self.interface.name.is_empty() {
            return Err(TeamsError::InvalidConfig("interface name is empty".into()));
        }
        if self.interface.port == 0 {
            return Err(TeamsError::InvalidConfig("port must be non-zero".into()));
        }
        if self.chunk_size == 0 {
            return Err(TeamsError::InvalidConfig("chunk size must be non-zero".into()));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(TeamsError::InvalidConfig(format!(
                "chunk size {} exceeds the local frame limit of {} bytes",
                self.chunk_size, MAX_CHUNK_SIZE
            )));
        }
        let d = &self.discovery;
        if d.greet_min_ms == 0 || d.greet_min_ms > d.greet_max_ms {
            return Err(TeamsError::InvalidConfig(format!(
                "invalid greet period {}..{}ms",
                d.greet_min_ms, d.greet_max_ms
            )));
        }
        if d.heartbeat_min_ms == 0 || d.heartbeat_min_ms > d.heartbeat_max_ms {
            return Err(TeamsError::InvalidConfig(format!(
                "invalid heartbeat period {}..{}ms",
                d.heartbeat_min_ms, d.heartbeat_max_ms
            )));
        }
        if self.broadcaster.poll_interval_ms == 0 {
            return Err(TeamsError::InvalidConfig("poll interval must be non-zero".into()));
        }
        if self.transport.rpc_timeout_ms == 0 {
            return Err(TeamsError::InvalidConfig("rpc timeout must be non-zero".into()));
        }
        if self.bridge.heartbeat_interval_ms == 0 {
            return Err(TeamsError::InvalidConfig("bridge heartbeat must be non-zero".into()));
        }
        self.neighbor_addresses()?;
        Ok(())
    }
}

fn normalize_neighbor(neighbor: &str, default_port: u16) -> Result<String, TeamsError> {
    let neighbor = neighbor.trim();
    if let Ok(address) = neighbor.parse::<SocketAddrV4>() {
        if address.port() == 0 {
            return Err(TeamsError::InvalidConfig(format!(
                "invalid neighbor port in {}",
                neighbor
            )));
        }
        return Ok(address.to_string());
    }
    match neighbor.parse::<Ipv4Addr>() {
        Ok(ip) => Ok(SocketAddrV4::new(ip, default_port).to_string()),
        Err(_) => Err(TeamsError::InvalidConfig(format!(
            "invalid neighbor IPv4 address {}",
            neighbor
        ))),
    }
}
