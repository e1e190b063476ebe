//! Feed configuration
//!
//! Loaded from TOML. Every section has defaults, so a minimal file only needs
//! a `[transport]` table:
//!
//! ```toml
//! [transport]
//! kind = "multicast"
//! group = "239.1.1.1"
//! port = 51000
//! interface = "0.0.0.0"
//! ```

use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use std::{fs, io};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { path: String, source: io::Error },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub transport: TransportConfig,
    pub socket: SocketConfig,
    pub heartbeat: HeartbeatConfig,
    pub cpu: CpuConfig,
    pub sequence: SequenceConfig,
    pub recovery: RecoveryConfig,
    pub book: BookConfig,
    pub features: FeatureConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Market-data multicast: bind `0.0.0.0:port`, join `group` on `interface`.
    Multicast {
        group: Ipv4Addr,
        port: u16,
        #[serde(default = "unspecified_v4")]
        interface: Ipv4Addr,
    },
    /// Plain unicast UDP bound to `bind` (replays, tests).
    Udp { bind: SocketAddr },
    /// Order-entry style TCP session.
    Tcp { address: String },
}

fn unspecified_v4() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Udp {
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub recv_buffer_bytes: usize,
    pub send_buffer_bytes: usize,
    pub nodelay: bool,
    pub reuse_port: bool,
    /// Receive timeout; bounds how long a stop request can go unnoticed.
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            recv_buffer_bytes: 8 << 20,
            send_buffer_bytes: 1 << 20,
            nodelay: true,
            reuse_port: false,
            poll_interval_ms: 10,
            connect_timeout_ms: 2_000,
        }
    }
}

impl SocketConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// 0 disables heartbeat monitoring.
    pub interval_ms: u64,
    /// Silent intervals tolerated before the connection is declared lost.
    pub missed_before_disconnect: u32,
    /// Send our own heartbeats on TCP sessions.
    pub send: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig {
            interval_ms: 1_000,
            missed_before_disconnect: 3,
            send: true,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        self.interval() * self.missed_before_disconnect.max(1)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub receive_core: Option<usize>,
    pub processing_core: Option<usize>,
    pub aux_core: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// First expected sequence; unset means sync on the first message seen.
    pub initial: Option<u64>,
    pub max_missing: usize,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        SequenceConfig {
            initial: None,
            max_missing: crate::sequence::DEFAULT_MAX_MISSING,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,
    /// Retransmission server for the built-in TCP client.
    pub endpoint: Option<String>,
    pub retry_interval_ms: u64,
    /// Longest range asked for in one request.
    pub max_range: u64,
    pub timeout_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            enabled: false,
            endpoint: None,
            retry_interval_ms: 500,
            max_range: 1_000,
            timeout_ms: 1_000,
        }
    }
}

impl RecoveryConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BookConfig {
    pub enabled: bool,
    /// Levels per side reported in snapshots.
    pub max_depth: usize,
}

impl Default for BookConfig {
    fn default() -> Self {
        BookConfig {
            enabled: true,
            max_depth: crate::book_builder::DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub latency_tracking: bool,
    pub subscribe_all: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            latency_tracking: true,
            subscribe_all: true,
        }
    }
}

impl FeedConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: FeedConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let TransportConfig::Multicast { group, .. } = &self.transport {
            if !group.is_multicast() {
                return Err(ConfigError::Invalid(format!(
                    "transport.group {group} is not a multicast address"
                )));
            }
        }
        if let TransportConfig::Tcp { address } = &self.transport {
            if address.is_empty() {
                return Err(ConfigError::Invalid("transport.address is empty".into()));
            }
        }
        if self.socket.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("socket.poll_interval_ms must be > 0".into()));
        }
        if self.socket.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("socket.connect_timeout_ms must be > 0".into()));
        }
        if self.recovery.timeout_ms == 0 {
            return Err(ConfigError::Invalid("recovery.timeout_ms must be > 0".into()));
        }
        if self.sequence.max_missing == 0 {
            return Err(ConfigError::Invalid("sequence.max_missing must be > 0".into()));
        }
        if self.recovery.max_range == 0 {
            return Err(ConfigError::Invalid("recovery.max_range must be > 0".into()));
        }
        if self.book.max_depth == 0 {
            return Err(ConfigError::Invalid("book.max_depth must be > 0".into()));
        }
        Ok(())
    }
}
