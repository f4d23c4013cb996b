//! tisctl configuration.
//!
//! Loaded from an optional YAML file; every field has a default and the
//! command line overrides what the file says.
//!
//! ```yaml
//! bind: 0.0.0.0:6000
//! broadcast: 192.168.1.255:6000
//! envelope: true
//! log_filter: tis_engine=debug,info
//! engine:
//!   identity: { address: { subnet: 1, device: 254 }, kind: 65534 }
//!   correlation_timeout_secs: 0.5
//! discovery:
//!   attempts: 5
//! ```

use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tis_engine::{DiscoveryConfig, EngineConfig, EnumerationConfig};
use tis_packet::DEFAULT_UDP_PORT;

use crate::error::{Result, RunnerError};

/// Everything tisctl needs to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Local socket address to bind.
    pub bind: SocketAddr,
    /// Destination for broadcast frames.
    pub broadcast: SocketAddr,
    /// Unicast destination for addressed frames (an IP gateway). Addressed
    /// frames are broadcast when unset.
    pub gateway: Option<SocketAddr>,
    /// Prefix outgoing frames with the gateway envelope.
    pub envelope: bool,
    /// Address written into the envelope. Detected from the routing table
    /// when unset.
    pub envelope_ip: Option<Ipv4Addr>,
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: String,
    pub engine: EngineConfig,
    pub discovery: DiscoveryConfig,
    pub enumeration: EnumerationConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_UDP_PORT)),
            broadcast: SocketAddr::from((Ipv4Addr::BROADCAST, DEFAULT_UDP_PORT)),
            gateway: None,
            envelope: true,
            envelope_ip: None,
            log_filter: "info".to_string(),
            engine: EngineConfig::default(),
            discovery: DiscoveryConfig::default(),
            enumeration: EnumerationConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Parse a YAML document.
    pub fn from_yaml(text: &str, path: &Path) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|source| RunnerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|source| RunnerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text, path)
    }
}
