//! Engine configuration.
//!
//! Every struct deserializes from a partial document; missing fields take
//! their defaults. Durations are written as fractional seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tis_packet::{opcodes, Identity};

/// Which replies may satisfy a unicast request.
///
/// Broadcast requests always accept a reply from any address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressPolicy {
    /// Reply source must equal the request target.
    #[default]
    Strict,
    /// Any source may reply.
    Any,
}

/// Core engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Source identity stamped on outgoing frames.
    pub identity: Identity,
    /// Longest single wait for inbound bytes before the loop re-checks its stop signal.
    #[serde(with = "secs", rename = "receive_timeout_secs")]
    pub receive_timeout: Duration,
    /// Default per-attempt wait for a correlated reply.
    #[serde(with = "secs", rename = "correlation_timeout_secs")]
    pub correlation_timeout: Duration,
    /// Default number of sends for a correlated request.
    pub correlation_attempts: u32,
    /// Pending entries older than this are dropped by the receive loop.
    #[serde(with = "secs", rename = "pending_ttl_secs")]
    pub pending_ttl: Duration,
    /// Source matching for unicast replies.
    pub address_policy: AddressPolicy,
    /// Accept `opcode + 1` as the reply to requests missing from the pair table.
    pub adjacent_reply_fallback: bool,
    /// Drop loopback copies of frames we sent. Frames from other controllers
    /// using our identity are still processed.
    pub ignore_own_frames: bool,
    /// Capacity of the event and frame broadcast channels.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            identity: Identity::default(),
            receive_timeout: Duration::from_secs(1),
            correlation_timeout: Duration::from_secs(1),
            correlation_attempts: 1,
            pending_ttl: Duration::from_secs(30),
            address_policy: AddressPolicy::Strict,
            adjacent_reply_fallback: true,
            ignore_own_frames: true,
            event_capacity: 1024,
        }
    }
}

/// Repeated-broadcast discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Opcode of the discovery broadcast.
    pub opcode: u16,
    /// Number of broadcasts.
    pub attempts: u32,
    /// Gap between broadcasts.
    #[serde(with = "secs", rename = "interval_secs")]
    pub interval: Duration,
    /// Listening window after the last broadcast.
    #[serde(with = "secs", rename = "final_window_secs")]
    pub final_window: Duration,
    /// Ask each newly seen device for its name.
    pub query_names: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            opcode: opcodes::DISCOVERY_REQUEST,
            attempts: 10,
            interval: Duration::from_secs(1),
            final_window: Duration::from_secs(4),
            query_names: false,
        }
    }
}

/// Opcode enumeration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumerationConfig {
    /// First opcode probed.
    pub start: u16,
    /// Last opcode probed, inclusive.
    pub end: u16,
    /// Wait after each probe.
    #[serde(with = "secs", rename = "delay_secs")]
    pub delay: Duration,
    /// Probes per batch.
    pub batch_size: u32,
    /// Extra pause after each batch.
    #[serde(with = "secs", rename = "batch_pause_secs")]
    pub batch_pause: Duration,
    /// Listening window after the last probe.
    #[serde(with = "secs", rename = "settle_secs")]
    pub settle: Duration,
}

impl Default for EnumerationConfig {
    fn default() -> Self {
        EnumerationConfig {
            start: 0x0000,
            end: 0xFFFF,
            delay: Duration::from_millis(50),
            batch_size: 100,
            batch_pause: Duration::from_millis(100),
            settle: Duration::from_secs(1),
        }
    }
}

impl EnumerationConfig {
    /// Number of opcodes in the configured range.
    pub fn probe_count(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            u32::from(self.end - self.start) + 1
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.opcode, 0xF003);
        assert_eq!(config.attempts, 10);
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.final_window, Duration::from_secs(4));

        let config = EnumerationConfig::default();
        assert_eq!(config.delay, Duration::from_millis(50));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.probe_count(), 65536);
    }

    #[test]
    fn test_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"receive_timeout_secs": 0.25, "address_policy": "any"}"#)
                .unwrap();
        assert_eq!(config.receive_timeout, Duration::from_millis(250));
        assert_eq!(config.address_policy, AddressPolicy::Any);
        assert_eq!(config.correlation_timeout, Duration::from_secs(1));
        assert_eq!(config.identity, Identity::default());
    }

    #[test]
    fn test_negative_duration_rejected() {
        let result: Result<DiscoveryConfig, _> = serde_json::from_str(r#"{"interval_secs": -1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_range() {
        let config = EnumerationConfig {
            start: 10,
            end: 5,
            ..Default::default()
        };
        assert_eq!(config.probe_count(), 0);
    }
}
