//! Addresses seen on the bus.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use tis_packet::payload::{DeviceName, TypedPayload};
use tis_packet::{device_label, device_model, opcodes, Address, Frame};

/// Everything known about one `(subnet, device)` address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredAddress {
    /// Bus address; the registry key.
    pub address: Address,
    /// Device kind from the first frame seen.
    pub kind: u16,
    /// Model name, if the kind is known.
    pub model: Option<&'static str>,
    /// Display label: the model at first, the reported name once known.
    pub label: String,
    /// Name from a device name reply.
    pub name: Option<String>,
    /// Network host the frames came from.
    pub host: Option<IpAddr>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Every opcode this address has sent.
    pub responses_seen: BTreeSet<u16>,
    /// Number of frames from this address.
    pub frames: u64,
}

impl DiscoveredAddress {
    fn first(frame: &Frame, host: Option<IpAddr>, now: DateTime<Utc>) -> Self {
        DiscoveredAddress {
            address: frame.source,
            kind: frame.source_kind,
            model: device_model(frame.source_kind),
            label: format!("{} ({})", device_label(frame.source_kind), frame.source),
            name: None,
            host,
            first_seen: now,
            last_seen: now,
            responses_seen: BTreeSet::new(),
            frames: 0,
        }
    }
}

/// What [`DeviceRegistry::observe`] changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryUpdate {
    /// First frame from this address.
    New(DiscoveredAddress),
    /// Known address; counters and timestamps refreshed.
    Seen,
    /// A name reply changed the label.
    Renamed(DiscoveredAddress),
}

/// Addresses seen on the bus, keyed by `(subnet, device)`.
///
/// Entries are updated in place and never removed except by [`clear`](Self::clear).
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<BTreeMap<Address, DiscoveredAddress>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a valid frame from `frame.source`.
    pub fn observe(&self, frame: &Frame, host: Option<IpAddr>) -> RegistryUpdate {
        let now = Utc::now();
        let mut devices = self.devices.write();
        let mut is_new = false;
        let entry = devices.entry(frame.source).or_insert_with(|| {
            is_new = true;
            DiscoveredAddress::first(frame, host, now)
        });

        entry.last_seen = now;
        entry.frames += 1;
        entry.responses_seen.insert(frame.opcode);
        if entry.host.is_none() {
            entry.host = host;
        }

        let renamed = frame.opcode == opcodes::DEVICE_NAME_RESPONSE
            && match DeviceName::parse(&frame.payload) {
                Ok(reply) if !reply.name.is_empty() && entry.name.as_ref() != Some(&reply.name) => {
                    entry.label = format!("{} ({})", reply.name, entry.address);
                    entry.name = Some(reply.name);
                    true
                }
                _ => false,
            };

        if is_new {
            RegistryUpdate::New(entry.clone())
        } else if renamed {
            RegistryUpdate::Renamed(entry.clone())
        } else {
            RegistryUpdate::Seen
        }
    }

    pub fn get(&self, address: Address) -> Option<DiscoveredAddress> {
        self.devices.read().get(&address).cloned()
    }

    /// All entries, ordered by address.
    pub fn snapshot(&self) -> Vec<DiscoveredAddress> {
        self.devices.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Forget every address.
    pub fn clear(&self) {
        self.devices.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tis_packet::{decode_frame, Identity};

    fn frame(source: Address, kind: u16, opcode: u16, payload: Vec<u8>) -> Frame {
        let msg = Identity::new(source, kind).raw(Address::new(1, 254), opcode, payload);
        decode_frame(&msg.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_first_frame_creates_entry() {
        let registry = DeviceRegistry::new();
        let host: IpAddr = "192.168.1.50".parse().unwrap();
        match registry.observe(&frame(Address::new(1, 10), 0x8022, 0xF004, vec![]), Some(host)) {
            RegistryUpdate::New(device) => {
                assert_eq!(device.address, Address::new(1, 10));
                assert_eq!(device.model, Some("TIS-HEALTH-CM"));
                assert_eq!(device.label, "TIS-HEALTH-CM (1.10)");
                assert_eq!(device.host, Some(host));
                assert_eq!(device.frames, 1);
                assert!(device.responses_seen.contains(&0xF004));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_updates_never_replace() {
        let registry = DeviceRegistry::new();
        let light = Address::new(1, 10);
        registry.observe(&frame(light, 0x0258, 0xF004, vec![]), None);
        let first_seen = registry.get(light).unwrap().first_seen;

        assert_eq!(
            registry.observe(&frame(light, 0x0258, 0x0034, vec![1, 50]), None),
            RegistryUpdate::Seen
        );
        let device = registry.get(light).unwrap();
        assert_eq!(device.first_seen, first_seen);
        assert_eq!(device.frames, 2);
        assert_eq!(
            device.responses_seen.iter().copied().collect::<Vec<_>>(),
            vec![0x0034, 0xF004]
        );
        assert_eq!(device.label, "Unknown (0x0258) (1.10)");
    }

    #[test]
    fn test_name_reply_updates_label_not_key() {
        let registry = DeviceRegistry::new();
        let light = Address::new(1, 10);
        registry.observe(&frame(light, 0x0258, 0xF004, vec![]), None);

        let mut payload = b"Kitchen".to_vec();
        payload.extend_from_slice(&[0, 0]);
        match registry.observe(&frame(light, 0x0258, 0x000F, payload.clone()), None) {
            RegistryUpdate::Renamed(device) => {
                assert_eq!(device.address, light);
                assert_eq!(device.name.as_deref(), Some("Kitchen"));
                assert_eq!(device.label, "Kitchen (1.10)");
            }
            other => panic!("unexpected {:?}", other),
        }

        // Same name again is not a rename.
        assert_eq!(
            registry.observe(&frame(light, 0x0258, 0x000F, payload), None),
            RegistryUpdate::Seen
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_clear() {
        let registry = DeviceRegistry::new();
        registry.observe(&frame(Address::new(2, 3), 0x0000, 0x0032, vec![]), None);
        assert!(!registry.is_empty());
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }
}
