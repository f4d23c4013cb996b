//! Logical messages and builders.

use serde::{Deserialize, Serialize};

use crate::payload::{
    ChannelControl, ChannelStatusRequest, CurtainAction, CurtainControl, SceneControl,
    SecurityControl, SecurityMode, TypedPayload, UniversalSwitch,
};
use crate::{encode_frame, opcodes, Address, Frame, PacketError, CONTROLLER_KIND};

/// A frame before checksumming: what a caller wants to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sender address.
    pub source: Address,
    /// Sender device type.
    pub source_kind: u16,
    /// Operation code.
    pub opcode: u16,
    /// Target address.
    pub target: Address,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl Message {
    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        encode_frame(
            self.source,
            self.source_kind,
            self.opcode,
            self.target,
            &self.payload,
        )
    }

    /// True if addressed to every listener.
    pub fn is_broadcast(&self) -> bool {
        self.target.is_broadcast()
    }
}

impl From<&Frame> for Message {
    fn from(frame: &Frame) -> Self {
        Message {
            source: frame.source,
            source_kind: frame.source_kind,
            opcode: frame.opcode,
            target: frame.target,
            payload: frame.payload.clone(),
        }
    }
}

/// Source identity stamped on every outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Our address on the bus.
    pub address: Address,
    /// Our device kind.
    pub kind: u16,
}

impl Default for Identity {
    fn default() -> Self {
        Identity {
            address: Address::new(1, 254),
            kind: CONTROLLER_KIND,
        }
    }
}

impl Identity {
    /// Create an identity.
    pub fn new(address: Address, kind: u16) -> Self {
        Identity { address, kind }
    }

    /// Message with an arbitrary opcode and payload.
    pub fn raw(&self, target: Address, opcode: u16, payload: Vec<u8>) -> Message {
        Message {
            source: self.address,
            source_kind: self.kind,
            opcode,
            target,
            payload,
        }
    }

    /// Message carrying a typed payload.
    pub fn typed<P: TypedPayload>(&self, target: Address, payload: &P) -> Message {
        self.raw(target, P::OPCODE, payload.encode())
    }

    /// Broadcast discovery request.
    pub fn discovery(&self) -> Message {
        self.discovery_with(opcodes::DISCOVERY_REQUEST)
    }

    /// Broadcast discovery using a non-default opcode.
    pub fn discovery_with(&self, opcode: u16) -> Message {
        self.raw(Address::BROADCAST, opcode, Vec::new())
    }

    /// Set a channel level.
    pub fn channel_control(&self, target: Address, channel: u8, level: u8, ramp_secs: u16) -> Message {
        self.typed(target, &ChannelControl::new(channel, level, ramp_secs))
    }

    /// Read all channel levels, or one channel.
    pub fn channel_status_query(&self, target: Address, channel: Option<u8>) -> Message {
        self.typed(target, &ChannelStatusRequest { channel })
    }

    /// Read a device's remark.
    pub fn device_name_query(&self, target: Address) -> Message {
        self.raw(target, opcodes::DEVICE_NAME_REQUEST, Vec::new())
    }

    /// Trigger a scene.
    pub fn scene_control(&self, target: Address, area: u8, scene: u8) -> Message {
        self.typed(target, &SceneControl { area, scene })
    }

    /// Move a curtain.
    pub fn curtain_control(&self, target: Address, curtain: u8, action: CurtainAction) -> Message {
        self.typed(target, &CurtainControl { curtain, action })
    }

    /// Set a universal switch.
    pub fn universal_switch(&self, target: Address, switch: u8, on: bool) -> Message {
        self.typed(target, &UniversalSwitch { switch, on })
    }

    /// Arm or disarm a security zone.
    pub fn security_control(&self, target: Address, zone: u8, mode: SecurityMode) -> Message {
        self.typed(target, &SecurityControl { zone, mode })
    }

    /// Read a security zone's mode.
    pub fn security_query(&self, target: Address, zone: u8) -> Message {
        self.raw(target, opcodes::SECURITY_STATUS_REQUEST, vec![zone])
    }
}
