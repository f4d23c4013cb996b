//! Typed payloads
//!
//! Each struct models the payload of one opcode. Payload offsets below are
//! relative to the first byte after the target address.
//!
//! Only the opcodes the engine acts on are typed; everything else travels as
//! raw bytes on [`Frame::payload`](crate::Frame).

use serde::{Deserialize, Serialize};

use crate::opcodes;
use crate::PayloadError;

/// Flag byte reported by a successful channel command.
pub const FEEDBACK_SUCCESS: u8 = 0xF8;
/// Flag byte reported by a failed channel command.
pub const FEEDBACK_FAILURE: u8 = 0xF5;

/// Highest channel level (percent).
pub const MAX_LEVEL: u8 = 100;

/// A payload with a fixed opcode and a known byte layout.
pub trait TypedPayload: Sized {
    /// Opcode this payload travels under.
    const OPCODE: u16;

    /// Serialize to payload bytes.
    fn encode(&self) -> Vec<u8>;

    /// Parse from payload bytes.
    fn parse(payload: &[u8]) -> Result<Self, PayloadError>;
}

fn require(opcode: u16, payload: &[u8], expected: usize) -> Result<(), PayloadError> {
    if payload.len() < expected {
        return Err(PayloadError::truncated(opcode, expected, payload.len()));
    }
    Ok(())
}

// ============================================================================
// Lighting
// ============================================================================

/// Single channel control (`0x0031`).
///
/// | Offset | Field      |
/// |--------|------------|
/// | 0      | channel    |
/// | 1      | level 0-100 |
/// | 2..4   | ramp seconds, big-endian (optional) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelControl {
    /// Channel number, 1-based.
    pub channel: u8,
    /// Target level in percent.
    pub level: u8,
    /// Transition time in seconds.
    pub ramp_secs: u16,
}

impl ChannelControl {
    /// Create a command, clamping `level` to 100.
    pub fn new(channel: u8, level: u8, ramp_secs: u16) -> Self {
        ChannelControl {
            channel,
            level: level.min(MAX_LEVEL),
            ramp_secs,
        }
    }
}

impl TypedPayload for ChannelControl {
    const OPCODE: u16 = opcodes::CHANNEL_CONTROL;

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.channel, self.level];
        buf.extend_from_slice(&self.ramp_secs.to_be_bytes());
        buf
    }

    fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(Self::OPCODE, payload, 2)?;
        let level = payload[1];
        if level > MAX_LEVEL {
            return Err(PayloadError::invalid(
                Self::OPCODE,
                format!("level {} exceeds {}", level, MAX_LEVEL),
            ));
        }
        // Older firmware sends only channel and level.
        let ramp_secs = match payload.get(2..4) {
            Some(ramp) => u16::from_be_bytes([ramp[0], ramp[1]]),
            None => 0,
        };
        Ok(ChannelControl {
            channel: payload[0],
            level,
            ramp_secs,
        })
    }
}

/// Single channel feedback (`0x0032`).
///
/// | Offset | Field                        |
/// |--------|------------------------------|
/// | 0      | channel                      |
/// | 1      | `0xF8` success / `0xF5` fail |
/// | 2      | resulting level              |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFeedback {
    /// Channel the command addressed.
    pub channel: u8,
    /// Whether the device applied the command.
    pub success: bool,
    /// Level after the command.
    pub level: u8,
}

impl TypedPayload for ChannelFeedback {
    const OPCODE: u16 = opcodes::CHANNEL_FEEDBACK;

    fn encode(&self) -> Vec<u8> {
        let flag = if self.success {
            FEEDBACK_SUCCESS
        } else {
            FEEDBACK_FAILURE
        };
        vec![self.channel, flag, self.level]
    }

    fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(Self::OPCODE, payload, 3)?;
        let success = match payload[1] {
            FEEDBACK_SUCCESS => true,
            FEEDBACK_FAILURE => false,
            other => {
                return Err(PayloadError::invalid(
                    Self::OPCODE,
                    format!("unknown feedback flag 0x{:02X}", other),
                ))
            }
        };
        Ok(ChannelFeedback {
            channel: payload[0],
            success,
            level: payload[2],
        })
    }
}

/// Read channel status (`0x0033`). An empty payload asks for every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelStatusRequest {
    /// Single channel to read, or all.
    pub channel: Option<u8>,
}

impl TypedPayload for ChannelStatusRequest {
    const OPCODE: u16 = opcodes::CHANNEL_STATUS_REQUEST;

    fn encode(&self) -> Vec<u8> {
        self.channel.into_iter().collect()
    }

    fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        Ok(ChannelStatusRequest {
            channel: payload.first().copied(),
        })
    }
}

/// Multi-channel status (`0x0034`): a count byte then one level per channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelStatus {
    /// Channel levels, index 0 is channel 1.
    pub levels: Vec<u8>,
}

impl ChannelStatus {
    /// Level of a 1-based channel.
    pub fn level(&self, channel: u8) -> Option<u8> {
        let index = usize::from(channel).checked_sub(1)?;
        self.levels.get(index).copied()
    }
}

impl TypedPayload for ChannelStatus {
    const OPCODE: u16 = opcodes::CHANNEL_STATUS_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let count = self.levels.len().min(u8::MAX as usize);
        let mut buf = Vec::with_capacity(1 + count);
        buf.push(count as u8);
        buf.extend_from_slice(&self.levels[..count]);
        buf
    }

    fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(Self::OPCODE, payload, 1)?;
        let count = payload[0] as usize;
        require(Self::OPCODE, payload, 1 + count)?;
        Ok(ChannelStatus {
            levels: payload[1..1 + count].to_vec(),
        })
    }
}

/// Scene control (`0x0002`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneControl {
    /// Area number.
    pub area: u8,
    /// Scene number within the area.
    pub scene: u8,
}

impl TypedPayload for SceneControl {
    const OPCODE: u16 = opcodes::SCENE_CONTROL;

    fn encode(&self) -> Vec<u8> {
        vec![self.area, self.scene]
    }

    fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(Self::OPCODE, payload, 2)?;
        Ok(SceneControl {
            area: payload[0],
            scene: payload[1],
        })
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Device remark (`0x000F`), NUL-terminated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceName {
    /// Name with padding and surrounding whitespace removed.
    pub name: String,
}

impl TypedPayload for DeviceName {
    const OPCODE: u16 = opcodes::DEVICE_NAME_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut buf = self.name.as_bytes().to_vec();
        buf.push(0);
        buf
    }

    fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        let name = String::from_utf8_lossy(&payload[..end]).trim().to_string();
        Ok(DeviceName { name })
    }
}

// ============================================================================
// Curtains and switches
// ============================================================================

/// Curtain motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurtainAction {
    /// Stop moving.
    Stop,
    /// Open fully.
    Open,
    /// Close fully.
    Close,
}

impl CurtainAction {
    /// Wire value.
    pub fn as_byte(self) -> u8 {
        match self {
            CurtainAction::Stop => 0,
            CurtainAction::Open => 1,
            CurtainAction::Close => 2,
        }
    }

    /// Parse a wire value.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(CurtainAction::Stop),
            1 => Some(CurtainAction::Open),
            2 => Some(CurtainAction::Close),
            _ => None,
        }
    }
}

/// Curtain control (`0xE3E0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurtainControl {
    /// Curtain number.
    pub curtain: u8,
    /// Requested motion.
    pub action: CurtainAction,
}

impl TypedPayload for CurtainControl {
    const OPCODE: u16 = opcodes::CURTAIN_CONTROL;

    fn encode(&self) -> Vec<u8> {
        vec![self.curtain, self.action.as_byte()]
    }

    fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(Self::OPCODE, payload, 2)?;
        let action = CurtainAction::from_byte(payload[1]).ok_or_else(|| {
            PayloadError::invalid(
                Self::OPCODE,
                format!("unknown curtain action {}", payload[1]),
            )
        })?;
        Ok(CurtainControl {
            curtain: payload[0],
            action,
        })
    }
}

/// Universal switch control (`0xE01C`). `0xFF` is on, `0x00` is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversalSwitch {
    /// Switch number.
    pub switch: u8,
    /// Requested state.
    pub on: bool,
}

impl TypedPayload for UniversalSwitch {
    const OPCODE: u16 = opcodes::UNIVERSAL_SWITCH;

    fn encode(&self) -> Vec<u8> {
        vec![self.switch, if self.on { 0xFF } else { 0x00 }]
    }

    fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(Self::OPCODE, payload, 2)?;
        let on = match payload[1] {
            0xFF => true,
            0x00 => false,
            other => {
                return Err(PayloadError::invalid(
                    Self::OPCODE,
                    format!("unknown switch state 0x{:02X}", other),
                ))
            }
        };
        Ok(UniversalSwitch {
            switch: payload[0],
            on,
        })
    }
}

// ============================================================================
// Security
// ============================================================================

/// Security panel mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    Vacation,
    Away,
    Night,
    Disarm,
}

impl SecurityMode {
    /// Wire value.
    pub fn as_byte(self) -> u8 {
        match self {
            SecurityMode::Vacation => 1,
            SecurityMode::Away => 2,
            SecurityMode::Night => 3,
            SecurityMode::Disarm => 6,
        }
    }

    /// Parse a wire value.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            1 => Some(SecurityMode::Vacation),
            2 => Some(SecurityMode::Away),
            3 => Some(SecurityMode::Night),
            6 => Some(SecurityMode::Disarm),
            _ => None,
        }
    }
}

/// Arm or disarm a zone (`0x0104`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityControl {
    /// Zone number.
    pub zone: u8,
    /// Requested mode.
    pub mode: SecurityMode,
}

impl TypedPayload for SecurityControl {
    const OPCODE: u16 = opcodes::SECURITY_CONTROL;

    fn encode(&self) -> Vec<u8> {
        vec![self.zone, self.mode.as_byte()]
    }

    fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(Self::OPCODE, payload, 2)?;
        let mode = SecurityMode::from_byte(payload[1]).ok_or_else(|| {
            PayloadError::invalid(Self::OPCODE, format!("unknown security mode {}", payload[1]))
        })?;
        Ok(SecurityControl {
            zone: payload[0],
            mode,
        })
    }
}

// ============================================================================
// Sensors
// ============================================================================

/// Multi-sensor report (`0xDB01`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSensorReport {
    pub dry_contact_1: u8,
    pub dry_contact_2: u8,
    pub lux: u8,
    pub motion: u8,
    pub flag_a: u8,
    pub flag_b: u8,
    /// Motion hold time in seconds.
    pub delay_secs: u16,
}

impl TypedPayload for MultiSensorReport {
    const OPCODE: u16 = opcodes::SENSOR_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![
            self.dry_contact_1,
            self.dry_contact_2,
            self.lux,
            self.motion,
            self.flag_a,
            self.flag_b,
        ];
        buf.extend_from_slice(&self.delay_secs.to_be_bytes());
        buf
    }

    fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(Self::OPCODE, payload, 8)?;
        Ok(MultiSensorReport {
            dry_contact_1: payload[0],
            dry_contact_2: payload[1],
            lux: payload[2],
            motion: payload[3],
            flag_a: payload[4],
            flag_b: payload[5],
            delay_secs: u16::from_be_bytes([payload[6], payload[7]]),
        })
    }
}

/// Temperature report (`0xDC01`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemperatureReport {
    /// True for Fahrenheit, false for Celsius.
    pub fahrenheit: bool,
    /// Reading in the reported unit.
    pub value: u8,
}

impl TypedPayload for TemperatureReport {
    const OPCODE: u16 = opcodes::TEMPERATURE_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        vec![u8::from(self.fahrenheit), self.value]
    }

    fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(Self::OPCODE, payload, 2)?;
        Ok(TemperatureReport {
            fahrenheit: payload[0] != 0,
            value: payload[1],
        })
    }
}
