//! Operation codes
//!
//! Commands and their replies are almost always adjacent codes: a request at
//! `N` is answered at `N + 1`. Only the codes the engine has typed support for
//! or that discovery relies on get a named constant; the rest are catalogued in
//! [`describe`] for diagnostics.
//!
//! Some revisions of the protocol documentation disagree on individual codes,
//! so treat the table as a starting point rather than ground truth.

// ============================================================================
// Discovery and identity
// ============================================================================

/// Broadcast search for devices.
pub const DISCOVERY_REQUEST: u16 = 0xF003;
/// Reply to [`DISCOVERY_REQUEST`].
pub const DISCOVERY_RESPONSE: u16 = 0xF004;
/// Read the device's remark (name).
pub const DEVICE_NAME_REQUEST: u16 = 0x000E;
/// Reply to [`DEVICE_NAME_REQUEST`], NUL-terminated name.
pub const DEVICE_NAME_RESPONSE: u16 = 0x000F;
/// Periodic system status broadcast.
pub const SYSTEM_STATUS: u16 = 0xDA44;
/// Reply to [`SYSTEM_STATUS`].
pub const SYSTEM_STATUS_RESPONSE: u16 = 0xDA45;

// ============================================================================
// Lighting
// ============================================================================

/// Scene control.
pub const SCENE_CONTROL: u16 = 0x0002;
/// Scene control feedback.
pub const SCENE_RESPONSE: u16 = 0x0003;
/// Sequence control.
pub const SEQUENCE_CONTROL: u16 = 0x001A;
/// Sequence control feedback.
pub const SEQUENCE_RESPONSE: u16 = 0x001B;
/// Single channel control (on/off/dim).
pub const CHANNEL_CONTROL: u16 = 0x0031;
/// Single channel control feedback.
pub const CHANNEL_FEEDBACK: u16 = 0x0032;
/// Read status of all channels.
pub const CHANNEL_STATUS_REQUEST: u16 = 0x0033;
/// Multi-channel status report.
pub const CHANNEL_STATUS_RESPONSE: u16 = 0x0034;

// ============================================================================
// Curtains and universal switches
// ============================================================================

/// Curtain control.
pub const CURTAIN_CONTROL: u16 = 0xE3E0;
/// Curtain control feedback.
pub const CURTAIN_RESPONSE: u16 = 0xE3E1;
/// Read curtain status.
pub const CURTAIN_STATUS_REQUEST: u16 = 0xE3E2;
/// Curtain status report.
pub const CURTAIN_STATUS_RESPONSE: u16 = 0xE3E3;
/// Universal switch control.
pub const UNIVERSAL_SWITCH: u16 = 0xE01C;
/// Universal switch feedback.
pub const UNIVERSAL_SWITCH_RESPONSE: u16 = 0xE01D;

// ============================================================================
// Climate
// ============================================================================

/// Read AC parameters.
pub const AC_STATUS_REQUEST: u16 = 0xE0EC;
/// AC parameters report.
pub const AC_STATUS_RESPONSE: u16 = 0xE0ED;
/// Modify AC parameters.
pub const AC_CONTROL: u16 = 0xE0EE;
/// AC control feedback.
pub const AC_CONTROL_RESPONSE: u16 = 0xE0EF;
/// Panel (floor heating) control.
pub const PANEL_CONTROL: u16 = 0xE3D8;
/// Panel control feedback.
pub const PANEL_CONTROL_RESPONSE: u16 = 0xE3D9;

// ============================================================================
// Security, sensors, energy
// ============================================================================

/// Arm or disarm a security zone.
pub const SECURITY_CONTROL: u16 = 0x0104;
/// Security control feedback.
pub const SECURITY_RESPONSE: u16 = 0x0105;
/// Read security zone mode.
pub const SECURITY_STATUS_REQUEST: u16 = 0x011E;
/// Security zone mode report.
pub const SECURITY_STATUS_RESPONSE: u16 = 0x011F;
/// Multi-sensor read.
pub const SENSOR_REQUEST: u16 = 0xDB00;
/// Multi-sensor report.
pub const SENSOR_RESPONSE: u16 = 0xDB01;
/// Temperature read.
pub const TEMPERATURE_REQUEST: u16 = 0xDC00;
/// Temperature report.
pub const TEMPERATURE_RESPONSE: u16 = 0xDC01;
/// Energy meter read.
pub const ENERGY_REQUEST: u16 = 0x2010;
/// Energy meter report.
pub const ENERGY_RESPONSE: u16 = 0x2011;

/// Describe a known opcode for diagnostics.
pub fn describe(opcode: u16) -> Option<&'static str> {
    let text = match opcode {
        DISCOVERY_REQUEST => "discovery request",
        DISCOVERY_RESPONSE => "discovery response",
        DEVICE_NAME_REQUEST => "read device name",
        DEVICE_NAME_RESPONSE => "device name",
        SYSTEM_STATUS => "system status broadcast",
        SYSTEM_STATUS_RESPONSE => "system status response",
        SCENE_CONTROL => "scene control",
        SCENE_RESPONSE => "scene feedback",
        SEQUENCE_CONTROL => "sequence control",
        SEQUENCE_RESPONSE => "sequence feedback",
        CHANNEL_CONTROL => "single channel control",
        CHANNEL_FEEDBACK => "single channel feedback",
        CHANNEL_STATUS_REQUEST => "read channel status",
        CHANNEL_STATUS_RESPONSE => "channel status",
        CURTAIN_CONTROL => "curtain control",
        CURTAIN_RESPONSE => "curtain feedback",
        CURTAIN_STATUS_REQUEST => "read curtain status",
        CURTAIN_STATUS_RESPONSE => "curtain status",
        UNIVERSAL_SWITCH => "universal switch control",
        UNIVERSAL_SWITCH_RESPONSE => "universal switch feedback",
        0xE120 => "read temperature unit",
        0xE121 => "temperature unit",
        0xE124 => "read AC fan speed and mode",
        0xE125 => "AC fan speed and mode",
        0x1900 => "read AC temperature range",
        0x1901 => "AC temperature range",
        AC_STATUS_REQUEST => "read AC parameters",
        AC_STATUS_RESPONSE => "AC parameters",
        AC_CONTROL => "modify AC parameters",
        AC_CONTROL_RESPONSE => "AC parameters modified",
        PANEL_CONTROL => "panel control",
        PANEL_CONTROL_RESPONSE => "panel control feedback",
        0xE3DA => "read panel status",
        0xE3DB => "panel status",
        0x1944 => "floor heating status",
        SECURITY_CONTROL => "security arm/disarm",
        SECURITY_RESPONSE => "security feedback",
        SECURITY_STATUS_REQUEST => "read security mode",
        SECURITY_STATUS_RESPONSE => "security mode",
        SENSOR_REQUEST => "read multi-sensor",
        SENSOR_RESPONSE => "multi-sensor report",
        TEMPERATURE_REQUEST => "read temperature",
        TEMPERATURE_RESPONSE => "temperature report",
        0x012C => "read digital inputs",
        0x012D => "digital inputs",
        0xDC22 => "digital input broadcast",
        0x02CA => "sensor auto broadcast",
        0x0218 => "audio control",
        0x0219 => "audio control feedback",
        0x0222 => "read audio source enable",
        0x0223 => "audio source enable",
        0x0224 => "write audio source enable",
        0x0225 => "audio source enable written",
        0x02E0 => "read album/song count",
        0x02E1 => "album/song count",
        0x02E2 => "read album/song name",
        0x02E3 => "album/song name",
        0xE140 => "read radio station name",
        0xE141 => "radio station name",
        0xE142 => "write radio station name",
        0xE143 => "radio station name written",
        ENERGY_REQUEST => "energy meter request",
        ENERGY_RESPONSE => "energy meter report",
        0x2020 => "read weather station",
        0x2021 => "weather station report",
        0x2024 => "read health sensor",
        0x2025 => "health sensor report",
        _ => return None,
    };
    Some(text)
}

/// Format an opcode with its description, e.g. `0x0031 (single channel control)`.
pub fn label(opcode: u16) -> String {
    match describe(opcode) {
        Some(text) => format!("0x{:04X} ({})", opcode, text),
        None => format!("0x{:04X}", opcode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_known() {
        assert_eq!(describe(CHANNEL_CONTROL), Some("single channel control"));
        assert_eq!(describe(DISCOVERY_REQUEST), Some("discovery request"));
    }

    #[test]
    fn test_describe_unknown() {
        assert_eq!(describe(0x4242), None);
        assert_eq!(label(0x4242), "0x4242");
        assert_eq!(label(CHANNEL_STATUS_RESPONSE), "0x0034 (channel status)");
    }
}
