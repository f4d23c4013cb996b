//! Device-type catalogue.

/// Known device kinds and their model names.
pub const DEVICE_MODELS: &[(u16, &str)] = &[
    (0x8022, "TIS-HEALTH-CM"),
    (0x80BA, "TIS-OS-MMV2-IRE"),
    (0x802B, "RCU-24R20Z"),
    (0x807A, "TIS-ZIG-PORT"),
    (0x2332, "LUNA-TFT-43"),
    (0x0076, "TIS-4DI-IN"),
    (0x3301, "TIS-M3-MOTOR"),
    (0xFFFE, "Light Dimmer (Generic)"),
    (0x0000, "Control Panel (Generic)"),
];

/// Model name for a device kind, if known.
pub fn device_model(kind: u16) -> Option<&'static str> {
    DEVICE_MODELS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, name)| *name)
}

/// Model name for a device kind, or `Unknown (0xNNNN)`.
pub fn device_label(kind: u16) -> String {
    match device_model(kind) {
        Some(name) => name.to_string(),
        None => format!("Unknown (0x{:04X})", kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_model() {
        assert_eq!(device_model(0x8022), Some("TIS-HEALTH-CM"));
        assert_eq!(device_model(0x3301), Some("TIS-M3-MOTOR"));
        assert_eq!(device_model(0x1234), None);
        assert_eq!(device_label(0x1234), "Unknown (0x1234)");
    }
}
