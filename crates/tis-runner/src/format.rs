//! One-line renderings of frames and events for the terminal.

use tis_engine::{EngineEvent, HandlerOutcome};
use tis_packet::{opcodes, DecodeError, Frame};

/// `1.10 -> 1.254 0x0034 (channel status) [03640032]`
pub fn describe_frame(frame: &Frame) -> String {
    format!(
        "{} -> {} {} [{}]",
        frame.source,
        frame.target,
        opcodes::label(frame.opcode),
        hex::encode(&frame.payload)
    )
}

/// A frame followed by what the dispatcher made of it.
pub fn describe_outcome(frame: &Frame, outcome: &HandlerOutcome) -> String {
    let head = describe_frame(frame);
    match outcome {
        HandlerOutcome::Handled { event, .. } => match serde_json::to_string(event) {
            Ok(json) => format!("{} => {}", head, json),
            Err(_) => format!("{} => {:?}", head, event),
        },
        HandlerOutcome::Unhandled(_) => head,
        HandlerOutcome::HandlerError { handler, cause, .. } => {
            format!("{} !! {}: {}", head, handler, cause)
        }
    }
}

/// A decode failure with the detail needed to spot protocol drift.
pub fn describe_rejection(error: &DecodeError, raw_hex: &str) -> String {
    match error {
        DecodeError::ChecksumMismatch {
            frame,
            received,
            computed,
        } => format!(
            "BAD CRC {} (received 0x{:04X}, computed 0x{:04X}) raw {}",
            describe_frame(frame),
            received,
            computed,
            raw_hex
        ),
        other => format!("REJECTED {} raw {}", other, raw_hex),
    }
}

/// Terminal line for an engine event. `None` for events `listen` does not
/// print.
pub fn describe_event(event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::Rejected { error, raw_hex, .. } => Some(describe_rejection(error, raw_hex)),
        EngineEvent::Matched(reply) => Some(format!(
            "matched 0x{:04X} -> {} after {} ms",
            reply.request_opcode,
            describe_frame(&reply.frame),
            reply.latency.as_millis()
        )),
        EngineEvent::DeviceDiscovered(device) => Some(format!(
            "new device {} kind 0x{:04X}{}",
            device.label,
            device.kind,
            device
                .host
                .map(|host| format!(" via {}", host))
                .unwrap_or_default()
        )),
        EngineEvent::DeviceRenamed(device) => Some(format!("renamed {}", device.label)),
        EngineEvent::Domain { .. }
        | EngineEvent::Unhandled { .. }
        | EngineEvent::HandlerError { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tis_engine::standard_dispatcher;
    use tis_packet::{decode_frame, Address, Identity};

    fn status_frame() -> Frame {
        let msg = Identity::new(Address::new(1, 10), 0x0258).raw(
            Address::new(1, 254),
            0x0034,
            vec![3, 100, 0, 50],
        );
        decode_frame(&msg.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_describe_frame() {
        assert_eq!(
            describe_frame(&status_frame()),
            "1.10 -> 1.254 0x0034 (channel status) [03640032]"
        );
    }

    #[test]
    fn test_describe_outcome() {
        let frame = status_frame();
        let outcome = standard_dispatcher().dispatch(&frame);
        assert_eq!(
            describe_outcome(&frame, &outcome),
            r#"1.10 -> 1.254 0x0034 (channel status) [03640032] => {"type":"channel_status","levels":[100,0,50]}"#
        );
    }

    #[test]
    fn test_describe_checksum_rejection() {
        let mut bytes = status_frame().to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let error = decode_frame(&bytes).unwrap_err();
        let line = describe_rejection(&error, &hex::encode(&bytes));
        assert!(line.starts_with("BAD CRC 1.10 -> 1.254"));
        assert!(line.contains("received 0x"));
    }
}
