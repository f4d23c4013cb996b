//! Standard handlers.
//!
//! Exact-match handlers cover the opcodes with typed payloads that the
//! engine itself relies on. Category handlers recognise whole opcode families
//! and fall back to [`DomainEvent::Described`] for codes without a typed
//! payload.

use tis_packet::opcodes::{self, describe};
use tis_packet::payload::{
    ChannelControl, ChannelFeedback, ChannelStatus, CurtainControl, DeviceName,
    MultiSensorReport, SceneControl, SecurityControl, TemperatureReport, TypedPayload,
    UniversalSwitch,
};
use tis_packet::{device_model, Frame, PayloadError};

use crate::dispatch::{handler_fn, Dispatcher, DispatcherBuilder, DomainEvent, Handler};

type HandlerResult = Result<Option<DomainEvent>, PayloadError>;

fn described(opcode: u16) -> Option<DomainEvent> {
    describe(opcode).map(|description| DomainEvent::Described {
        opcode,
        description,
    })
}

// ============================================================================
// Exact-match handlers
// ============================================================================

fn channel_control(frame: &Frame) -> HandlerResult {
    ChannelControl::parse(&frame.payload).map(|c| Some(DomainEvent::ChannelCommand(c)))
}

fn channel_feedback(frame: &Frame) -> HandlerResult {
    ChannelFeedback::parse(&frame.payload).map(|f| Some(DomainEvent::ChannelFeedback(f)))
}

fn channel_status(frame: &Frame) -> HandlerResult {
    ChannelStatus::parse(&frame.payload).map(|s| Some(DomainEvent::ChannelStatus(s)))
}

fn device_name(frame: &Frame) -> HandlerResult {
    let name = DeviceName::parse(&frame.payload)?;
    Ok(Some(DomainEvent::DeviceName { name: name.name }))
}

fn discovery_reply(frame: &Frame) -> HandlerResult {
    Ok(Some(DomainEvent::DiscoveryReply {
        kind: frame.source_kind,
        model: device_model(frame.source_kind),
    }))
}

// ============================================================================
// Category handlers
// ============================================================================

/// Scenes, sequences and channel status requests.
fn lighting(frame: &Frame) -> HandlerResult {
    match frame.opcode {
        opcodes::SCENE_CONTROL => {
            SceneControl::parse(&frame.payload).map(|s| Some(DomainEvent::Scene(s)))
        }
        opcodes::SCENE_RESPONSE
        | opcodes::SEQUENCE_CONTROL
        | opcodes::SEQUENCE_RESPONSE
        | opcodes::CHANNEL_STATUS_REQUEST => Ok(described(frame.opcode)),
        _ => Ok(None),
    }
}

fn curtain(frame: &Frame) -> HandlerResult {
    match frame.opcode {
        opcodes::CURTAIN_CONTROL => {
            CurtainControl::parse(&frame.payload).map(|c| Some(DomainEvent::Curtain(c)))
        }
        opcodes::CURTAIN_RESPONSE
        | opcodes::CURTAIN_STATUS_REQUEST
        | opcodes::CURTAIN_STATUS_RESPONSE => Ok(described(frame.opcode)),
        _ => Ok(None),
    }
}

fn universal_switch(frame: &Frame) -> HandlerResult {
    match frame.opcode {
        opcodes::UNIVERSAL_SWITCH => UniversalSwitch::parse(&frame.payload)
            .map(|s| Some(DomainEvent::UniversalSwitch(s))),
        opcodes::UNIVERSAL_SWITCH_RESPONSE => Ok(described(frame.opcode)),
        _ => Ok(None),
    }
}

fn climate(frame: &Frame) -> HandlerResult {
    match frame.opcode {
        0xE120 | 0xE121 | 0xE124 | 0xE125 | 0x1900 | 0x1901 | 0xE0EC..=0xE0EF
        | 0xE3D8..=0xE3DB | 0x1944 => Ok(described(frame.opcode)),
        _ => Ok(None),
    }
}

fn security(frame: &Frame) -> HandlerResult {
    match frame.opcode {
        opcodes::SECURITY_CONTROL => {
            SecurityControl::parse(&frame.payload).map(|s| Some(DomainEvent::Security(s)))
        }
        opcodes::SECURITY_RESPONSE
        | opcodes::SECURITY_STATUS_REQUEST
        | opcodes::SECURITY_STATUS_RESPONSE => Ok(described(frame.opcode)),
        _ => Ok(None),
    }
}

fn sensors(frame: &Frame) -> HandlerResult {
    match frame.opcode {
        opcodes::SENSOR_RESPONSE => MultiSensorReport::parse(&frame.payload)
            .map(|r| Some(DomainEvent::MultiSensor(r))),
        opcodes::TEMPERATURE_RESPONSE => TemperatureReport::parse(&frame.payload)
            .map(|r| Some(DomainEvent::Temperature(r))),
        opcodes::SENSOR_REQUEST
        | opcodes::TEMPERATURE_REQUEST
        | 0x012C
        | 0x012D
        | 0xDC22
        | 0x02CA
        | 0x2024
        | 0x2025
        | 0x2020
        | 0x2021 => Ok(described(frame.opcode)),
        _ => Ok(None),
    }
}

fn audio(frame: &Frame) -> HandlerResult {
    match frame.opcode {
        0x0218 | 0x0219 | 0x0222..=0x0225 | 0x02E0..=0x02E3 | 0xE140..=0xE143 => {
            Ok(described(frame.opcode))
        }
        _ => Ok(None),
    }
}

fn energy(frame: &Frame) -> HandlerResult {
    match frame.opcode {
        opcodes::ENERGY_REQUEST | opcodes::ENERGY_RESPONSE => Ok(described(frame.opcode)),
        _ => Ok(None),
    }
}

fn system(frame: &Frame) -> HandlerResult {
    match frame.opcode {
        opcodes::SYSTEM_STATUS
        | opcodes::SYSTEM_STATUS_RESPONSE
        | opcodes::DISCOVERY_REQUEST
        | opcodes::DEVICE_NAME_REQUEST => Ok(described(frame.opcode)),
        _ => Ok(None),
    }
}

fn boxed<F>(name: &'static str, f: F) -> Box<dyn Handler>
where
    F: Fn(&Frame) -> HandlerResult + Send + Sync + 'static,
{
    Box::new(handler_fn(name, f))
}

/// The category chain in dispatch order.
pub fn category_handlers() -> Vec<Box<dyn Handler>> {
    vec![
        boxed("lighting", lighting),
        boxed("curtain", curtain),
        boxed("universal_switch", universal_switch),
        boxed("climate", climate),
        boxed("security", security),
        boxed("sensors", sensors),
        boxed("audio", audio),
        boxed("energy", energy),
        boxed("system", system),
    ]
}

/// Builder preloaded with the standard exact-match handlers and category chain.
pub fn standard_builder() -> DispatcherBuilder {
    let mut builder = Dispatcher::builder()
        .register(opcodes::CHANNEL_CONTROL, handler_fn("channel_control", channel_control))
        .register(opcodes::CHANNEL_FEEDBACK, handler_fn("channel_feedback", channel_feedback))
        .register(opcodes::CHANNEL_STATUS_RESPONSE, handler_fn("channel_status", channel_status))
        .register(opcodes::DEVICE_NAME_RESPONSE, handler_fn("device_name", device_name))
        .register(opcodes::DISCOVERY_RESPONSE, handler_fn("discovery", discovery_reply));
    for handler in category_handlers() {
        builder = builder.register_boxed_category(handler);
    }
    builder
}

/// Dispatcher with every standard handler.
pub fn standard_dispatcher() -> Dispatcher {
    standard_builder().build()
}
