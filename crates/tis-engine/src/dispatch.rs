//! Opcode dispatch.
//!
//! Two policies are combined in one [`Dispatcher`]:
//!
//! - **Exact match**: an opcode maps to a single handler. Used for the
//!   channel control family and device identity, where the opcode alone says
//!   what the payload is.
//! - **Chain of responsibility**: an ordered list of category handlers
//!   (lighting, curtain, climate, security, sensors, audio, energy). Each may
//!   decline; the first to produce an event wins.
//!
//! The exact table is consulted first. A dispatcher is immutable once built
//! and may be shared across tasks without locking.
//!
//! Handlers run inside the receive path and must not block. A handler that
//! returns an error or panics yields [`HandlerOutcome::HandlerError`]; the
//! next frame is processed normally.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use tis_packet::payload::{
    ChannelControl, ChannelFeedback, ChannelStatus, CurtainControl, MultiSensorReport,
    SceneControl, SecurityControl, TemperatureReport, UniversalSwitch,
};
use tis_packet::{Frame, PayloadError};

// ============================================================================
// Events and outcomes
// ============================================================================

/// What a handler made of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A controller set a channel level.
    ChannelCommand(ChannelControl),
    /// A device acknowledged a channel command.
    ChannelFeedback(ChannelFeedback),
    /// A device reported all channel levels.
    ChannelStatus(ChannelStatus),
    /// A device reported its name.
    DeviceName { name: String },
    /// A device answered discovery.
    DiscoveryReply {
        kind: u16,
        model: Option<&'static str>,
    },
    Scene(SceneControl),
    Curtain(CurtainControl),
    UniversalSwitch(UniversalSwitch),
    Security(SecurityControl),
    MultiSensor(MultiSensorReport),
    Temperature(TemperatureReport),
    /// A recognised opcode with no typed payload.
    Described {
        opcode: u16,
        description: &'static str,
    },
}

/// Result of dispatching one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// A handler produced an event.
    Handled {
        /// Name of the handler.
        handler: &'static str,
        /// The event.
        event: DomainEvent,
    },
    /// No handler recognised the opcode. Common and expected.
    Unhandled(u16),
    /// A handler recognised the opcode but failed on the payload.
    HandlerError {
        /// Frame opcode.
        opcode: u16,
        /// Name of the failing handler.
        handler: &'static str,
        /// Description of the failure.
        cause: String,
    },
}

impl HandlerOutcome {
    /// True for [`HandlerOutcome::Handled`].
    pub fn is_handled(&self) -> bool {
        matches!(self, HandlerOutcome::Handled { .. })
    }

    /// The event, if one was produced.
    pub fn event(&self) -> Option<&DomainEvent> {
        match self {
            HandlerOutcome::Handled { event, .. } => Some(event),
            _ => None,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Turns a frame into a domain event.
pub trait Handler: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Handle a frame.
    ///
    /// `Ok(None)` declines the frame; chain handlers use this to defer to the
    /// next handler.
    fn handle(&self, frame: &Frame) -> Result<Option<DomainEvent>, PayloadError>;
}

/// A [`Handler`] backed by a closure.
pub struct FnHandler<F> {
    name: &'static str,
    f: F,
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&Frame) -> Result<Option<DomainEvent>, PayloadError> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn handle(&self, frame: &Frame) -> Result<Option<DomainEvent>, PayloadError> {
        (self.f)(frame)
    }
}

/// Wrap a closure as a named handler.
pub fn handler_fn<F>(name: &'static str, f: F) -> FnHandler<F>
where
    F: Fn(&Frame) -> Result<Option<DomainEvent>, PayloadError> + Send + Sync,
{
    FnHandler { name, f }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Builds a [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    exact: HashMap<u16, Arc<dyn Handler>>,
    chain: Vec<Arc<dyn Handler>>,
}

impl DispatcherBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `opcode` to `handler`. A later registration for the same opcode
    /// replaces the earlier one.
    pub fn register(mut self, opcode: u16, handler: impl Handler + 'static) -> Self {
        self.exact.insert(opcode, Arc::new(handler));
        self
    }

    /// Route several opcodes to one shared handler.
    pub fn register_many(mut self, opcodes: &[u16], handler: impl Handler + 'static) -> Self {
        let handler: Arc<dyn Handler> = Arc::new(handler);
        for &opcode in opcodes {
            self.exact.insert(opcode, handler.clone());
        }
        self
    }

    /// Append a handler to the chain.
    pub fn register_category(mut self, handler: impl Handler + 'static) -> Self {
        self.chain.push(Arc::new(handler));
        self
    }

    /// Append an already boxed handler to the chain.
    pub fn register_boxed_category(mut self, handler: Box<dyn Handler>) -> Self {
        self.chain.push(Arc::from(handler));
        self
    }

    /// Freeze the tables.
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            exact: self.exact,
            chain: self.chain,
        }
    }
}

/// Immutable opcode-to-handler table.
pub struct Dispatcher {
    exact: HashMap<u16, Arc<dyn Handler>>,
    chain: Vec<Arc<dyn Handler>>,
}

impl Dispatcher {
    /// Start building a dispatcher.
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// A dispatcher with no handlers: every frame is unhandled.
    pub fn empty() -> Self {
        DispatcherBuilder::new().build()
    }

    /// Number of exact-match opcodes.
    pub fn exact_len(&self) -> usize {
        self.exact.len()
    }

    /// Number of chain handlers.
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// Dispatch one frame. Never panics, whatever the handlers do.
    pub fn dispatch(&self, frame: &Frame) -> HandlerOutcome {
        if let Some(handler) = self.exact.get(&frame.opcode) {
            return match run_handler(handler.as_ref(), frame) {
                Some(outcome) => outcome,
                None => HandlerOutcome::Unhandled(frame.opcode),
            };
        }

        for handler in &self.chain {
            if let Some(outcome) = run_handler(handler.as_ref(), frame) {
                return outcome;
            }
        }

        HandlerOutcome::Unhandled(frame.opcode)
    }
}

/// Run a handler, converting errors and panics into outcomes.
/// `None` means the handler declined.
fn run_handler(handler: &dyn Handler, frame: &Frame) -> Option<HandlerOutcome> {
    let name = handler.name();
    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(frame))) {
        Ok(Ok(Some(event))) => Some(HandlerOutcome::Handled {
            handler: name,
            event,
        }),
        Ok(Ok(None)) => None,
        Ok(Err(err)) => Some(HandlerOutcome::HandlerError {
            opcode: frame.opcode,
            handler: name,
            cause: err.to_string(),
        }),
        Err(panic) => Some(HandlerOutcome::HandlerError {
            opcode: frame.opcode,
            handler: name,
            cause: panic_message(panic.as_ref()),
        }),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", msg)
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tis_packet::payload::TypedPayload;
    use tis_packet::{decode_frame, Address, Identity};

    fn frame(opcode: u16, payload: Vec<u8>) -> Frame {
        let msg = Identity::default().raw(Address::new(1, 10), opcode, payload);
        decode_frame(&msg.encode().unwrap()).unwrap()
    }

    fn counting(
        name: &'static str,
        counter: Arc<AtomicUsize>,
    ) -> impl Handler + 'static {
        handler_fn(name, move |frame| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(DomainEvent::Described {
                opcode: frame.opcode,
                description: "test",
            }))
        })
    }

    #[test]
    fn test_exact_dispatch_invokes_only_registered() {
        let counters: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let dispatcher = Dispatcher::builder()
            .register(0x0100, counting("a", counters[0].clone()))
            .register(0x0200, counting("b", counters[1].clone()))
            .register(0x0300, counting("c", counters[2].clone()))
            .build();

        let outcome = dispatcher.dispatch(&frame(0x0200, vec![]));
        match outcome {
            HandlerOutcome::Handled { handler, .. } => assert_eq!(handler, "b"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(counters[0].load(Ordering::SeqCst), 0);
        assert_eq!(counters[1].load(Ordering::SeqCst), 1);
        assert_eq!(counters[2].load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unregistered_is_unhandled() {
        let counter = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::builder()
            .register(0x0100, counting("a", counter.clone()))
            .build();

        assert_eq!(
            dispatcher.dispatch(&frame(0x4242, vec![])),
            HandlerOutcome::Unhandled(0x4242)
        );
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(
            Dispatcher::empty().dispatch(&frame(0x0031, vec![])),
            HandlerOutcome::Unhandled(0x0031)
        );
    }

    #[test]
    fn test_chain_first_non_empty_wins() {
        let declined = Arc::new(AtomicUsize::new(0));
        let declined_clone = declined.clone();
        let late = Arc::new(AtomicUsize::new(0));

        let dispatcher = Dispatcher::builder()
            .register_category(handler_fn("decline", move |_| {
                declined_clone.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }))
            .register_category(handler_fn("accept", |frame| {
                Ok(Some(DomainEvent::Described {
                    opcode: frame.opcode,
                    description: "accepted",
                }))
            }))
            .register_category(counting("late", late.clone()))
            .build();

        let outcome = dispatcher.dispatch(&frame(0x1234, vec![]));
        match outcome {
            HandlerOutcome::Handled { handler, .. } => assert_eq!(handler, "accept"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(declined.load(Ordering::SeqCst), 1);
        assert_eq!(late.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_error_and_panic_are_contained() {
        let dispatcher = Dispatcher::builder()
            .register(0x0031, handler_fn("strict", |frame| {
                ChannelControl::parse(&frame.payload).map(|c| Some(DomainEvent::ChannelCommand(c)))
            }))
            .register(0x0666, handler_fn("panicky", |_| panic!("boom")))
            .build();

        match dispatcher.dispatch(&frame(0x0031, vec![1])) {
            HandlerOutcome::HandlerError { opcode, handler, .. } => {
                assert_eq!(opcode, 0x0031);
                assert_eq!(handler, "strict");
            }
            other => panic!("unexpected {:?}", other),
        }

        match dispatcher.dispatch(&frame(0x0666, vec![])) {
            HandlerOutcome::HandlerError { cause, .. } => assert!(cause.contains("boom")),
            other => panic!("unexpected {:?}", other),
        }

        // Later frames still dispatch.
        assert!(dispatcher.dispatch(&frame(0x0031, vec![1, 50, 0, 0])).is_handled());
    }
}
