//! Protocol endpoint: one transport binding with its receive path.
//!
//! An [`Endpoint`] ties a [`Transport`] to the dispatcher, the correlation
//! tracker and the device registry. Exactly one task should run
//! [`Endpoint::run_receive_loop`]; any number of tasks may send through a
//! shared `Arc<Endpoint>` while it runs.
//!
//! Everything the receive path learns is published on a typed
//! [`broadcast`] channel of [`EngineEvent`]s. Raw valid frames are published
//! separately as [`InboundFrame`]s for the discovery and enumeration drivers.

use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use tis_metrics::{metric_defs, MetricLabels};
use tis_packet::{
    decode_frame, envelope_origin, strip_envelope, Address, DecodeError, Frame, Identity, Message,
};

use crate::categories::standard_dispatcher;
use crate::config::EngineConfig;
use crate::correlation::{AddressMatch, CorrelationTracker, MatchedReply, ReplyTable};
use crate::dispatch::{Dispatcher, DomainEvent, HandlerOutcome};
use crate::error::{EngineError, Result};
use crate::registry::{DeviceRegistry, DiscoveredAddress, RegistryUpdate};
use crate::signal::StopSignal;
use crate::transport::{Destination, Transport};

// ============================================================================
// Events
// ============================================================================

/// Something the receive path observed.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A handler turned a frame into a domain event.
    Domain {
        source: Address,
        opcode: u16,
        handler: &'static str,
        event: DomainEvent,
    },
    /// No handler recognised the opcode.
    Unhandled { source: Address, opcode: u16 },
    /// A handler failed on the payload.
    HandlerError {
        source: Address,
        opcode: u16,
        handler: &'static str,
        cause: String,
    },
    /// A datagram failed to decode.
    Rejected {
        origin: Option<SocketAddr>,
        error: DecodeError,
        /// Hex dump of the datagram as received.
        raw_hex: String,
    },
    /// A frame answered a pending request.
    Matched(MatchedReply),
    /// A new address appeared on the bus.
    DeviceDiscovered(DiscoveredAddress),
    /// A device reported a new name.
    DeviceRenamed(DiscoveredAddress),
}

/// A valid frame with its arrival metadata and what the dispatcher made of
/// it.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub frame: Frame,
    pub origin: Option<SocketAddr>,
    pub received_at: Instant,
    pub outcome: HandlerOutcome,
}

/// Per-call correlation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationOptions {
    /// Wait per attempt.
    pub timeout: Duration,
    /// Total sends, at least one.
    pub attempts: u32,
}

impl CorrelationOptions {
    /// Options from the engine defaults.
    pub fn from_config(config: &EngineConfig) -> Self {
        CorrelationOptions {
            timeout: config.correlation_timeout,
            attempts: config.correlation_attempts,
        }
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// How long a sent frame is remembered for loopback detection.
const LOOPBACK_WINDOW: Duration = Duration::from_secs(2);

/// Most sent frames remembered for loopback detection.
const LOOPBACK_CAPACITY: usize = 64;

/// A transport binding with dispatch, correlation and discovery state.
pub struct Endpoint<T: Transport> {
    transport: T,
    config: EngineConfig,
    dispatcher: Arc<Dispatcher>,
    tracker: CorrelationTracker,
    registry: DeviceRegistry,
    events: broadcast::Sender<EngineEvent>,
    frames: broadcast::Sender<InboundFrame>,
    labels: MetricLabels,
    recent_sends: Mutex<VecDeque<(Instant, Vec<u8>)>>,
}

impl<T: Transport> Endpoint<T> {
    /// Endpoint with the standard handlers.
    pub fn new(transport: T, config: EngineConfig) -> Self {
        Self::with_dispatcher(transport, config, standard_dispatcher())
    }

    /// Endpoint with a caller-built dispatcher.
    pub fn with_dispatcher(transport: T, config: EngineConfig, dispatcher: Dispatcher) -> Self {
        let replies = ReplyTable::standard().with_adjacent_fallback(config.adjacent_reply_fallback);
        let capacity = config.event_capacity.max(1);
        let (events, _) = broadcast::channel(capacity);
        let (frames, _) = broadcast::channel(capacity);
        let labels = MetricLabels::new(config.identity.address.to_string());
        Endpoint {
            transport,
            config,
            dispatcher: Arc::new(dispatcher),
            tracker: CorrelationTracker::new(replies),
            registry: DeviceRegistry::new(),
            events,
            frames,
            labels,
            recent_sends: Mutex::new(VecDeque::with_capacity(LOOPBACK_CAPACITY)),
        }
    }

    /// Our source identity.
    pub fn identity(&self) -> Identity {
        self.config.identity
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn tracker(&self) -> &CorrelationTracker {
        &self.tracker
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub(crate) fn labels(&self) -> &MetricLabels {
        &self.labels
    }

    /// Receive every event from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Receive every valid inbound frame from now on.
    pub fn subscribe_frames(&self) -> broadcast::Receiver<InboundFrame> {
        self.frames.subscribe()
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Encode and send a message without waiting for a reply.
    pub async fn send(&self, message: &Message) -> Result<()> {
        let bytes = message.encode()?;
        let destination = Destination::for_message(message);
        if let Err(err) = self.transport.send(&bytes, destination).await {
            warn!(
                "send 0x{:04X} to {} failed: {}",
                message.opcode, message.target, err
            );
            metrics::counter!(metric_defs::SEND_FAILURES.name, &self.labels.to_labels())
                .increment(1);
            return Err(EngineError::SendFailure(err));
        }
        self.remember_sent(bytes.clone());
        trace!(
            "sent 0x{:04X} to {}: {}",
            message.opcode,
            message.target,
            hex::encode(&bytes)
        );
        metrics::counter!(
            metric_defs::FRAMES_SENT.name,
            &self.labels.with_opcode(message.opcode)
        )
        .increment(1);
        Ok(())
    }

    /// Send a request and wait for its paired reply, using the configured
    /// defaults.
    pub async fn request(&self, message: &Message) -> Result<MatchedReply> {
        self.send_with_correlation(message, CorrelationOptions::from_config(&self.config))
            .await
    }

    /// Send a request and wait for its paired reply.
    ///
    /// The request is re-sent up to `options.attempts` times, waiting
    /// `options.timeout` after each send. A reply to any attempt completes
    /// the call. Requires the receive loop to be running on another task.
    pub async fn send_with_correlation(
        &self,
        message: &Message,
        options: CorrelationOptions,
    ) -> Result<MatchedReply> {
        let attempts = options.attempts.max(1);
        let scope = AddressMatch::for_target(message.target, self.config.address_policy);
        let (id, mut reply) = self
            .tracker
            .register_waiter(message.opcode, message.target, scope);
        self.record_pending();

        let opcode_labels = self.labels.with_opcode(message.opcode);
        let mut sends = 0;
        for attempt in 1..=attempts {
            if attempt > 1 {
                self.tracker.record_retry(id);
                metrics::counter!(metric_defs::CORRELATION_RETRIES.name, &opcode_labels)
                    .increment(1);
                debug!(
                    "retry {}/{} for 0x{:04X} to {}",
                    attempt, attempts, message.opcode, message.target
                );
            }
            if let Err(err) = self.send(message).await {
                self.tracker.expire(id);
                self.record_pending();
                return Err(err);
            }
            sends = attempt;
            match tokio::time::timeout(options.timeout, &mut reply).await {
                Ok(Ok(matched)) => return Ok(matched),
                // Expired by someone else.
                Ok(Err(_)) => break,
                Err(_) => continue,
            }
        }

        self.tracker.expire(id);
        self.record_pending();
        metrics::counter!(metric_defs::CORRELATION_TIMEOUTS.name, &opcode_labels).increment(1);
        debug!(
            "no reply to 0x{:04X} from {} after {} attempt(s)",
            message.opcode, message.target, sends
        );
        Err(EngineError::CorrelationTimeout {
            opcode: message.opcode,
            target: message.target,
            attempts: sends,
        })
    }

    fn remember_sent(&self, bytes: Vec<u8>) {
        let mut recent = self.recent_sends.lock();
        if recent.len() == LOOPBACK_CAPACITY {
            recent.pop_front();
        }
        recent.push_back((Instant::now(), bytes));
    }

    /// Whether `frame` is a copy of something we sent within the loopback
    /// window.
    fn is_loopback(&self, frame: &[u8]) -> bool {
        let now = Instant::now();
        let mut recent = self.recent_sends.lock();
        while let Some((sent_at, _)) = recent.front() {
            if now.saturating_duration_since(*sent_at) <= LOOPBACK_WINDOW {
                break;
            }
            recent.pop_front();
        }
        recent.iter().any(|(_, bytes)| bytes.as_slice() == frame)
    }

    fn record_pending(&self) {
        metrics::gauge!(
            metric_defs::CORRELATION_PENDING.name,
            &self.labels.to_labels()
        )
        .set(self.tracker.pending_count() as f64);
    }

    // ========================================================================
    // Receiving
    // ========================================================================

    /// Run the receive path for one datagram.
    ///
    /// Returns the dispatch outcome, or `None` if the datagram was rejected
    /// or carried one of our own frames.
    pub fn process_datagram(
        &self,
        bytes: &[u8],
        origin: Option<SocketAddr>,
    ) -> Option<HandlerOutcome> {
        metrics::histogram!(metric_defs::FRAME_SIZE.name, &self.labels.to_labels())
            .record(bytes.len() as f64);

        let frame = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                self.report_rejected(bytes, origin, err);
                return None;
            }
        };

        let identity = self.config.identity;
        if frame.source == identity.address && frame.source_kind == identity.kind {
            if self.config.ignore_own_frames && self.is_loopback(strip_envelope(bytes)) {
                trace!("ignoring own frame 0x{:04X}", frame.opcode);
                return None;
            }
            debug!(
                "0x{:04X} from {:?} carries our identity {}",
                frame.opcode, origin, identity.address
            );
        }

        let opcode_labels = self.labels.with_opcode(frame.opcode);
        metrics::counter!(metric_defs::FRAMES_RECEIVED.name, &opcode_labels).increment(1);
        trace!(
            "rx {} -> {} op={} len={}",
            frame.source,
            frame.target,
            tis_packet::opcodes::label(frame.opcode),
            frame.payload.len()
        );

        let host = envelope_origin(bytes)
            .map(IpAddr::V4)
            .or_else(|| origin.map(|addr| addr.ip()));
        match self.registry.observe(&frame, host) {
            RegistryUpdate::New(device) => {
                info!("found {} at {}", device.label, device.address);
                metrics::gauge!(
                    metric_defs::DISCOVERY_DEVICES.name,
                    &self.labels.to_labels()
                )
                .set(self.registry.len() as f64);
                self.emit(EngineEvent::DeviceDiscovered(device));
            }
            RegistryUpdate::Renamed(device) => {
                info!("{} is named {}", device.address, device.label);
                self.emit(EngineEvent::DeviceRenamed(device));
            }
            RegistryUpdate::Seen => {}
        }

        match self.tracker.try_match(&frame) {
            Some(matched) => {
                debug!(
                    "0x{:04X} from {} answers 0x{:04X} after {:?}",
                    frame.opcode, frame.source, matched.request_opcode, matched.latency
                );
                let request_labels = self.labels.with_opcode(matched.request_opcode);
                metrics::counter!(metric_defs::CORRELATION_MATCHED.name, &request_labels)
                    .increment(1);
                metrics::histogram!(metric_defs::CORRELATION_LATENCY.name, &request_labels)
                    .record(matched.latency.as_secs_f64() * 1000.0);
                self.record_pending();
                self.emit(EngineEvent::Matched(matched));
            }
            None => {
                metrics::counter!(
                    metric_defs::CORRELATION_UNSOLICITED.name,
                    &self.labels.to_labels()
                )
                .increment(1);
            }
        }

        let outcome = self.dispatcher.dispatch(&frame);
        let _ = self.frames.send(InboundFrame {
            frame: frame.clone(),
            origin,
            received_at: Instant::now(),
            outcome: outcome.clone(),
        });

        match &outcome {
            HandlerOutcome::Handled { handler, event } => {
                metrics::counter!(
                    metric_defs::DISPATCH_HANDLED.name,
                    &self.labels.with(&[("handler", handler.to_string())])
                )
                .increment(1);
                self.emit(EngineEvent::Domain {
                    source: frame.source,
                    opcode: frame.opcode,
                    handler: *handler,
                    event: event.clone(),
                });
            }
            HandlerOutcome::Unhandled(opcode) => {
                trace!("unhandled 0x{:04X} from {}", opcode, frame.source);
                metrics::counter!(
                    metric_defs::DISPATCH_UNHANDLED.name,
                    &self.labels.to_labels()
                )
                .increment(1);
                self.emit(EngineEvent::Unhandled {
                    source: frame.source,
                    opcode: *opcode,
                });
            }
            HandlerOutcome::HandlerError {
                opcode,
                handler,
                cause,
            } => {
                warn!(
                    "handler {} failed on 0x{:04X} from {}: {} (payload {})",
                    handler,
                    opcode,
                    frame.source,
                    cause,
                    hex::encode(&frame.payload)
                );
                metrics::counter!(metric_defs::DISPATCH_ERRORS.name, &opcode_labels)
                    .increment(1);
                self.emit(EngineEvent::HandlerError {
                    source: frame.source,
                    opcode: *opcode,
                    handler: *handler,
                    cause: cause.clone(),
                });
            }
        }
        Some(outcome)
    }

    fn report_rejected(&self, bytes: &[u8], origin: Option<SocketAddr>, error: DecodeError) {
        let raw_hex = hex::encode(bytes);
        match &error {
            DecodeError::ChecksumMismatch {
                frame,
                received,
                computed,
            } => warn!(
                "checksum mismatch from {:?}: received 0x{:04X}, computed 0x{:04X}, \
                 {} -> {} op=0x{:04X}, raw {}",
                origin, received, computed, frame.source, frame.target, frame.opcode, raw_hex
            ),
            other => warn!("rejected datagram from {:?}: {}, raw {}", origin, other, raw_hex),
        }
        metrics::counter!(
            metric_defs::FRAMES_REJECTED.name,
            &self.labels.with(&[("reason", error.as_label().to_string())])
        )
        .increment(1);
        self.emit(EngineEvent::Rejected {
            origin,
            error,
            raw_hex,
        });
    }

    /// Receive and process datagrams until `stop` fires or the transport
    /// closes.
    ///
    /// Each wait for bytes is bounded by the configured receive timeout;
    /// stale pending requests are swept between waits. Decode and handler
    /// failures are reported and never end the loop.
    pub async fn run_receive_loop(&self, mut stop: StopSignal) -> Result<()> {
        info!("receive loop started for {}", self.config.identity.address);
        loop {
            if stop.is_stopped() {
                break;
            }
            tokio::select! {
                _ = stop.stopped() => break,
                received = tokio::time::timeout(self.config.receive_timeout, self.transport.recv()) => {
                    match received {
                        Ok(Ok(datagram)) => {
                            self.process_datagram(&datagram.bytes, datagram.origin);
                        }
                        Ok(Err(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                            info!("transport closed");
                            return Err(EngineError::TransportClosed);
                        }
                        Ok(Err(err)) => warn!("receive failed: {}", err),
                        Err(_) => trace!("receive idle"),
                    }
                }
            }

            let swept = self.tracker.expire_older_than(self.config.pending_ttl);
            if !swept.is_empty() {
                debug!("swept {} stale pending request(s)", swept.len());
                self.record_pending();
            }
        }
        info!("receive loop stopped");
        Ok(())
    }
}
