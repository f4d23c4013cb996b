//! Metrics infrastructure for the TIS protocol engine.
//!
//! This crate describes every metric the engine emits. It re-exports the
//! `metrics` crate for convenience and defines all metrics as structured
//! [`Metric`] constants to avoid typos and provide rich metadata.
//!
//! # Example
//!
//! ```rust,ignore
//! use tis_metrics::{MetricLabels, metric_defs, describe_metrics};
//!
//! // Initialize metrics descriptions at startup
//! describe_metrics();
//!
//! let labels = MetricLabels::new("1.254");
//! metrics::counter!(metric_defs::FRAMES_SENT.name, &labels.to_labels()).increment(1);
//! ```
//!
//! # Metric Type
//!
//! ```rust
//! use tis_metrics::{Metric, MetricKind};
//! use metrics::Unit;
//!
//! const MY_COUNTER: Metric = Metric::counter("my.counter")
//!     .with_description("A counter metric")
//!     .with_unit(Unit::Count)
//!     .with_labels(&["endpoint", "opcode"]);
//!
//! assert_eq!(MY_COUNTER.kind, MetricKind::Counter);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    /// Returns the kind as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// Use the const constructors to create metrics at compile time.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "tis.frames.received").
    pub name: &'static str,
    /// The kind of metric (counter, gauge, histogram).
    pub kind: MetricKind,
    /// Human-readable description of the metric.
    pub description: &'static str,
    /// The unit of measurement (optional).
    pub unit: Option<Unit>,
    /// Expected label keys for this metric.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new gauge metric with the given name.
    pub const fn gauge(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new histogram metric with the given name.
    pub const fn histogram(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Sets the description for the metric.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit for the metric.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys for the metric.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the metrics recorder.
    ///
    /// This should be called once at startup for each metric.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// Structured metric definitions for the engine.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Frame Layer
    // ========================================================================

    pub const FRAMES_RECEIVED: Metric = Metric::counter("tis.frames.received")
        .with_description("Valid frames received")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint", "opcode"]);

    pub const FRAMES_SENT: Metric = Metric::counter("tis.frames.sent")
        .with_description("Frames sent")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint", "opcode"]);

    pub const FRAMES_REJECTED: Metric = Metric::counter("tis.frames.rejected")
        .with_description("Datagrams that failed to decode")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint", "reason"]);

    pub const FRAME_SIZE: Metric = Metric::histogram("tis.frames.size_bytes")
        .with_description("Received datagram size in bytes")
        .with_unit(Unit::Bytes)
        .with_labels(&["endpoint"]);

    pub const SEND_FAILURES: Metric = Metric::counter("tis.transport.send_failures")
        .with_description("Transport send errors")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint"]);

    // ========================================================================
    // Dispatch
    // ========================================================================

    pub const DISPATCH_HANDLED: Metric = Metric::counter("tis.dispatch.handled")
        .with_description("Frames turned into a domain event")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint", "handler"]);

    pub const DISPATCH_UNHANDLED: Metric = Metric::counter("tis.dispatch.unhandled")
        .with_description("Frames no handler recognised")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint"]);

    pub const DISPATCH_ERRORS: Metric = Metric::counter("tis.dispatch.handler_errors")
        .with_description("Handler failures caught at the dispatch boundary")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint", "opcode"]);

    // ========================================================================
    // Correlation
    // ========================================================================

    pub const CORRELATION_MATCHED: Metric = Metric::counter("tis.correlation.matched")
        .with_description("Replies matched to a pending request")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint", "opcode"]);

    pub const CORRELATION_UNSOLICITED: Metric = Metric::counter("tis.correlation.unsolicited")
        .with_description("Valid frames that matched no pending request")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint"]);

    pub const CORRELATION_TIMEOUTS: Metric = Metric::counter("tis.correlation.timeouts")
        .with_description("Requests that exhausted their attempts without a reply")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint", "opcode"]);

    pub const CORRELATION_RETRIES: Metric = Metric::counter("tis.correlation.retries")
        .with_description("Request re-sends after a timeout")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint", "opcode"]);

    pub const CORRELATION_LATENCY: Metric = Metric::histogram("tis.correlation.latency_ms")
        .with_description("Time from request to matched reply in milliseconds")
        .with_unit(Unit::Milliseconds)
        .with_labels(&["endpoint", "opcode"]);

    pub const CORRELATION_PENDING: Metric = Metric::gauge("tis.correlation.pending")
        .with_description("Requests awaiting a reply")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint"]);

    // ========================================================================
    // Discovery / Enumeration
    // ========================================================================

    pub const DISCOVERY_BROADCASTS: Metric = Metric::counter("tis.discovery.broadcasts")
        .with_description("Discovery broadcasts sent")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint"]);

    pub const DISCOVERY_DEVICES: Metric = Metric::gauge("tis.discovery.devices")
        .with_description("Distinct addresses seen")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint"]);

    pub const ENUMERATION_PROBES: Metric = Metric::counter("tis.enumeration.probes")
        .with_description("Opcode enumeration probes sent")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint"]);

    pub const ENUMERATION_RESPONSES: Metric = Metric::counter("tis.enumeration.responses")
        .with_description("Replies observed during opcode enumeration")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint"]);

    /// All metric definitions for iteration.
    pub const ALL: &[&Metric] = &[
        // Frame Layer
        &FRAMES_RECEIVED,
        &FRAMES_SENT,
        &FRAMES_REJECTED,
        &FRAME_SIZE,
        &SEND_FAILURES,
        // Dispatch
        &DISPATCH_HANDLED,
        &DISPATCH_UNHANDLED,
        &DISPATCH_ERRORS,
        // Correlation
        &CORRELATION_MATCHED,
        &CORRELATION_UNSOLICITED,
        &CORRELATION_TIMEOUTS,
        &CORRELATION_RETRIES,
        &CORRELATION_LATENCY,
        &CORRELATION_PENDING,
        // Discovery / Enumeration
        &DISCOVERY_BROADCASTS,
        &DISCOVERY_DEVICES,
        &ENUMERATION_PROBES,
        &ENUMERATION_RESPONSES,
    ];
}

/// Common labels attached to every metric an endpoint emits.
#[derive(Debug, Clone)]
pub struct MetricLabels {
    /// Local `subnet.device` address of the endpoint.
    pub endpoint: String,
}

impl MetricLabels {
    /// Create labels for an endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Convert to a label list for the `metrics` macros.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("endpoint", self.endpoint.clone())]
    }

    /// Labels plus extra key/value pairs.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }

    /// Labels plus an `opcode` label formatted as `0xNNNN`.
    pub fn with_opcode(&self, opcode: u16) -> Vec<(&'static str, String)> {
        self.with(&[("opcode", format!("0x{:04X}", opcode))])
    }
}

/// Register descriptions for every metric in [`metric_defs::ALL`].
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Install a Prometheus recorder serving `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn install_prometheus_exporter(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}
