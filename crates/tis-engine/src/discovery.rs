//! Discovery and opcode enumeration drivers.
//!
//! Discovery repeats a broadcast because busy devices often miss a single
//! one:
//!
//! ```text
//! Idle -> Broadcasting(1) -> .. -> Broadcasting(N) -> Listening -> Idle
//! ```
//!
//! Each broadcast is followed by one interval of listening, and the last by
//! a longer final window for late replies. Any valid frame from another
//! address counts as a sighting, not just the discovery reply.
//!
//! Enumeration sends every opcode in a range to one target and records which
//! ones drew a reply. It is a diagnostic tool and is rate limited.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tis_metrics::{metric_defs, MetricLabels};
use tis_packet::Address;

use crate::config::{DiscoveryConfig, EnumerationConfig};
use crate::endpoint::{Endpoint, InboundFrame};
use crate::error::Result;
use crate::registry::DiscoveredAddress;
use crate::signal::StopSignal;
use crate::transport::Transport;

// ============================================================================
// Discovery
// ============================================================================

/// Where a discovery run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DiscoveryState {
    Idle,
    Broadcasting { attempt: u32 },
    Listening,
}

/// Result of a finished discovery run.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    /// Addresses seen during the run, ordered by address.
    pub devices: Vec<DiscoveredAddress>,
    pub broadcasts_sent: u32,
    /// True if the stop signal ended the run early.
    pub cancelled: bool,
}

/// A running discovery.
pub struct DiscoveryHandle {
    devices: mpsc::UnboundedReceiver<DiscoveredAddress>,
    state: watch::Receiver<DiscoveryState>,
    task: JoinHandle<Result<DiscoveryReport>>,
}

impl DiscoveryHandle {
    /// Next newly seen address. Each address is yielded once per run;
    /// `None` once the run has finished.
    pub async fn next_device(&mut self) -> Option<DiscoveredAddress> {
        self.devices.recv().await
    }

    /// Current state.
    pub fn state(&self) -> DiscoveryState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn state_watch(&self) -> watch::Receiver<DiscoveryState> {
        self.state.clone()
    }

    /// Wait for the run to finish.
    pub async fn finish(self) -> Result<DiscoveryReport> {
        self.task.await?
    }
}

/// Start a discovery run on `endpoint`.
///
/// The endpoint's receive loop must be running. The run stops early, with
/// `cancelled` set, within one listening interval of `stop` firing.
pub fn begin_discovery<T: Transport>(
    endpoint: Arc<Endpoint<T>>,
    config: DiscoveryConfig,
    stop: StopSignal,
) -> DiscoveryHandle {
    // Subscribe before the first send so no reply is missed.
    let frames = endpoint.subscribe_frames();
    let (state_tx, state_rx) = watch::channel(DiscoveryState::Idle);
    let (device_tx, device_rx) = mpsc::unbounded_channel();

    let run = DiscoveryRun {
        endpoint,
        config,
        stop,
        frames,
        state: state_tx,
        found: device_tx,
        seen: BTreeSet::new(),
    };
    DiscoveryHandle {
        devices: device_rx,
        state: state_rx,
        task: tokio::spawn(run.run()),
    }
}

struct DiscoveryRun<T: Transport> {
    endpoint: Arc<Endpoint<T>>,
    config: DiscoveryConfig,
    stop: StopSignal,
    frames: broadcast::Receiver<InboundFrame>,
    state: watch::Sender<DiscoveryState>,
    found: mpsc::UnboundedSender<DiscoveredAddress>,
    seen: BTreeSet<Address>,
}

impl<T: Transport> DiscoveryRun<T> {
    async fn run(mut self) -> Result<DiscoveryReport> {
        let message = self.endpoint.identity().discovery_with(self.config.opcode);
        let labels = self.endpoint.labels().to_labels();
        let mut broadcasts_sent = 0;
        let mut cancelled = false;

        for attempt in 1..=self.config.attempts {
            self.state.send_replace(DiscoveryState::Broadcasting { attempt });
            info!(
                "discovery broadcast {}/{} (0x{:04X})",
                attempt, self.config.attempts, self.config.opcode
            );
            match self.endpoint.send(&message).await {
                Ok(()) => {
                    broadcasts_sent += 1;
                    metrics::counter!(metric_defs::DISCOVERY_BROADCASTS.name, &labels)
                        .increment(1);
                }
                // Later broadcasts may still get through.
                Err(err) => warn!("discovery broadcast {} failed: {}", attempt, err),
            }
            if self.listen(self.config.interval).await {
                cancelled = true;
                break;
            }
        }

        if !cancelled {
            self.state.send_replace(DiscoveryState::Listening);
            debug!("waiting {:?} for late replies", self.config.final_window);
            cancelled = self.listen(self.config.final_window).await;
        }
        self.state.send_replace(DiscoveryState::Idle);

        let registry = self.endpoint.registry();
        let devices: Vec<DiscoveredAddress> = self
            .seen
            .iter()
            .filter_map(|address| registry.get(*address))
            .collect();
        info!(
            "discovery {}: {} device(s) after {} broadcast(s)",
            if cancelled { "cancelled" } else { "finished" },
            devices.len(),
            broadcasts_sent
        );
        Ok(DiscoveryReport {
            devices,
            broadcasts_sent,
            cancelled,
        })
    }

    /// Absorb frames for `window`. Returns true if stopped.
    async fn listen(&mut self, window: Duration) -> bool {
        let deadline = Instant::now() + window;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return false,
                _ = self.stop.stopped() => return true,
                received = self.frames.recv() => match received {
                    Ok(inbound) => self.sighted(inbound.frame.source).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("discovery missed {} frame(s)", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tokio::time::sleep_until(deadline).await;
                        return false;
                    }
                },
            }
        }
    }

    async fn sighted(&mut self, address: Address) {
        if !self.seen.insert(address) {
            return;
        }
        let Some(device) = self.endpoint.registry().get(address) else {
            return;
        };
        debug!("discovery saw {} ({})", device.address, device.label);
        let _ = self.found.send(device);

        if self.config.query_names {
            let query = self.endpoint.identity().device_name_query(address);
            if let Err(err) = self.endpoint.send(&query).await {
                warn!("name query to {} failed: {}", address, err);
            }
        }
    }
}

// ============================================================================
// Enumeration
// ============================================================================

/// A reply drawn by an enumeration probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumerationHit {
    /// Opcode of the most recent probe when the reply arrived.
    pub probe: u16,
    pub responder: Address,
    pub reply_opcode: u16,
    /// Reply carried the probe's own opcode.
    pub echo: bool,
}

/// Result of an enumeration run.
#[derive(Debug, Clone, Serialize)]
pub struct EnumerationReport {
    pub target: Address,
    pub probes_sent: u32,
    pub hits: Vec<EnumerationHit>,
    pub cancelled: bool,
}

impl EnumerationReport {
    /// Distinct probe opcodes that drew at least one reply.
    pub fn responsive_opcodes(&self) -> Vec<u16> {
        let mut opcodes: Vec<u16> = self.hits.iter().map(|hit| hit.probe).collect();
        opcodes.sort_unstable();
        opcodes.dedup();
        opcodes
    }
}

/// Probe every opcode in `config.start..=config.end` against `target`.
///
/// One empty-payload frame is sent per opcode, followed by `config.delay`;
/// every `config.batch_size` probes add `config.batch_pause`. Replies from
/// `target` (any source if `target` is broadcast) are attributed to the most
/// recent probe. Hits are also pushed to `progress` as they arrive.
pub async fn enumerate_opcodes<T: Transport>(
    endpoint: &Endpoint<T>,
    target: Address,
    config: &EnumerationConfig,
    mut stop: StopSignal,
    progress: Option<mpsc::UnboundedSender<EnumerationHit>>,
) -> Result<EnumerationReport> {
    let mut frames = endpoint.subscribe_frames();
    let identity = endpoint.identity();
    let labels = endpoint.labels();
    let batch_size = config.batch_size.max(1);
    let mut report = EnumerationReport {
        target,
        probes_sent: 0,
        hits: Vec::new(),
        cancelled: false,
    };

    info!(
        "enumerating 0x{:04X}..=0x{:04X} against {} ({} probes)",
        config.start,
        config.end,
        target,
        config.probe_count()
    );

    let mut last_probe = None;
    if config.start <= config.end {
        for opcode in config.start..=config.end {
            if stop.is_stopped() {
                report.cancelled = true;
                break;
            }
            endpoint.send(&identity.raw(target, opcode, Vec::new())).await?;
            report.probes_sent += 1;
            last_probe = Some(opcode);
            metrics::counter!(metric_defs::ENUMERATION_PROBES.name, &labels.to_labels())
                .increment(1);

            let mut wait = config.delay;
            if report.probes_sent % batch_size == 0 {
                wait += config.batch_pause;
                debug!("enumeration at 0x{:04X}, {} hit(s)", opcode, report.hits.len());
            }
            let stopped = collect_hits(
                &mut frames,
                &mut stop,
                wait,
                target,
                opcode,
                &mut report,
                progress.as_ref(),
                labels,
            )
            .await;
            if stopped {
                report.cancelled = true;
                break;
            }
        }
    }

    if let (Some(probe), false) = (last_probe, report.cancelled) {
        report.cancelled = collect_hits(
            &mut frames,
            &mut stop,
            config.settle,
            target,
            probe,
            &mut report,
            progress.as_ref(),
            labels,
        )
        .await;
    }

    info!(
        "enumeration sent {} probe(s), {} opcode(s) answered",
        report.probes_sent,
        report.responsive_opcodes().len()
    );
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn collect_hits(
    frames: &mut broadcast::Receiver<InboundFrame>,
    stop: &mut StopSignal,
    window: Duration,
    target: Address,
    probe: u16,
    report: &mut EnumerationReport,
    progress: Option<&mpsc::UnboundedSender<EnumerationHit>>,
    labels: &MetricLabels,
) -> bool {
    let deadline = Instant::now() + window;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return false,
            _ = stop.stopped() => return true,
            received = frames.recv() => match received {
                Ok(inbound) => {
                    let frame = inbound.frame;
                    if !target.is_broadcast() && frame.source != target {
                        continue;
                    }
                    let hit = EnumerationHit {
                        probe,
                        responder: frame.source,
                        reply_opcode: frame.opcode,
                        echo: frame.opcode == probe,
                    };
                    debug!("probe 0x{:04X} drew 0x{:04X} from {}", probe, frame.opcode, frame.source);
                    metrics::counter!(metric_defs::ENUMERATION_RESPONSES.name, &labels.to_labels())
                        .increment(1);
                    if let Some(progress) = progress {
                        let _ = progress.send(hit.clone());
                    }
                    report.hits.push(hit);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("enumeration missed {} frame(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tokio::time::sleep_until(deadline).await;
                    return false;
                }
            },
        }
    }
}
