//! Command-line interface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use tis_engine::{
    begin_discovery, enumerate_opcodes, standard_dispatcher, CorrelationOptions, Endpoint,
    EngineEvent, InboundFrame, StopSignal,
};
use tis_packet::{Address, Frame, FrameStream};

use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::format::{describe_event, describe_frame, describe_outcome, describe_rejection};
use crate::udp::UdpTransport;

#[derive(Parser, Debug)]
#[command(name = "tisctl")]
#[command(about = "Talk to TIS building-automation devices over UDP", long_about = None)]
pub struct Cli {
    /// YAML config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub network: NetworkArgs,

    /// Serve Prometheus metrics on this address.
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Log filter, overriding the config file (RUST_LOG still wins).
    #[arg(long, global = true)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Socket and identity overrides.
#[derive(Args, Debug, Default)]
pub struct NetworkArgs {
    /// Local address to bind.
    #[arg(long, global = true)]
    pub bind: Option<SocketAddr>,

    /// Broadcast destination.
    #[arg(long, global = true)]
    pub broadcast: Option<SocketAddr>,

    /// Unicast gateway for addressed frames.
    #[arg(long, global = true)]
    pub gateway: Option<SocketAddr>,

    /// Send frames without the SMARTCLOUD envelope.
    #[arg(long, global = true)]
    pub no_envelope: bool,

    /// Our bus address, e.g. `1.254`.
    #[arg(long, global = true)]
    pub address: Option<Address>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print every frame on the network until Ctrl-C.
    Listen {
        /// Print domain events as JSON only.
        #[arg(long)]
        json: bool,
    },
    /// Broadcast discovery and print the devices that answer.
    Discover {
        #[arg(long)]
        attempts: Option<u32>,
        /// Seconds between broadcasts.
        #[arg(long)]
        interval: Option<f64>,
        /// Seconds to listen after the last broadcast.
        #[arg(long)]
        window: Option<f64>,
        /// Ask each device for its name.
        #[arg(long)]
        names: bool,
    },
    /// Probe a range of opcodes against one device.
    Scan {
        /// Target address, e.g. `1.10`.
        target: Address,
        #[arg(long, value_parser = parse_opcode)]
        start: Option<u16>,
        #[arg(long, value_parser = parse_opcode)]
        end: Option<u16>,
        /// Milliseconds after each probe.
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Probes per batch.
        #[arg(long)]
        batch: Option<u32>,
        /// Extra milliseconds after each batch.
        #[arg(long)]
        pause_ms: Option<u64>,
    },
    /// Send a raw frame.
    Send {
        /// Target address, e.g. `1.10` or `255.255`.
        target: Address,
        /// Opcode, e.g. `0x0033`.
        #[arg(value_parser = parse_opcode)]
        opcode: u16,
        /// Payload as hex.
        #[arg(default_value = "")]
        payload: String,
        /// Wait for the paired reply.
        #[arg(long)]
        wait: bool,
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
        #[arg(long, default_value_t = 3)]
        attempts: u32,
    },
    /// Set a channel level and wait for the device's feedback.
    Light {
        target: Address,
        channel: u8,
        /// 0-100.
        level: u8,
        /// Ramp time in seconds.
        #[arg(long, default_value_t = 0)]
        ramp: u16,
    },
    /// Decode hex captures offline.
    Decode {
        /// Hex strings; concatenated and split into frames.
        #[arg(required = true)]
        hex: Vec<String>,
    },
}

/// Parse `0x0031`, `0031` or `49`.
pub fn parse_opcode(text: &str) -> std::result::Result<u16, String> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)
    } else if text.len() == 4 && text.chars().all(|c| c.is_ascii_hexdigit()) {
        u16::from_str_radix(text, 16)
    } else {
        text.parse()
    };
    parsed.map_err(|e| format!("invalid opcode {:?}: {}", text, e))
}

/// Parse a hex string, ignoring whitespace and `:` separators.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&cleaned).map_err(|e| RunnerError::InvalidArgument(format!("{:?}: {}", text, e)))
}

impl Cli {
    /// Apply command-line overrides to a loaded config.
    pub fn apply_overrides(&self, config: &mut RunnerConfig) {
        let net = &self.network;
        if let Some(bind) = net.bind {
            config.bind = bind;
        }
        if let Some(broadcast) = net.broadcast {
            config.broadcast = broadcast;
        }
        if net.gateway.is_some() {
            config.gateway = net.gateway;
        }
        if net.no_envelope {
            config.envelope = false;
        }
        if let Some(address) = net.address {
            config.engine.identity.address = address;
        }
        if let Some(log) = &self.log {
            config.log_filter = log.clone();
        }

        match &self.command {
            Command::Discover {
                attempts,
                interval,
                window,
                names,
            } => {
                let discovery = &mut config.discovery;
                if let Some(attempts) = attempts {
                    discovery.attempts = *attempts;
                }
                if let Some(secs) = interval.and_then(|s| Duration::try_from_secs_f64(s).ok()) {
                    discovery.interval = secs;
                }
                if let Some(secs) = window.and_then(|s| Duration::try_from_secs_f64(s).ok()) {
                    discovery.final_window = secs;
                }
                discovery.query_names |= *names;
            }
            Command::Scan {
                start,
                end,
                delay_ms,
                batch,
                pause_ms,
                ..
            } => {
                let enumeration = &mut config.enumeration;
                if let Some(start) = start {
                    enumeration.start = *start;
                }
                if let Some(end) = end {
                    enumeration.end = *end;
                }
                if let Some(ms) = delay_ms {
                    enumeration.delay = Duration::from_millis(*ms);
                }
                if let Some(batch) = batch {
                    enumeration.batch_size = *batch;
                }
                if let Some(ms) = pause_ms {
                    enumeration.batch_pause = Duration::from_millis(*ms);
                }
            }
            _ => {}
        }
    }

    /// Run the selected command.
    pub async fn run(self, config: RunnerConfig, stop: StopSignal) -> Result<()> {
        if let Command::Decode { hex } = &self.command {
            return decode(hex);
        }

        let transport = UdpTransport::bind(&config).await?;
        let endpoint = Arc::new(Endpoint::new(transport, config.engine.clone()));
        let receiver = endpoint.clone();
        let loop_stop = stop.clone();
        let receive_loop = tokio::spawn(async move { receiver.run_receive_loop(loop_stop).await });

        let result = match self.command {
            Command::Listen { json } => listen(&endpoint, json, stop).await,
            Command::Discover { .. } => discover(endpoint.clone(), &config, stop).await,
            Command::Scan { target, .. } => scan(&endpoint, target, &config, stop).await,
            Command::Send {
                target,
                opcode,
                payload,
                wait,
                timeout_ms,
                attempts,
            } => {
                let message = endpoint.identity().raw(target, opcode, parse_hex(&payload)?);
                if wait {
                    let options = CorrelationOptions {
                        timeout: Duration::from_millis(timeout_ms),
                        attempts,
                    };
                    let reply = endpoint.send_with_correlation(&message, options).await?;
                    println!(
                        "{} ({} ms, {} attempt(s))",
                        describe_frame(&reply.frame),
                        reply.latency.as_millis(),
                        reply.attempts
                    );
                } else {
                    endpoint.send(&message).await?;
                }
                Ok(())
            }
            Command::Light {
                target,
                channel,
                level,
                ramp,
            } => {
                let message = endpoint.identity().channel_control(target, channel, level, ramp);
                let mut frames = endpoint.subscribe_frames();
                let reply = endpoint.request(&message).await?;
                let published = tokio::time::timeout(
                    config.engine.receive_timeout,
                    inbound_for(&mut frames, &reply.frame),
                )
                .await;
                match published.ok().flatten() {
                    Some(inbound) => {
                        println!("{}", describe_outcome(&inbound.frame, &inbound.outcome))
                    }
                    None => println!("{}", describe_frame(&reply.frame)),
                }
                Ok(())
            }
            Command::Decode { .. } => Ok(()),
        };

        receive_loop.abort();
        result
    }
}

async fn listen<T: tis_engine::Transport>(
    endpoint: &Endpoint<T>,
    json: bool,
    mut stop: StopSignal,
) -> Result<()> {
    let mut events = endpoint.subscribe_events();
    let mut frames = endpoint.subscribe_frames();
    info!("listening, Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = stop.stopped() => return Ok(()),
            frame = frames.recv(), if !json => match frame {
                Ok(inbound) => println!("{}", describe_outcome(&inbound.frame, &inbound.outcome)),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("dropped {} frame(s)", n),
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            event = events.recv() => match event {
                Ok(EngineEvent::Domain { source, opcode, event, .. }) if json => {
                    let line = serde_json::json!({
                        "source": source.to_string(),
                        "opcode": format!("0x{:04X}", opcode),
                        "event": event,
                    });
                    println!("{}", line);
                }
                Ok(event) if !json => {
                    if let Some(line) = describe_event(&event) {
                        println!("{}", line);
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("dropped {} event(s)", n),
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

/// The published copy of `frame`, carrying its dispatch outcome.
async fn inbound_for(
    frames: &mut broadcast::Receiver<InboundFrame>,
    frame: &Frame,
) -> Option<InboundFrame> {
    loop {
        match frames.recv().await {
            Ok(inbound) if inbound.frame == *frame => return Some(inbound),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

async fn discover<T: tis_engine::Transport>(
    endpoint: Arc<Endpoint<T>>,
    config: &RunnerConfig,
    stop: StopSignal,
) -> Result<()> {
    let mut handle = begin_discovery(endpoint, config.discovery.clone(), stop);
    while let Some(device) = handle.next_device().await {
        eprintln!("found {}", device.label);
    }
    let report = handle.finish().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn scan<T: tis_engine::Transport>(
    endpoint: &Endpoint<T>,
    target: Address,
    config: &RunnerConfig,
    stop: StopSignal,
) -> Result<()> {
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<tis_engine::EnumerationHit>();
    let printer = tokio::spawn(async move {
        while let Some(hit) = progress_rx.recv().await {
            eprintln!(
                "0x{:04X} -> 0x{:04X} from {}",
                hit.probe, hit.reply_opcode, hit.responder
            );
        }
    });
    let report =
        enumerate_opcodes(endpoint, target, &config.enumeration, stop, Some(progress_tx)).await?;
    let _ = printer.await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Decode concatenated hex captures and print one line per frame.
fn decode(captures: &[String]) -> Result<()> {
    let dispatcher = standard_dispatcher();
    let mut stream = FrameStream::new();
    for capture in captures {
        stream.push(&parse_hex(capture)?);
    }
    let mut frames = 0;
    for result in stream.drain() {
        match result {
            Ok(frame) => {
                frames += 1;
                println!("{}", describe_outcome(&frame, &dispatcher.dispatch(&frame)));
            }
            Err(error) => {
                let raw = error.frame().map(|f| hex::encode(f.to_bytes())).unwrap_or_default();
                println!("{}", describe_rejection(&error, &raw));
            }
        }
    }
    if frames == 0 && stream.buffered_len() > 0 {
        return Err(RunnerError::InvalidArgument(format!(
            "no complete frame in {} byte(s)",
            stream.buffered_len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_opcode() {
        assert_eq!(parse_opcode("0x0031"), Ok(0x0031));
        assert_eq!(parse_opcode("F003"), Ok(0xF003));
        assert_eq!(parse_opcode("49"), Ok(49));
        assert!(parse_opcode("0x1FFFF").is_err());
        assert!(parse_opcode("lamp").is_err());
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("01 64").unwrap(), vec![0x01, 0x64]);
        assert_eq!(parse_hex("aa:aa").unwrap(), vec![0xAA, 0xAA]);
        assert_eq!(parse_hex("").unwrap(), Vec::<u8>::new());
        assert!(parse_hex("0g").is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "tisctl",
            "--no-envelope",
            "--address",
            "2.100",
            "discover",
            "--attempts",
            "3",
            "--interval",
            "0.5",
            "--names",
        ]);
        let mut config = RunnerConfig::default();
        cli.apply_overrides(&mut config);
        assert!(!config.envelope);
        assert_eq!(config.engine.identity.address, Address::new(2, 100));
        assert_eq!(config.discovery.attempts, 3);
        assert_eq!(config.discovery.interval, Duration::from_millis(500));
        assert!(config.discovery.query_names);
    }

    #[test]
    fn test_scan_args() {
        let cli = Cli::parse_from([
            "tisctl", "scan", "1.10", "--start", "0x0030", "--end", "0x0040", "--delay-ms", "20",
        ]);
        let mut config = RunnerConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.enumeration.start, 0x0030);
        assert_eq!(config.enumeration.end, 0x0040);
        assert_eq!(config.enumeration.delay, Duration::from_millis(20));
        assert_eq!(config.enumeration.probe_count(), 17);
    }

    #[test]
    fn test_decode_captures() {
        assert!(decode(&["aaaa0b01fefffef003ffff212b".to_string()]).is_ok());
        assert!(decode(&["aaaa0f010a".to_string()]).is_err());
        assert!(decode(&["zz".to_string()]).is_err());
    }
}
