//! Transport abstraction.
//!
//! The engine never opens sockets. A [`Transport`] supplies "send bytes" and
//! "bytes arrived" primitives; the UDP adapter lives in the runner and
//! [`MemoryTransport`] backs the tests.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use tis_packet::{Address, Message};

/// Where an outgoing frame should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Every listener on the segment.
    Broadcast,
    /// A specific device. Transports without per-device routing may still
    /// broadcast; the target address inside the frame does the addressing.
    Device(Address),
}

impl Destination {
    /// Destination implied by a message's target address.
    pub fn for_message(message: &Message) -> Self {
        if message.is_broadcast() {
            Destination::Broadcast
        } else {
            Destination::Device(message.target)
        }
    }
}

/// Bytes received from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Raw bytes as received, envelope included.
    pub bytes: Vec<u8>,
    /// Sender socket address, if the transport knows it.
    pub origin: Option<SocketAddr>,
}

/// Byte-level transport used by the engine.
///
/// `send` and `recv` take `&self` so one task can block in `recv` while
/// others send.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one encoded frame.
    async fn send(&self, bytes: &[u8], destination: Destination) -> io::Result<()>;

    /// Wait for the next datagram.
    ///
    /// Must be cancel-safe: the receive loop drops this future on timeout.
    /// Returns `ErrorKind::UnexpectedEof` once no more data can arrive.
    async fn recv(&self) -> io::Result<Datagram>;
}

// ============================================================================
// In-memory transport
// ============================================================================

/// A datagram captured by [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct SentDatagram {
    /// Encoded frame.
    pub bytes: Vec<u8>,
    /// Requested destination.
    pub destination: Destination,
    /// When the engine handed it to the transport.
    pub at: Instant,
}

/// In-process transport: datagrams are injected and captured through the
/// paired [`MemoryPeer`].
pub struct MemoryTransport {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
    outbound: mpsc::UnboundedSender<SentDatagram>,
    log: Arc<Mutex<Vec<SentDatagram>>>,
}

/// The far side of a [`MemoryTransport`].
pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<Datagram>,
    outbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<SentDatagram>>,
    log: Arc<Mutex<Vec<SentDatagram>>>,
}

impl MemoryTransport {
    /// Create a connected transport and peer.
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport = MemoryTransport {
            inbound: tokio::sync::Mutex::new(in_rx),
            outbound: out_tx,
            log: log.clone(),
        };
        let peer = MemoryPeer {
            inbound: in_tx,
            outbound: tokio::sync::Mutex::new(out_rx),
            log,
        };
        (transport, peer)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, bytes: &[u8], destination: Destination) -> io::Result<()> {
        let sent = SentDatagram {
            bytes: bytes.to_vec(),
            destination,
            at: Instant::now(),
        };
        self.log.lock().push(sent.clone());
        // The peer may have stopped watching; the log still records the send.
        let _ = self.outbound.send(sent);
        Ok(())
    }

    async fn recv(&self) -> io::Result<Datagram> {
        let mut inbound = self.inbound.lock().await;
        inbound
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "memory peer dropped"))
    }
}

impl MemoryPeer {
    /// Deliver raw bytes to the engine.
    pub fn inject(&self, bytes: Vec<u8>, origin: Option<SocketAddr>) {
        let _ = self.inbound.send(Datagram { bytes, origin });
    }

    /// Encode and deliver a message to the engine.
    pub fn inject_message(&self, message: &Message) {
        if let Ok(bytes) = message.encode() {
            self.inject(bytes, None);
        }
    }

    /// Wait for the engine's next send.
    pub async fn next_sent(&self) -> Option<SentDatagram> {
        self.outbound.lock().await.recv().await
    }

    /// Every datagram sent so far.
    pub fn sent(&self) -> Vec<SentDatagram> {
        self.log.lock().clone()
    }
}
