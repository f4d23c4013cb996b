//! UDP transport.
//!
//! TIS gateways and IP-native devices listen on UDP port 6000. Frames are
//! broadcast by default; addressed frames go to the configured gateway when
//! there is one. Some gateways only accept frames behind the `SMARTCLOUD`
//! envelope, which carries the sender's IPv4 address.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use tis_engine::{Datagram, Destination, Transport};
use tis_packet::wrap_envelope;

use crate::config::RunnerConfig;

/// Largest datagram accepted.
const RECV_BUFFER_LEN: usize = 4096;

/// [`Transport`] over a UDP socket.
pub struct UdpTransport {
    socket: UdpSocket,
    broadcast: SocketAddr,
    gateway: Option<SocketAddr>,
    envelope: Option<Ipv4Addr>,
}

impl UdpTransport {
    /// Bind according to `config`.
    pub async fn bind(config: &RunnerConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(config.bind).await?;
        socket.set_broadcast(true)?;

        let envelope = if config.envelope {
            let ip = match config.envelope_ip {
                Some(ip) => ip,
                None => local_ipv4(config.gateway.unwrap_or(config.broadcast)).await?,
            };
            Some(ip)
        } else {
            None
        };

        info!(
            "udp bound to {} (broadcast {}, gateway {:?}, envelope {:?})",
            socket.local_addr()?,
            config.broadcast,
            config.gateway,
            envelope
        );
        Ok(UdpTransport {
            socket,
            broadcast: config.broadcast,
            gateway: config.gateway,
            envelope,
        })
    }

    /// Local address of the socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn destination_addr(&self, destination: Destination) -> SocketAddr {
        match destination {
            Destination::Broadcast => self.broadcast,
            Destination::Device(_) => self.gateway.unwrap_or(self.broadcast),
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, bytes: &[u8], destination: Destination) -> io::Result<()> {
        let addr = self.destination_addr(destination);
        let written = match self.envelope {
            Some(ip) => self.socket.send_to(&wrap_envelope(ip, bytes), addr).await?,
            None => self.socket.send_to(bytes, addr).await?,
        };
        debug!("udp sent {} bytes to {}", written, addr);
        Ok(())
    }

    async fn recv(&self) -> io::Result<Datagram> {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        let (len, origin) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok(Datagram {
            bytes: buf,
            origin: Some(origin),
        })
    }
}

/// IPv4 address of the interface that routes to `target`.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
pub async fn local_ipv4(target: SocketAddr) -> io::Result<Ipv4Addr> {
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    probe.set_broadcast(true)?;
    probe.connect(target).await?;
    match probe.local_addr()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
        other => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no IPv4 route to {} (got {})", target, other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tis_packet::{decode_frame, envelope_origin, Address, Identity};

    fn loopback_config(broadcast: SocketAddr, envelope: bool) -> RunnerConfig {
        RunnerConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            broadcast,
            envelope,
            envelope_ip: None,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_with_envelope() {
        let receiver = UdpTransport::bind(&loopback_config("127.0.0.1:9".parse().unwrap(), false))
            .await
            .unwrap();
        let sender = UdpTransport::bind(&loopback_config(receiver.local_addr().unwrap(), true))
            .await
            .unwrap();

        let frame = Identity::default().discovery().encode().unwrap();
        sender.send(&frame, Destination::Broadcast).await.unwrap();

        let datagram = receiver.recv().await.unwrap();
        assert_eq!(envelope_origin(&datagram.bytes), Some(Ipv4Addr::LOCALHOST));
        assert_eq!(&datagram.bytes[14..], &frame[..]);
        assert_eq!(datagram.origin, Some(sender.local_addr().unwrap()));
        assert_eq!(decode_frame(&datagram.bytes).unwrap().opcode, 0xF003);
    }

    #[tokio::test]
    async fn test_addressed_frames_use_gateway() {
        let gateway = UdpTransport::bind(&loopback_config("127.0.0.1:9".parse().unwrap(), false))
            .await
            .unwrap();
        let mut config = loopback_config("127.0.0.1:9".parse().unwrap(), false);
        config.gateway = Some(gateway.local_addr().unwrap());
        let sender = UdpTransport::bind(&config).await.unwrap();

        let frame = Identity::default()
            .device_name_query(Address::new(1, 10))
            .encode()
            .unwrap();
        sender
            .send(&frame, Destination::Device(Address::new(1, 10)))
            .await
            .unwrap();

        let datagram = gateway.recv().await.unwrap();
        assert_eq!(datagram.bytes, frame);
    }
}
