//! Datagram mode of a secure channel

use super::SecureChannel;
use crate::error::RelayError;
use crate::socks::codec::{decode_tunnel_udp_header, encode_tunnel_udp_frame};
use crate::socks::TargetAddr;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::trace;

/// Largest datagram read from the upstream server
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// A UDP socket that exchanges sealed tunnel frames with one server
#[derive(Debug)]
pub struct SecureDatagram {
    socket: UdpSocket,
    server: SocketAddr,
    channel: Arc<dyn SecureChannel>,
}

impl SecureDatagram {
    /// Bind a socket on `bind_ip` and aim it at the channel's server
    pub async fn open(channel: Arc<dyn SecureChannel>, bind_ip: IpAddr) -> Result<Self, RelayError> {
        let server = channel.server().resolve().await?;
        let bind_ip = match (bind_ip, server) {
            // An IPv4 wildcard cannot reach an IPv6 server
            (IpAddr::V4(v4), SocketAddr::V6(_)) if v4.is_unspecified() => {
                IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
            }
            (ip, _) => ip,
        };
        let socket = UdpSocket::bind(SocketAddr::new(bind_ip, 0)).await?;
        Ok(SecureDatagram {
            socket,
            server,
            channel,
        })
    }

    /// Local address of the upstream-facing socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Resolved server address datagrams are sent to
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Send `payload` for `target` through the tunnel
    pub async fn send_frame(&self, target: &TargetAddr, payload: &[u8]) -> Result<usize, RelayError> {
        let packet = self
            .channel
            .encode_packet(&encode_tunnel_udp_frame(target, payload))?;
        Ok(self.socket.send_to(&packet, self.server).await?)
    }

    /// Wait for the next datagram from the server
    ///
    /// Datagrams from other sources are discarded. IO errors end the call
    /// with `RelayError::Io`; undecodable datagrams with `Crypto` or
    /// `Socks5` so the caller can count and skip them.
    pub async fn recv_frame(&self, buf: &mut [u8]) -> Result<(TargetAddr, Vec<u8>), RelayError> {
        loop {
            let (n, from) = self.socket.recv_from(buf).await?;
            if from != self.server {
                trace!("Ignoring datagram from {} on upstream socket", from);
                continue;
            }
            let mut frame = self.channel.decode_packet(&buf[..n])?;
            let (source, offset) = decode_tunnel_udp_header(&frame)?;
            let payload = frame.split_off(offset);
            return Ok((source, payload));
        }
    }
}
