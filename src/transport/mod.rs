//! Transport module for Sockscone
//!
//! Secure channels to upstream servers. A channel is bound to one server
//! and knows how to open a tunneled stream for a target address and how
//! to frame datagrams for that server.

mod addr;
#[cfg(feature = "aead")]
mod aead;
mod datagram;
mod plain;
mod tcp;

pub use addr::AddrMaybeCached;
#[cfg(feature = "aead")]
pub use aead::{AeadChannel, AeadStream, MasterKey};
pub use datagram::{SecureDatagram, MAX_DATAGRAM_SIZE};
pub use plain::PlainChannel;
pub use tcp::TcpDialer;

use crate::error::RelayError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Socket options for configuring connections
#[derive(Debug, Clone)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(20),
            keepalive_interval: Some(8),
        }
    }
}

impl SocketOpts {
    /// Options for accepted client connections
    ///
    /// UDP ASSOCIATE keeps its TCP control connection idle for the whole
    /// session, so keepalive is what notices a vanished client.
    pub fn for_client(keepalive_secs: u64) -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(keepalive_secs),
            keepalive_interval: Some(keepalive_secs),
        }
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// Cipher methods understood by the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherKind {
    /// No encryption, tunnel framing only
    Plain,
    /// AEAD AES-128-GCM
    Aes128Gcm,
    /// AEAD AES-256-GCM
    Aes256Gcm,
    /// AEAD ChaCha20-IETF-Poly1305
    Chacha20IetfPoly1305,
}

impl CipherKind {
    /// Canonical method name
    pub fn name(self) -> &'static str {
        match self {
            CipherKind::Plain => "plain",
            CipherKind::Aes128Gcm => "aes-128-gcm",
            CipherKind::Aes256Gcm => "aes-256-gcm",
            CipherKind::Chacha20IetfPoly1305 => "chacha20-ietf-poly1305",
        }
    }

    /// Key length in bytes; the salt has the same length
    pub fn key_len(self) -> usize {
        match self {
            CipherKind::Plain => 0,
            CipherKind::Aes128Gcm => 16,
            CipherKind::Aes256Gcm | CipherKind::Chacha20IetfPoly1305 => 32,
        }
    }

    /// Whether this build can construct a channel for the method
    pub fn is_available(self) -> bool {
        match self {
            CipherKind::Plain => true,
            _ => cfg!(feature = "aead"),
        }
    }
}

impl FromStr for CipherKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "none" => Ok(CipherKind::Plain),
            "aes-128-gcm" => Ok(CipherKind::Aes128Gcm),
            "aes-256-gcm" => Ok(CipherKind::Aes256Gcm),
            "chacha20-ietf-poly1305" | "chacha20-poly1305" => {
                Ok(CipherKind::Chacha20IetfPoly1305)
            }
            other => Err(RelayError::Config(format!(
                "unsupported cipher method: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encrypted transport to one upstream server
#[async_trait]
pub trait SecureChannel: Debug + Send + Sync + 'static {
    /// Upstream server this channel talks to
    fn server(&self) -> &AddrMaybeCached;

    /// Cipher method in use
    fn kind(&self) -> CipherKind;

    /// Open a stream that the server will connect to `raw_addr`
    ///
    /// `raw_addr` is the SOCKS5 address field (ATYP, address, port). The
    /// header reaches the server before this returns.
    async fn open_stream(&self, raw_addr: &[u8]) -> Result<Box<dyn StreamDyn>, RelayError>;

    /// Seal a tunnel frame (address header followed by payload) for sending
    fn encode_packet(&self, frame: &[u8]) -> Result<Vec<u8>, RelayError>;

    /// Open a datagram received from the server back into a tunnel frame
    fn decode_packet(&self, packet: &[u8]) -> Result<Vec<u8>, RelayError>;
}

/// Dynamic stream trait for boxed streams
pub trait StreamDyn: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug> StreamDyn for T {}

/// Builds channels, deriving each master key once per (method, password)
#[derive(Debug)]
pub struct ChannelFactory {
    dialer: TcpDialer,
    #[cfg(feature = "aead")]
    keys: HashMap<(CipherKind, String), Arc<MasterKey>>,
    #[cfg(not(feature = "aead"))]
    keys: HashMap<(CipherKind, String), ()>,
}

impl ChannelFactory {
    /// Create a factory whose channels dial with `dialer`
    pub fn new(dialer: TcpDialer) -> Self {
        ChannelFactory {
            dialer,
            keys: HashMap::new(),
        }
    }

    /// Number of distinct master keys derived so far
    pub fn cached_keys(&self) -> usize {
        self.keys.len()
    }

    /// Create a channel to `server` for the given method and password
    pub fn create(
        &mut self,
        server: AddrMaybeCached,
        kind: CipherKind,
        password: &str,
    ) -> Result<Arc<dyn SecureChannel>, RelayError> {
        match kind {
            CipherKind::Plain => Ok(Arc::new(PlainChannel::new(server, self.dialer.clone()))),
            #[cfg(feature = "aead")]
            _ => {
                let key = self
                    .keys
                    .entry((kind, password.to_string()))
                    .or_insert_with(|| Arc::new(MasterKey::derive(kind, password)))
                    .clone();
                Ok(Arc::new(AeadChannel::new(
                    server,
                    kind,
                    key,
                    self.dialer.clone(),
                )?))
            }
            #[cfg(not(feature = "aead"))]
            other => {
                let _ = password;
                Err(RelayError::Config(format!(
                    "cipher method {} requires the aead feature",
                    other
                )))
            }
        }
    }
}
