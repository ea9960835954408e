//! Error types for Sockscone
//!
//! This module defines all custom error types used throughout the relay.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cipher or framing error on the secure channel
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Every configured upstream failed for this attempt
    #[error("No upstream server available")]
    UpstreamUnavailable,

    /// A tunnel reply arrived for a target with no NAT session
    #[error("No NAT session for {0}")]
    SessionNotFound(SocketAddr),

    /// SOCKS5 protocol error
    #[error("SOCKS5 error: {0}")]
    Socks5(#[from] Socks5Error),

    /// Malformed or unsupported HTTP proxy request
    #[error("HTTP error: {0}")]
    Http(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),
}

/// SOCKS5 handshake and request errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Socks5Error {
    /// Version byte was not 5
    #[error("Unsupported SOCKS version: {0}")]
    ProtocolVersionMismatch(u8),

    /// Client offered no method we accept
    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    /// Command byte other than CONNECT or UDP ASSOCIATE
    #[error("Command not supported: {0}")]
    UnsupportedCommand(u8),

    /// Address type byte not IPv4, domain or IPv6
    #[error("Address type not supported: {0}")]
    UnsupportedAddressType(u8),

    /// Short read or read timeout before the message was complete
    #[error("Incomplete request")]
    IncompleteRequest,

    /// Address field could not be decoded
    #[error("Malformed address: {0}")]
    MalformedAddress(String),

    /// UDP datagram with a non-zero RSV field
    #[error("Reserved field not zero: {0:#06x}")]
    NonZeroReserved(u16),

    /// UDP datagram with a non-zero FRAG field
    #[error("Fragmented datagram: {0}")]
    FragmentedDatagram(u8),
}

impl From<io::Error> for Socks5Error {
    fn from(_: io::Error) -> Self {
        Socks5Error::IncompleteRequest
    }
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Socks5ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl From<Socks5ReplyCode> for u8 {
    fn from(code: Socks5ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for Socks5ReplyCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Socks5ReplyCode::Succeeded),
            0x01 => Ok(Socks5ReplyCode::GeneralFailure),
            0x02 => Ok(Socks5ReplyCode::ConnectionNotAllowed),
            0x03 => Ok(Socks5ReplyCode::NetworkUnreachable),
            0x04 => Ok(Socks5ReplyCode::HostUnreachable),
            0x05 => Ok(Socks5ReplyCode::ConnectionRefused),
            0x06 => Ok(Socks5ReplyCode::TtlExpired),
            0x07 => Ok(Socks5ReplyCode::CommandNotSupported),
            0x08 => Ok(Socks5ReplyCode::AddressTypeNotSupported),
            other => Err(other),
        }
    }
}

impl From<&io::Error> for Socks5ReplyCode {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Socks5ReplyCode::ConnectionRefused,
            io::ErrorKind::TimedOut => Socks5ReplyCode::HostUnreachable,
            io::ErrorKind::AddrNotAvailable => Socks5ReplyCode::HostUnreachable,
            io::ErrorKind::PermissionDenied => Socks5ReplyCode::ConnectionNotAllowed,
            _ => Socks5ReplyCode::GeneralFailure,
        }
    }
}

impl From<&Socks5Error> for Socks5ReplyCode {
    fn from(err: &Socks5Error) -> Self {
        match err {
            Socks5Error::UnsupportedCommand(_) => Socks5ReplyCode::CommandNotSupported,
            Socks5Error::UnsupportedAddressType(_) => Socks5ReplyCode::AddressTypeNotSupported,
            _ => Socks5ReplyCode::GeneralFailure,
        }
    }
}

/// Whether an IO error is the expected result of closing our own socket.
///
/// Shutdown of a relay unblocks pending reads with one of these kinds; they
/// are logged at debug level rather than treated as failures.
pub fn is_closed_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::UnexpectedEof
    )
}
