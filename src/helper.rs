//! Helper constants for Sockscone
//!
//! Defaults shared by the configuration layer and the transports.

/// Default upstream connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default time a client gets to finish its greeting and request, in seconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Default UDP session idle timeout in seconds
pub const DEFAULT_UDP_IDLE_TIMEOUT_SECS: u64 = 60;

/// Default TCP keepalive period for client connections in seconds
pub const DEFAULT_KEEPALIVE_SECS: u64 = 15;

/// Largest accepted value for any timeout or keepalive period, in seconds
pub const MAX_TIMEOUT_SECS: u64 = 86_400;
