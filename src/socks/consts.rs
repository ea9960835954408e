//! SOCKS5 protocol constants
//!
//! Wire values used by the handshake, request parser and reply builder.

/// SOCKS5 protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

// Authentication methods
/// No authentication required
pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;

// Commands
/// TCP CONNECT command
pub const SOCKS5_CMD_TCP_CONNECT: u8 = 0x01;
/// TCP BIND command (answered with "command not supported")
pub const SOCKS5_CMD_TCP_BIND: u8 = 0x02;
/// UDP ASSOCIATE command
pub const SOCKS5_CMD_UDP_ASSOCIATE: u8 = 0x03;

// Address types
/// IPv4 address
pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
/// Domain name
pub const SOCKS5_ADDR_TYPE_DOMAIN: u8 = 0x03;
/// IPv6 address
pub const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

// Reserved byte
/// Reserved byte value (always 0x00)
pub const SOCKS5_RESERVED: u8 = 0x00;

/// Fixed length of a SOCKS5 reply carrying an IPv4 bound address
pub const SOCKS5_REPLY_LEN: usize = 10;

/// Port reported in the optimistic CONNECT reply (0x0843 = 2115)
pub const OPTIMISTIC_BIND_PORT: u16 = 0x0843;

/// RSV(2) + FRAG(1) prefix of every SOCKS5 UDP datagram
pub const SOCKS5_UDP_PREFIX_LEN: usize = 3;

/// Maximum domain name length
pub const MAX_DOMAIN_LEN: usize = 255;
