//! Address codec
//!
//! Decodes and encodes the address-type tagged address fields shared by
//! SOCKS5 requests, SOCKS5 UDP datagrams and the tunnel's own framing.
//!
//! ```text
//! +------+----------+----------+
//! | ATYP | DST.ADDR | DST.PORT |
//! +------+----------+----------+
//! |  1   | Variable |    2     |
//! +------+----------+----------+
//! ```

use super::consts::*;
use super::types::TargetAddr;
use crate::error::Socks5Error;
use bytes::Buf;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

/// A decoded address field and the number of bytes it occupied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAddr {
    /// Address type byte as it appeared on the wire
    pub addr_type: u8,
    /// Decoded host and port
    pub target: TargetAddr,
    /// Wire size of the field, ATYP and port included
    pub consumed: usize,
}

/// Wire size of an address field given its type byte and, for domains,
/// the length byte that follows it.
///
/// Returns `None` for unknown types or when `buf` is too short to know.
pub fn address_len(buf: &[u8]) -> Option<usize> {
    match *buf.first()? {
        SOCKS5_ADDR_TYPE_IPV4 => Some(1 + 4 + 2),
        SOCKS5_ADDR_TYPE_IPV6 => Some(1 + 16 + 2),
        SOCKS5_ADDR_TYPE_DOMAIN => buf.get(1).map(|len| 1 + 1 + *len as usize + 2),
        _ => None,
    }
}

/// Decode the address field at the start of `buf`
///
/// Fails with `UnsupportedAddressType` for unknown type bytes and with
/// `MalformedAddress` when the declared length runs past the buffer.
pub fn decode_socks_address(buf: &[u8]) -> Result<DecodedAddr, Socks5Error> {
    let addr_type = *buf
        .first()
        .ok_or_else(|| Socks5Error::MalformedAddress("empty address".to_string()))?;

    let consumed = match address_len(buf) {
        Some(len) => len,
        None if matches!(addr_type, SOCKS5_ADDR_TYPE_DOMAIN) => {
            return Err(Socks5Error::MalformedAddress(
                "missing domain length".to_string(),
            ))
        }
        None => return Err(Socks5Error::UnsupportedAddressType(addr_type)),
    };

    if buf.len() < consumed {
        return Err(Socks5Error::MalformedAddress(format!(
            "need {} bytes, have {}",
            consumed,
            buf.len()
        )));
    }

    let mut field = &buf[1..consumed];
    let target = match addr_type {
        SOCKS5_ADDR_TYPE_IPV4 => {
            let ip = Ipv4Addr::from(field.get_u32());
            TargetAddr::ipv4(ip, field.get_u16())
        }
        SOCKS5_ADDR_TYPE_IPV6 => {
            let ip = Ipv6Addr::from(field.get_u128());
            TargetAddr::ipv6(ip, field.get_u16())
        }
        _ => {
            let len = field.get_u8() as usize;
            if len == 0 {
                return Err(Socks5Error::MalformedAddress("empty domain".to_string()));
            }
            let domain = std::str::from_utf8(&field[..len])
                .map_err(|_| Socks5Error::MalformedAddress("domain is not UTF-8".to_string()))?
                .to_string();
            field.advance(len);
            TargetAddr::Domain(domain, field.get_u16())
        }
    };

    Ok(DecodedAddr {
        addr_type,
        target,
        consumed,
    })
}

/// Build the fixed 10-byte SOCKS5 reply
///
/// Only IPv4 bound addresses fit the reply; anything else is reported as
/// `0.0.0.0:0`.
pub fn encode_socks_reply(status: u8, bound: Option<SocketAddr>) -> [u8; SOCKS5_REPLY_LEN] {
    let mut reply = [0u8; SOCKS5_REPLY_LEN];
    reply[0] = SOCKS5_VERSION;
    reply[1] = status;
    reply[2] = SOCKS5_RESERVED;
    reply[3] = SOCKS5_ADDR_TYPE_IPV4;
    if let Some(SocketAddr::V4(addr)) = bound {
        reply[4..8].copy_from_slice(&addr.ip().octets());
        reply[8..10].copy_from_slice(&addr.port().to_be_bytes());
    }
    reply
}

/// Split a tunnel UDP frame into its address and the payload offset
pub fn decode_tunnel_udp_header(buf: &[u8]) -> Result<(TargetAddr, usize), Socks5Error> {
    let decoded = decode_socks_address(buf)?;
    Ok((decoded.target, decoded.consumed))
}

/// Build a tunnel UDP frame: address header followed by payload
pub fn encode_tunnel_udp_frame(target: &TargetAddr, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(target.serialized_len() + payload.len());
    target.write_to(&mut frame);
    frame.extend_from_slice(payload);
    frame
}
