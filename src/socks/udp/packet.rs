//! SOCKS5 UDP datagram framing
//!
//! ```text
//! +----+------+------+----------+----------+----------+
//! |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
//! +----+------+------+----------+----------+----------+
//! | 2  |  1   |  1   | Variable |    2     | Variable |
//! +----+------+------+----------+----------+----------+
//! ```

use crate::error::Socks5Error;
use crate::socks::codec::decode_socks_address;
use crate::socks::consts::SOCKS5_UDP_PREFIX_LEN;
use crate::socks::types::TargetAddr;

/// A datagram received from the SOCKS5 client, borrowed from the read buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDatagram<'a> {
    /// RSV, FRAG and the address field exactly as received
    pub header: &'a [u8],
    /// Destination named in the header
    pub target: TargetAddr,
    /// Application payload
    pub payload: &'a [u8],
}

/// Split a client datagram into header, destination and payload
///
/// Fragments are not reassembled: any non-zero FRAG is an error, as is a
/// non-zero RSV.
pub fn parse_client_datagram(buf: &[u8]) -> Result<ClientDatagram<'_>, Socks5Error> {
    if buf.len() < SOCKS5_UDP_PREFIX_LEN + 1 {
        return Err(Socks5Error::MalformedAddress(format!(
            "datagram too short: {} bytes",
            buf.len()
        )));
    }

    let rsv = u16::from_be_bytes([buf[0], buf[1]]);
    if rsv != 0 {
        return Err(Socks5Error::NonZeroReserved(rsv));
    }
    if buf[2] != 0 {
        return Err(Socks5Error::FragmentedDatagram(buf[2]));
    }

    let decoded = decode_socks_address(&buf[SOCKS5_UDP_PREFIX_LEN..])?;
    let header_len = SOCKS5_UDP_PREFIX_LEN + decoded.consumed;

    Ok(ClientDatagram {
        header: &buf[..header_len],
        target: decoded.target,
        payload: &buf[header_len..],
    })
}

/// Build a datagram for the client from a stored header and a payload
pub fn encode_client_datagram(header: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(header.len() + payload.len());
    datagram.extend_from_slice(header);
    datagram.extend_from_slice(payload);
    datagram
}
