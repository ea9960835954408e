//! SOCKS5 request parser
//!
//! Parses the request that follows method negotiation.

use crate::error::Socks5Error;
use crate::socks::codec::{address_len, decode_socks_address};
use crate::socks::consts::*;
use crate::socks::types::{SocksCommand, TargetAddr};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// A parsed SOCKS5 request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socks5Request {
    /// Requested command
    pub command: SocksCommand,
    /// Address field exactly as the client sent it (ATYP, address, port)
    pub raw_addr: Bytes,
    /// Decoded destination
    pub target: TargetAddr,
}

/// Read a SOCKS5 request from the stream
///
/// # SOCKS5 Request Format
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// The whole request is consumed before the command byte is checked, so an
/// unknown command still leaves the stream positioned after the request.
pub async fn read_request<S>(stream: &mut S) -> Result<Socks5Request, Socks5Error>
where
    S: AsyncRead + Unpin,
{
    // VER CMD RSV ATYP, plus the domain length byte when present
    let mut head = [0u8; 5];
    stream.read_exact(&mut head[..4]).await?;

    let version = head[0];
    let cmd_byte = head[1];
    let addr_type = head[3];

    if version != SOCKS5_VERSION {
        return Err(Socks5Error::ProtocolVersionMismatch(version));
    }

    let mut known = 1;
    if addr_type == SOCKS5_ADDR_TYPE_DOMAIN {
        stream.read_exact(&mut head[4..5]).await?;
        known = 2;
    }

    let addr_len =
        address_len(&head[3..3 + known]).ok_or(Socks5Error::UnsupportedAddressType(addr_type))?;

    let mut raw = vec![0u8; addr_len];
    raw[..known].copy_from_slice(&head[3..3 + known]);
    stream.read_exact(&mut raw[known..]).await?;

    let decoded = decode_socks_address(&raw)?;

    let command =
        SocksCommand::from_byte(cmd_byte).ok_or(Socks5Error::UnsupportedCommand(cmd_byte))?;

    debug!("Parsed SOCKS5 command: {} to {}", command, decoded.target);

    Ok(Socks5Request {
        command,
        raw_addr: Bytes::from(raw),
        target: decoded.target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::Ipv4Addr;

    fn create_request(command: u8, addr: &[u8]) -> Vec<u8> {
        let mut request = vec![SOCKS5_VERSION, command, SOCKS5_RESERVED];
        request.extend_from_slice(addr);
        request
    }

    #[tokio::test]
    async fn test_read_connect_ipv4() {
        let addr = [0x01, 93, 184, 216, 34, 0x00, 0x50];
        let mut cursor = Cursor::new(create_request(SOCKS5_CMD_TCP_CONNECT, &addr));

        let request = read_request(&mut cursor).await.unwrap();
        assert_eq!(request.command, SocksCommand::Connect);
        assert_eq!(
            request.target,
            TargetAddr::ipv4(Ipv4Addr::new(93, 184, 216, 34), 80)
        );
        assert_eq!(&request.raw_addr[..], &addr);
    }

    #[tokio::test]
    async fn test_read_connect_domain() {
        let mut addr = vec![SOCKS5_ADDR_TYPE_DOMAIN, 11];
        addr.extend_from_slice(b"example.com");
        addr.extend_from_slice(&443u16.to_be_bytes());
        let mut cursor = Cursor::new(create_request(SOCKS5_CMD_TCP_CONNECT, &addr));

        let request = read_request(&mut cursor).await.unwrap();
        assert_eq!(request.target, TargetAddr::domain("example.com", 443));
        assert_eq!(&request.raw_addr[..], &addr[..]);
    }

    #[tokio::test]
    async fn test_read_udp_associate_ipv6() {
        let mut addr = vec![SOCKS5_ADDR_TYPE_IPV6];
        addr.extend_from_slice(&[0u8; 16]);
        addr.extend_from_slice(&0u16.to_be_bytes());
        let mut cursor = Cursor::new(create_request(SOCKS5_CMD_UDP_ASSOCIATE, &addr));

        let request = read_request(&mut cursor).await.unwrap();
        assert_eq!(request.command, SocksCommand::UdpAssociate);
        assert_eq!(request.target.port(), 0);
    }

    #[tokio::test]
    async fn test_read_wrong_version() {
        let mut cursor = Cursor::new(vec![0x04, 0x01, 0x00, 0x01, 1, 2, 3, 4, 0, 80]);
        assert_eq!(
            read_request(&mut cursor).await,
            Err(Socks5Error::ProtocolVersionMismatch(4))
        );
    }

    #[tokio::test]
    async fn test_read_unknown_address_type() {
        let mut cursor = Cursor::new(create_request(SOCKS5_CMD_TCP_CONNECT, &[0x05, 0, 0]));
        assert_eq!(
            read_request(&mut cursor).await,
            Err(Socks5Error::UnsupportedAddressType(0x05))
        );
    }

    #[tokio::test]
    async fn test_read_unknown_command() {
        let addr = [0x01, 127, 0, 0, 1, 0x1F, 0x90];
        let mut cursor = Cursor::new(create_request(0x09, &addr));
        assert_eq!(
            read_request(&mut cursor).await,
            Err(Socks5Error::UnsupportedCommand(0x09))
        );
    }

    #[tokio::test]
    async fn test_read_truncated() {
        let mut cursor = Cursor::new(create_request(SOCKS5_CMD_TCP_CONNECT, &[0x01, 127, 0]));
        assert_eq!(
            read_request(&mut cursor).await,
            Err(Socks5Error::IncompleteRequest)
        );
    }
}
