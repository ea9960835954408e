//! SOCKS5 reply builder
//!
//! Sends the fixed-size replies this relay produces.

use crate::error::Socks5ReplyCode;
use crate::socks::codec::encode_socks_reply;
use crate::socks::consts::*;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Build and send a SOCKS5 reply
///
/// # SOCKS5 Reply Format
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   |    4     |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub async fn send_reply<S>(
    stream: &mut S,
    code: Socks5ReplyCode,
    bind_addr: Option<SocketAddr>,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&encode_socks_reply(code.into(), bind_addr))
        .await?;
    stream.flush().await
}

/// Send the success reply written before the upstream is dialed
///
/// The bound address is fixed at `0.0.0.0:2115`. If every upstream later
/// fails the client only sees the connection close.
pub async fn send_optimistic_success<S>(stream: &mut S) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let bound = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, OPTIMISTIC_BIND_PORT);
    send_reply(stream, Socks5ReplyCode::Succeeded, Some(bound.into())).await
}

/// Build a "command not supported" reply
pub async fn send_command_not_supported<S>(stream: &mut S) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    send_reply(stream, Socks5ReplyCode::CommandNotSupported, None).await
}

/// Build a "general failure" reply
pub async fn send_general_failure<S>(stream: &mut S) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    send_reply(stream, Socks5ReplyCode::GeneralFailure, None).await
}
