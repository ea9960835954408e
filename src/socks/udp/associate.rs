//! UDP ASSOCIATE command

use super::relay::{ClientFilter, UdpSession};
use crate::error::{RelayError, Socks5ReplyCode};
use crate::relay::Relay;
use crate::socks::command::{send_general_failure, send_reply};
use crate::socks::types::TargetAddr;
use crate::transport::SecureDatagram;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UdpSocket;
use tracing::{info, warn};

/// Handle a UDP ASSOCIATE request
///
/// Binds the client-facing socket on the control connection's local IP
/// and opens the datagram channel to the pool's first candidate, then
/// replies with the client-facing address and relays until the control
/// connection closes. A failure to set up either socket is reported with
/// a general-failure reply.
pub async fn handle_udp_associate<S>(
    mut stream: S,
    peer: SocketAddr,
    local: SocketAddr,
    requested: &TargetAddr,
    relay: &Relay,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (client_socket, upstream) = match open_sockets(local, relay).await {
        Ok(sockets) => sockets,
        Err(e) => {
            warn!("UDP ASSOCIATE setup for {} failed: {}", peer, e);
            let _ = send_general_failure(&mut stream).await;
            return Err(e);
        }
    };

    let bound = client_socket.local_addr()?;
    send_reply(&mut stream, Socks5ReplyCode::Succeeded, Some(bound)).await?;

    info!(
        "UDP ASSOCIATE for {} on {} via {}",
        peer,
        bound,
        upstream.server()
    );

    let session = UdpSession::new(
        client_socket,
        upstream,
        ClientFilter::new(peer, requested.port()),
        relay.udp_policy().clone(),
        relay.local().udp_idle_timeout(),
    )
    .with_resolve_timeout(relay.local().connect_timeout());
    session.run(stream).await
}

async fn open_sockets(
    local: SocketAddr,
    relay: &Relay,
) -> Result<(UdpSocket, SecureDatagram), RelayError> {
    let client_socket = UdpSocket::bind(SocketAddr::new(local.ip(), 0)).await?;

    let pool = relay.pool();
    let server = pool
        .candidates()
        .first()
        .and_then(|idx| pool.server(*idx))
        .ok_or(RelayError::UpstreamUnavailable)?;
    let upstream =
        SecureDatagram::open(server.channel().clone(), relay.local().udp_bind_ip).await?;

    Ok((client_socket, upstream))
}
