//! Main SOCKS5 handler
//!
//! Runs the greeting and request under the handshake timeout, then hands
//! the connection to the TCP relay or the UDP associate relay.

use crate::error::{RelayError, Socks5Error, Socks5ReplyCode};
use crate::relay::{relay_tcp, Acknowledge, Relay};
use crate::socks::command::{read_request, send_command_not_supported, send_reply};
use crate::socks::handshake::negotiate;
use crate::socks::types::SocksCommand;
use crate::socks::udp::handle_udp_associate;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Handle one SOCKS5 client connection
///
/// # Protocol Flow
///
/// 1. Method negotiation (always "no authentication")
/// 2. Request parsing
/// 3. CONNECT goes to the TCP relay with an optimistic reply; UDP
///    ASSOCIATE to the UDP relay when enabled
///
/// BIND, unknown commands and UDP ASSOCIATE with UDP disabled get a
/// `0x07` reply. `peer` and `local` are the two ends of the accepted
/// connection.
pub async fn handle_socks5<S>(
    mut stream: S,
    peer: SocketAddr,
    local: SocketAddr,
    relay: &Relay,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let handshake = async {
        negotiate(&mut stream).await?;
        read_request(&mut stream).await
    };

    let request = match tokio::time::timeout(relay.handshake_timeout(), handshake).await {
        Ok(Ok(request)) => request,
        Ok(Err(e)) => {
            if matches!(
                e,
                Socks5Error::UnsupportedCommand(_) | Socks5Error::UnsupportedAddressType(_)
            ) {
                let _ = send_reply(&mut stream, Socks5ReplyCode::from(&e), None).await;
            }
            return Err(e.into());
        }
        Err(_) => {
            debug!("Handshake from {} timed out", peer);
            return Err(Socks5Error::IncompleteRequest.into());
        }
    };

    info!("SOCKS5 {} request from {} to {}", request.command, peer, request.target);

    match request.command {
        SocksCommand::Connect => {
            relay_tcp(
                relay.pool(),
                stream,
                &request.target,
                &request.raw_addr,
                Acknowledge::Socks5Optimistic,
            )
            .await
        }
        SocksCommand::UdpAssociate if relay.local().udp => {
            handle_udp_associate(stream, peer, local, &request.target, relay).await
        }
        SocksCommand::UdpAssociate => {
            warn!("UDP ASSOCIATE not allowed by configuration");
            send_command_not_supported(&mut stream).await?;
            Ok(())
        }
        SocksCommand::Bind => {
            warn!("BIND command not supported");
            send_command_not_supported(&mut stream).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalConfig;
    use crate::pool::{ServerPool, UpstreamServer};
    use crate::socks::consts::*;
    use crate::transport::{PlainChannel, TcpDialer};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn test_relay(local: LocalConfig) -> Relay {
        let channel = PlainChannel::new("127.0.0.1:9".into(), TcpDialer::default());
        let pool = ServerPool::new(vec![UpstreamServer::new(Arc::new(channel))]).unwrap();
        Relay::new(pool, local)
    }

    fn addrs() -> (SocketAddr, SocketAddr) {
        ("127.0.0.1:50000".parse().unwrap(), "127.0.0.1:1080".parse().unwrap())
    }

    // Helper to create a SOCKS5 greeting followed by a request
    fn create_socks5_handshake(command: u8, addr: &[u8]) -> Vec<u8> {
        let mut data = vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE];
        data.extend_from_slice(&[SOCKS5_VERSION, command, SOCKS5_RESERVED]);
        data.extend_from_slice(addr);
        data
    }

    async fn run_with_input(
        local: LocalConfig,
        input: Vec<u8>,
    ) -> (Result<(), RelayError>, Vec<u8>) {
        let relay = test_relay(local);
        let (mut client, server) = duplex(1024);
        let (peer, local_addr) = addrs();

        client.write_all(&input).await.unwrap();
        let result = handle_socks5(server, peer, local_addr, &relay).await;

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        (result, received)
    }

    #[tokio::test]
    async fn test_bind_is_rejected() {
        let input = create_socks5_handshake(SOCKS5_CMD_TCP_BIND, &[0x01, 127, 0, 0, 1, 0, 80]);
        let (result, received) = run_with_input(LocalConfig::default(), input).await;

        assert!(result.is_ok());
        assert_eq!(&received[..2], &[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE]);
        assert_eq!(received[2..].len(), SOCKS5_REPLY_LEN);
        assert_eq!(received[3], 0x07);
    }

    #[tokio::test]
    async fn test_unknown_command_is_rejected() {
        let input = create_socks5_handshake(0x7F, &[0x01, 127, 0, 0, 1, 0, 80]);
        let (result, received) = run_with_input(LocalConfig::default(), input).await;

        assert!(matches!(
            result,
            Err(RelayError::Socks5(Socks5Error::UnsupportedCommand(0x7F)))
        ));
        assert_eq!(received[3], 0x07);
    }

    #[tokio::test]
    async fn test_unknown_address_type_is_rejected() {
        let input = create_socks5_handshake(SOCKS5_CMD_TCP_CONNECT, &[0x05, 0, 0]);
        let (result, received) = run_with_input(LocalConfig::default(), input).await;

        assert!(matches!(
            result,
            Err(RelayError::Socks5(Socks5Error::UnsupportedAddressType(0x05)))
        ));
        assert_eq!(received[3], 0x08);
    }

    #[tokio::test]
    async fn test_udp_disabled_is_rejected() {
        let local = LocalConfig {
            udp: false,
            ..LocalConfig::default()
        };
        let input = create_socks5_handshake(SOCKS5_CMD_UDP_ASSOCIATE, &[0x01, 0, 0, 0, 0, 0, 0]);
        let (result, received) = run_with_input(local, input).await;

        assert!(result.is_ok());
        assert_eq!(received[3], 0x07);
    }

    #[tokio::test]
    async fn test_wrong_version_closes_without_reply() {
        let (result, received) = run_with_input(LocalConfig::default(), vec![0x04, 1, 0]).await;

        assert!(matches!(
            result,
            Err(RelayError::Socks5(Socks5Error::ProtocolVersionMismatch(4)))
        ));
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_request_is_incomplete() {
        let input = vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE, SOCKS5_VERSION, 1];
        let relay = test_relay(LocalConfig::default());
        let (mut client, server) = duplex(1024);
        let (peer, local_addr) = addrs();

        client.write_all(&input).await.unwrap();
        client.shutdown().await.unwrap();
        let result = handle_socks5(server, peer, local_addr, &relay).await;

        assert!(matches!(
            result,
            Err(RelayError::Socks5(Socks5Error::IncompleteRequest))
        ));
    }

    #[tokio::test]
    async fn test_silent_client_times_out() {
        let local = LocalConfig {
            handshake_timeout: 1,
            ..LocalConfig::default()
        };
        let relay = test_relay(local);
        let (_client, server) = duplex(1024);
        let (peer, local_addr) = addrs();

        let result = tokio::time::timeout(
            Duration::from_secs(3),
            handle_socks5(server, peer, local_addr, &relay),
        )
        .await
        .unwrap();
        assert!(matches!(
            result,
            Err(RelayError::Socks5(Socks5Error::IncompleteRequest))
        ));
    }
}
