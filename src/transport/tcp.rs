//! TCP dialing to upstream servers

use super::{AddrMaybeCached, SocketOpts};
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

/// Dials upstream servers with a timeout and socket options
#[derive(Debug, Clone)]
pub struct TcpDialer {
    /// Socket options to apply to connections
    socket_opts: SocketOpts,
    /// Connection timeout
    connect_timeout: Duration,
}

impl Default for TcpDialer {
    fn default() -> Self {
        TcpDialer {
            socket_opts: SocketOpts::default(),
            connect_timeout: Duration::from_secs(crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl TcpDialer {
    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connection timeout in use
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Connect to `addr`, failing with `TimedOut` after the connect timeout
    pub async fn connect(&self, addr: &AddrMaybeCached) -> io::Result<TcpStream> {
        let resolved = addr.resolve().await?;

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(resolved))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connection timeout to {}", addr.addr()),
                )
            })??;

        if let Err(e) = self.socket_opts.apply(&stream) {
            tracing::warn!("Failed to apply socket options: {}", e);
        }

        tracing::debug!("TCP connection established to {}", resolved);

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_dialer_defaults() {
        let dialer = TcpDialer::default();
        assert!(dialer.socket_opts.nodelay);
        assert_eq!(dialer.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_tcp_dialer_builders() {
        let dialer = TcpDialer::default().with_connect_timeout(Duration::from_secs(30));
        assert!(dialer.socket_opts.nodelay);
        assert_eq!(dialer.connect_timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_tcp_dialer_connects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = TcpDialer::default();
        let stream = dialer.connect(&addr.into()).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_tcp_dialer_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dialer = TcpDialer::default().with_connect_timeout(Duration::from_millis(500));
        assert!(dialer.connect(&addr.into()).await.is_err());
    }
}
