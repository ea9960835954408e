//! Unencrypted tunnel framing
//!
//! Streams carry the raw address header followed by payload; datagrams are
//! the tunnel frame as-is. Useful against a local test server or an
//! upstream reached over an already-private link.

use super::{AddrMaybeCached, CipherKind, SecureChannel, StreamDyn, TcpDialer};
use crate::error::RelayError;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

/// Channel without encryption
#[derive(Debug, Clone)]
pub struct PlainChannel {
    server: AddrMaybeCached,
    dialer: TcpDialer,
}

impl PlainChannel {
    /// Create a plain channel to `server`
    pub fn new(server: AddrMaybeCached, dialer: TcpDialer) -> Self {
        PlainChannel { server, dialer }
    }
}

#[async_trait]
impl SecureChannel for PlainChannel {
    fn server(&self) -> &AddrMaybeCached {
        &self.server
    }

    fn kind(&self) -> CipherKind {
        CipherKind::Plain
    }

    async fn open_stream(&self, raw_addr: &[u8]) -> Result<Box<dyn StreamDyn>, RelayError> {
        let mut stream = self.dialer.connect(&self.server).await?;
        stream.write_all(raw_addr).await?;
        Ok(Box::new(stream))
    }

    fn encode_packet(&self, frame: &[u8]) -> Result<Vec<u8>, RelayError> {
        Ok(frame.to_vec())
    }

    fn decode_packet(&self, packet: &[u8]) -> Result<Vec<u8>, RelayError> {
        Ok(packet.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_stream_sends_header_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = listener.local_addr().unwrap();
        let channel = PlainChannel::new(server.into(), TcpDialer::default());

        let accept = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 12];
            conn.read_exact(&mut buf).await.unwrap();
            buf
        });

        let header = [0x01, 1, 2, 3, 4, 0x00, 0x50];
        let mut stream = channel.open_stream(&header).await.unwrap();
        stream.write_all(b"hello").await.unwrap();

        let received = accept.await.unwrap();
        assert_eq!(&received[..7], &header);
        assert_eq!(&received[7..], b"hello");
    }

    #[test]
    fn test_packets_pass_through() {
        let channel = PlainChannel::new("127.0.0.1:1".into(), TcpDialer::default());
        let frame = [0x01, 8, 8, 8, 8, 0, 53, 0xAB];
        assert_eq!(channel.encode_packet(&frame).unwrap(), frame);
        assert_eq!(channel.decode_packet(&frame).unwrap(), frame);
    }
}
