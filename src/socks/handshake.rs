//! SOCKS5 method negotiation
//!
//! Only "no authentication" is offered. Whatever method list the client
//! sends, the reply is `{5, 0}`.

use super::consts::*;
use crate::error::Socks5Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Run the greeting exchange
///
/// ```text
/// client: +----+----------+----------+    server: +----+--------+
///         |VER | NMETHODS | METHODS  |            |VER | METHOD |
///         +----+----------+----------+            +----+--------+
///         | 1  |    1     | 1 to 255 |            | 1  |   1    |
///         +----+----------+----------+            +----+--------+
/// ```
pub async fn negotiate<S>(stream: &mut S) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS5_VERSION {
        return Err(Socks5Error::ProtocolVersionMismatch(header[0]));
    }

    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;
    trace!("Client offered methods {:?}", methods);

    stream
        .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE])
        .await?;
    stream.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_negotiate_single_method() {
        let mut mock = Builder::new()
            .read(&[0x05, 0x01, 0x00])
            .write(&[0x05, 0x00])
            .build();
        negotiate(&mut mock).await.unwrap();
    }

    #[tokio::test]
    async fn test_negotiate_ignores_offered_methods() {
        // Password-only clients still get "no authentication"
        let mut mock = Builder::new()
            .read(&[0x05, 0x03, 0x02, 0x01, 0x80])
            .write(&[0x05, 0x00])
            .build();
        negotiate(&mut mock).await.unwrap();
    }

    #[tokio::test]
    async fn test_negotiate_empty_method_list() {
        let mut mock = Builder::new()
            .read(&[0x05, 0x00])
            .write(&[0x05, 0x00])
            .build();
        negotiate(&mut mock).await.unwrap();
    }

    #[tokio::test]
    async fn test_negotiate_wrong_version() {
        let mut mock = Builder::new().read(&[0x04, 0x01]).build();
        assert_eq!(
            negotiate(&mut mock).await,
            Err(Socks5Error::ProtocolVersionMismatch(4))
        );
    }

    #[tokio::test]
    async fn test_negotiate_short_read() {
        let mut mock = Builder::new().read(&[0x05, 0x02, 0x00]).build();
        assert_eq!(
            negotiate(&mut mock).await,
            Err(Socks5Error::IncompleteRequest)
        );
    }
}
