//! TCP relay shared by the SOCKS5 and HTTP front-ends
//!
//! Dials the target through the pool with failover, acknowledges the
//! client the way its front-end expects, then pipes bytes both ways.

use crate::error::RelayError;
use crate::http::{HTTP_BAD_GATEWAY, HTTP_CONNECTION_ESTABLISHED};
use crate::pool::ServerPool;
use crate::socks::command::send_optimistic_success;
use crate::socks::TargetAddr;
use crate::transport::StreamDyn;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Time allowed to flush and close each side once a pipe ends
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How the client is told that its tunnel is ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledge {
    /// SOCKS5 success reply written before any upstream is dialed.
    ///
    /// If every upstream then fails, the client sees the connection close
    /// after a success reply.
    Socks5Optimistic,
    /// `200 Connection established` once an upstream is connected
    HttpTunnel,
    /// Forward this request head upstream once connected
    HttpForward(Bytes),
}

impl Acknowledge {
    fn is_http(&self) -> bool {
        !matches!(self, Acknowledge::Socks5Optimistic)
    }
}

/// Open a stream to `raw_addr` through the first server that accepts it
///
/// Servers are tried in the pool's candidate order. Each failure is
/// recorded before the next server is tried; the first success resets
/// that server's counter.
pub async fn connect_upstream(
    pool: &ServerPool,
    raw_addr: &[u8],
    target: &TargetAddr,
) -> Result<(usize, Box<dyn StreamDyn>), RelayError> {
    for idx in pool.candidates() {
        let Some(server) = pool.server(idx) else {
            continue;
        };
        match server.channel().open_stream(raw_addr).await {
            Ok(stream) => {
                pool.report_success(idx);
                debug!("Connected to {} via {}", target, server.address());
                return Ok((idx, stream));
            }
            Err(e) => {
                warn!("Upstream {} failed for {}: {}", server.address(), target, e);
                pool.report_failure(idx);
                if matches!(e, RelayError::Io(_)) {
                    // Re-resolve the server name on the next attempt
                    server.channel().server().clear_cache().await;
                }
            }
        }
    }
    Err(RelayError::UpstreamUnavailable)
}

/// Handle one client connection whose target is already known
pub async fn relay_tcp<S>(
    pool: &ServerPool,
    mut client: S,
    target: &TargetAddr,
    raw_addr: &[u8],
    ack: Acknowledge,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if ack == Acknowledge::Socks5Optimistic {
        send_optimistic_success(&mut client).await?;
    }

    let (idx, mut upstream) = match connect_upstream(pool, raw_addr, target).await {
        Ok(connected) => connected,
        Err(e) => {
            if ack.is_http() {
                let _ = client.write_all(HTTP_BAD_GATEWAY).await;
                let _ = client.shutdown().await;
            }
            return Err(e);
        }
    };

    match ack {
        Acknowledge::HttpTunnel => {
            client.write_all(HTTP_CONNECTION_ESTABLISHED).await?;
            client.flush().await?;
        }
        Acknowledge::HttpForward(head) => {
            upstream.write_all(&head).await?;
        }
        Acknowledge::Socks5Optimistic => {}
    }

    let via = pool.server(idx).map(|s| s.address()).unwrap_or("?");
    info!("Relaying {} via {}", target, via);

    let (sent, received) = pipe(client, upstream).await;
    debug!(
        "Closed {}: {} bytes sent, {} bytes received",
        target, sent, received
    );
    Ok(())
}

/// Copy bytes both ways until either direction stops
///
/// When one direction reaches EOF or fails, the other is abandoned and
/// both streams are shut down and dropped. Ownership of both streams makes
/// the close happen exactly once. Returns bytes copied `a -> b` and `b -> a`.
pub async fn pipe<A, B>(a: A, b: B) -> (u64, u64)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let a_to_b = tokio::io::copy(&mut a_read, &mut b_write);
    let b_to_a = tokio::io::copy(&mut b_read, &mut a_write);

    let copied = tokio::select! {
        result = a_to_b => {
            match result {
                Ok(bytes) => {
                    debug!("A->B finished: {} bytes", bytes);
                    (bytes, 0)
                }
                Err(e) => {
                    debug!("A->B error: {}", e);
                    (0, 0)
                }
            }
        }
        result = b_to_a => {
            match result {
                Ok(bytes) => {
                    debug!("B->A finished: {} bytes", bytes);
                    (0, bytes)
                }
                Err(e) => {
                    debug!("B->A error: {}", e);
                    (0, 0)
                }
            }
        }
    };

    let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = a_write.shutdown().await;
        let _ = b_write.shutdown().await;
    })
    .await;

    copied
}
