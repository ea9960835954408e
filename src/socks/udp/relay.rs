//! UDP relay for one ASSOCIATE session
//!
//! Bridges the client-facing UDP socket with the upstream server's
//! datagram channel. The session lives as long as the SOCKS5 control
//! connection, and ends early when no datagram moves for the idle timeout.

use super::nat::NatTable;
use super::packet::{encode_client_datagram, parse_client_datagram};
use super::resolve::{Resolver, SystemResolver};
use crate::error::{is_closed_error, RelayError};
use crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS;
use crate::relay::UdpPolicy;
use crate::socks::types::TargetAddr;
use crate::transport::{SecureDatagram, MAX_DATAGRAM_SIZE};
use bytes::Bytes;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Which client addresses may use the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientFilter {
    ip: IpAddr,
    port: Option<u16>,
}

impl ClientFilter {
    /// Accept datagrams from the control connection's peer IP, and from only
    /// `requested_port` when the ASSOCIATE request named one.
    pub fn new(peer: SocketAddr, requested_port: u16) -> Self {
        ClientFilter {
            ip: peer.ip(),
            port: (requested_port != 0).then_some(requested_port),
        }
    }

    /// Whether a datagram from `from` belongs to this session
    pub fn accepts(&self, from: SocketAddr) -> bool {
        from.ip() == self.ip && self.port.map_or(true, |port| from.port() == port)
    }
}

/// Per-session counters, logged when the session ends
#[derive(Debug, Default)]
pub struct UdpStats {
    /// Datagrams forwarded client to upstream
    pub client_datagrams: AtomicU64,
    /// Payload bytes forwarded client to upstream
    pub client_bytes: AtomicU64,
    /// Datagrams delivered upstream to client
    pub upstream_datagrams: AtomicU64,
    /// Payload bytes delivered upstream to client
    pub upstream_bytes: AtomicU64,
    /// Datagrams dropped in either direction
    pub dropped: AtomicU64,
}

impl UdpStats {
    fn forwarded(&self, datagrams: &AtomicU64, bytes: &AtomicU64, len: usize) {
        datagrams.fetch_add(1, Ordering::Relaxed);
        bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    fn drop_one(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Most domain lookups one session keeps in flight
const MAX_PENDING_LOOKUPS: usize = 64;

/// Longest NAT sweep period
const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(300);

/// Stand-in deadline when the idle timeout overflows the clock
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A client datagram waiting on its target's address
#[derive(Debug)]
struct Lookup {
    from: SocketAddr,
    target: TargetAddr,
    header: Bytes,
    payload: Bytes,
    resolved: Result<SocketAddr, RelayError>,
}

/// The two sockets and the NAT table of one session
#[derive(Debug)]
pub struct UdpSession {
    client_socket: UdpSocket,
    upstream: SecureDatagram,
    filter: ClientFilter,
    policy: UdpPolicy,
    nat: NatTable,
    idle_timeout: Duration,
    resolver: Arc<dyn Resolver>,
    resolve_timeout: Duration,
    stats: UdpStats,
}

impl UdpSession {
    /// Assemble a session from already-bound sockets
    pub fn new(
        client_socket: UdpSocket,
        upstream: SecureDatagram,
        filter: ClientFilter,
        policy: UdpPolicy,
        idle_timeout: Duration,
    ) -> Self {
        UdpSession {
            client_socket,
            upstream,
            filter,
            policy,
            nat: NatTable::new(),
            idle_timeout,
            resolver: Arc::new(SystemResolver),
            resolve_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            stats: UdpStats::default(),
        }
    }

    /// Resolve domain targets with `resolver`
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Drop a datagram whose target takes longer than `timeout` to resolve
    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Relay until the control stream closes or the session goes idle
    ///
    /// Anything the client sends on the control stream is read and
    /// discarded. Both sockets are closed when this returns.
    pub async fn run<S>(self, mut control: S) -> Result<(), RelayError>
    where
        S: AsyncRead + Unpin,
    {
        let mut client_buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut upstream_buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut drain = [0u8; 512];

        let mut sweep = tokio::time::interval(sweep_period(self.idle_timeout));
        sweep.tick().await;

        let idle = tokio::time::sleep_until(idle_deadline(self.idle_timeout));
        tokio::pin!(idle);

        let (lookup_tx, mut lookup_rx) = mpsc::channel(MAX_PENDING_LOOKUPS);
        let mut pending = 0usize;

        loop {
            tokio::select! {
                read = control.read(&mut drain) => {
                    match read {
                        Ok(0) => {
                            debug!("UDP control connection closed");
                            break;
                        }
                        Ok(n) => trace!("Discarded {} bytes on UDP control connection", n),
                        Err(e) if is_closed_error(&e) => {
                            debug!("UDP control connection closed: {}", e);
                            break;
                        }
                        Err(e) => {
                            warn!("UDP control connection error: {}", e);
                            break;
                        }
                    }
                }
                received = self.client_socket.recv_from(&mut client_buf) => {
                    match received {
                        Ok((n, from)) => {
                            if self.filter.accepts(from) {
                                idle.as_mut().reset(idle_deadline(self.idle_timeout));
                                self.on_client_datagram(
                                    &client_buf[..n],
                                    from,
                                    &lookup_tx,
                                    &mut pending,
                                )
                                .await;
                            } else {
                                self.stats.drop_one();
                                trace!("Ignoring datagram from unknown peer {}", from);
                            }
                        }
                        Err(e) if is_closed_error(&e) => {
                            debug!("Client UDP socket closed: {}", e);
                            break;
                        }
                        Err(e) => {
                            // ICMP errors from earlier sends surface here on some platforms
                            debug!("Client UDP socket error: {}", e);
                        }
                    }
                }
                Some(lookup) = lookup_rx.recv() => {
                    pending = pending.saturating_sub(1);
                    self.on_lookup(lookup).await;
                }
                frame = self.upstream.recv_frame(&mut upstream_buf) => {
                    match frame {
                        Ok((source, payload)) => {
                            idle.as_mut().reset(idle_deadline(self.idle_timeout));
                            self.on_upstream_frame(source, payload).await;
                        }
                        Err(RelayError::Io(e)) if is_closed_error(&e) => {
                            debug!("Upstream UDP socket closed: {}", e);
                            break;
                        }
                        Err(RelayError::Io(e)) => {
                            warn!("Upstream UDP socket error: {}", e);
                            break;
                        }
                        Err(e) => {
                            self.stats.drop_one();
                            debug!("Dropping undecodable upstream datagram: {}", e);
                        }
                    }
                }
                _ = sweep.tick() => {
                    let evicted = self.nat.evict_idle(self.idle_timeout).await;
                    if evicted > 0 {
                        debug!("Evicted {} idle NAT entries", evicted);
                    }
                }
                _ = &mut idle => {
                    debug!("UDP session idle for {:?}", self.idle_timeout);
                    break;
                }
            }
        }

        self.log_stats().await;
        Ok(())
    }

    /// Handle a datagram from an accepted client address
    ///
    /// IP targets are forwarded at once. Domain targets are resolved on a
    /// spawned task whose result comes back through `lookups`.
    async fn on_client_datagram(
        &self,
        buf: &[u8],
        from: SocketAddr,
        lookups: &mpsc::Sender<Lookup>,
        pending: &mut usize,
    ) {
        let datagram = match parse_client_datagram(buf) {
            Ok(datagram) => datagram,
            Err(e) => {
                self.stats.drop_one();
                debug!("Dropping client datagram from {}: {}", from, e);
                return;
            }
        };

        if !self.policy.permits_target(&datagram.target) {
            self.stats.drop_one();
            debug!("Dropping datagram to blocked target {}", datagram.target);
            return;
        }

        if let TargetAddr::Ip(resolved) = datagram.target {
            self.forward(
                from,
                &datagram.target,
                resolved,
                Bytes::copy_from_slice(datagram.header),
                datagram.payload,
            )
            .await;
            return;
        }

        if *pending >= MAX_PENDING_LOOKUPS {
            self.stats.drop_one();
            debug!("Dropping datagram to {}: {} lookups already pending", datagram.target, pending);
            return;
        }
        *pending += 1;

        let resolver = Arc::clone(&self.resolver);
        let timeout = self.resolve_timeout;
        let lookups = lookups.clone();
        let target = datagram.target.clone();
        let header = Bytes::copy_from_slice(datagram.header);
        let payload = Bytes::copy_from_slice(datagram.payload);
        tokio::spawn(async move {
            let resolved = match tokio::time::timeout(timeout, resolver.resolve(&target)).await {
                Ok(result) => result,
                Err(_) => Err(RelayError::Timeout(format!(
                    "resolving {} took longer than {:?}",
                    target, timeout
                ))),
            };
            // The session may already be gone
            let _ = lookups
                .send(Lookup {
                    from,
                    target,
                    header,
                    payload,
                    resolved,
                })
                .await;
        });
    }

    async fn on_lookup(&self, lookup: Lookup) {
        match lookup.resolved {
            Ok(resolved) => {
                self.forward(
                    lookup.from,
                    &lookup.target,
                    resolved,
                    lookup.header,
                    &lookup.payload,
                )
                .await
            }
            Err(e) => {
                self.stats.drop_one();
                debug!("Dropping datagram to {}: {}", lookup.target, e);
            }
        }
    }

    /// Record the NAT mapping and send the payload to `resolved`
    async fn forward(
        &self,
        from: SocketAddr,
        target: &TargetAddr,
        resolved: SocketAddr,
        header: Bytes,
        payload: &[u8],
    ) {
        if !self.policy.permits_ip(resolved.ip()) {
            self.stats.drop_one();
            debug!("Dropping datagram to {} ({}): not a global address", target, resolved);
            return;
        }

        if self.nat.upsert(resolved, from, header).await {
            debug!("UDP session {} -> {}", from, target);
        }

        match self
            .upstream
            .send_frame(&TargetAddr::Ip(resolved), payload)
            .await
        {
            Ok(_) => self.stats.forwarded(
                &self.stats.client_datagrams,
                &self.stats.client_bytes,
                payload.len(),
            ),
            Err(e) => {
                self.stats.drop_one();
                warn!("Failed to send datagram to {}: {}", self.upstream.server(), e);
            }
        }
    }

    async fn on_upstream_frame(&self, source: TargetAddr, payload: Vec<u8>) {
        let source = match source {
            TargetAddr::Ip(addr) => addr,
            other => {
                self.stats.drop_one();
                debug!("Dropping upstream datagram with domain source {}", other);
                return;
            }
        };

        let Some(entry) = self.nat.lookup(source).await else {
            self.stats.drop_one();
            debug!("{}", RelayError::SessionNotFound(source));
            return;
        };

        let datagram = encode_client_datagram(&entry.header, &payload);
        match self.client_socket.send_to(&datagram, entry.client).await {
            Ok(_) => self.stats.forwarded(
                &self.stats.upstream_datagrams,
                &self.stats.upstream_bytes,
                payload.len(),
            ),
            Err(e) => {
                self.stats.drop_one();
                debug!("Failed to deliver datagram to {}: {}", entry.client, e);
            }
        }
    }

    async fn log_stats(&self) {
        info!(
            "UDP session closed: {} datagrams ({} bytes) out, {} datagrams ({} bytes) in, {} dropped, {} NAT entries",
            self.stats.client_datagrams.load(Ordering::Relaxed),
            self.stats.client_bytes.load(Ordering::Relaxed),
            self.stats.upstream_datagrams.load(Ordering::Relaxed),
            self.stats.upstream_bytes.load(Ordering::Relaxed),
            self.stats.dropped.load(Ordering::Relaxed),
            self.nat.len().await,
        );
    }
}

/// How often idle NAT entries are swept
fn sweep_period(idle_timeout: Duration) -> Duration {
    (idle_timeout / 2).clamp(Duration::from_secs(1), MAX_SWEEP_PERIOD)
}

/// When the session ends if nothing moves
fn idle_deadline(idle_timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(idle_timeout).unwrap_or_else(|| now + FAR_FUTURE)
}
