//! NAT table for one UDP ASSOCIATE session
//!
//! Maps a resolved target address to the client that last sent to it and
//! the header that client used, so replies can be wrapped the way the
//! client addressed them.

use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// One client-to-target mapping
#[derive(Debug, Clone)]
pub struct NatEntry {
    /// Where replies are delivered
    pub client: SocketAddr,
    /// RSV, FRAG and address field from the client's last datagram
    pub header: Bytes,
    last_seen: Instant,
}

impl NatEntry {
    /// Time since the last datagram in either direction
    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

/// Target-keyed session table
#[derive(Debug, Default)]
pub struct NatTable {
    entries: RwLock<HashMap<SocketAddr, NatEntry>>,
}

impl NatTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or refresh the mapping for `target`
    ///
    /// Returns `true` when the entry is new.
    pub async fn upsert(&self, target: SocketAddr, client: SocketAddr, header: Bytes) -> bool {
        let entry = NatEntry {
            client,
            header,
            last_seen: Instant::now(),
        };
        self.entries.write().await.insert(target, entry).is_none()
    }

    /// Find the mapping for a reply from `source` and mark it active
    pub async fn lookup(&self, source: SocketAddr) -> Option<NatEntry> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&source)?;
        entry.last_seen = Instant::now();
        Some(entry.clone())
    }

    /// Drop entries idle for at least `idle`; returns how many were removed
    pub async fn evict_idle(&self, idle: Duration) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.idle_for() < idle);
        before - entries.len()
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the table holds no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
