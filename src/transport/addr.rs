//! Upstream server addresses with a resolution cache
//!
//! Server names are resolved on first use and remembered, so every
//! connection attempt after the first skips the DNS lookup.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Server address that may have a cached resolved address
#[derive(Debug, Clone)]
pub struct AddrMaybeCached {
    /// The configured `host:port`
    addr: String,
    /// Cached resolved address
    cached: Arc<RwLock<Option<SocketAddr>>>,
}

impl AddrMaybeCached {
    /// Create a new address without cached resolution
    pub fn new(addr: &str) -> Self {
        AddrMaybeCached {
            addr: addr.to_string(),
            cached: Arc::new(RwLock::new(addr.parse().ok())),
        }
    }

    /// Get the configured address string
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Get the cached address if available
    pub async fn get_cached(&self) -> Option<SocketAddr> {
        *self.cached.read().await
    }

    /// Forget the cached address so the next `resolve` looks it up again
    pub async fn clear_cache(&self) {
        if self.addr.parse::<SocketAddr>().is_err() {
            *self.cached.write().await = None;
        }
    }

    /// Resolve the address, using the cache if available
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        if let Some(cached) = self.get_cached().await {
            return Ok(cached);
        }

        let resolved = tokio::net::lookup_host(self.addr.as_str())
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses found for {}", self.addr),
                )
            })?;

        *self.cached.write().await = Some(resolved);
        Ok(resolved)
    }
}

impl From<SocketAddr> for AddrMaybeCached {
    fn from(addr: SocketAddr) -> Self {
        AddrMaybeCached {
            addr: addr.to_string(),
            cached: Arc::new(RwLock::new(Some(addr))),
        }
    }
}

impl From<&str> for AddrMaybeCached {
    fn from(addr: &str) -> Self {
        AddrMaybeCached::new(addr)
    }
}
