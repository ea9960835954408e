//! Upstream server pool
//!
//! Holds the configured servers in order and decides, per connection
//! attempt, the order in which they are tried.
//!
//! A server with `f` recorded failures is pushed to the back of the order
//! with probability `f / (f + BASE_FAILURE_CREDIT)`. Pushed-back servers
//! keep their relative order and are only reached once every other server
//! has failed, so a recovered server is rediscovered without hammering one
//! that keeps failing.

mod health;

pub use health::{ServerHealth, BASE_FAILURE_CREDIT, MAX_FAILURE_COUNT};

use crate::error::RelayError;
use crate::transport::SecureChannel;
use rand::Rng;
use std::sync::Arc;
use tracing::debug;

/// One configured upstream server
#[derive(Debug, Clone)]
pub struct UpstreamServer {
    channel: Arc<dyn SecureChannel>,
}

impl UpstreamServer {
    /// Wrap a channel bound to its server
    pub fn new(channel: Arc<dyn SecureChannel>) -> Self {
        UpstreamServer { channel }
    }

    /// Configured `host:port`
    pub fn address(&self) -> &str {
        self.channel.server().addr()
    }

    /// Channel used to reach this server
    pub fn channel(&self) -> &Arc<dyn SecureChannel> {
        &self.channel
    }
}

/// Ordered upstream servers plus their shared health counters
#[derive(Debug)]
pub struct ServerPool {
    servers: Vec<UpstreamServer>,
    health: ServerHealth,
}

impl ServerPool {
    /// Build a pool; an empty server list is a configuration error
    pub fn new(servers: Vec<UpstreamServer>) -> Result<Self, RelayError> {
        if servers.is_empty() {
            return Err(RelayError::Config(
                "at least one upstream server is required".to_string(),
            ));
        }
        let health = ServerHealth::new(servers.len());
        Ok(ServerPool { servers, health })
    }

    /// Number of servers
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Always false for a constructed pool
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Server at `idx` in configuration order
    pub fn server(&self, idx: usize) -> Option<&UpstreamServer> {
        self.servers.get(idx)
    }

    /// Failure counters
    pub fn health(&self) -> &ServerHealth {
        &self.health
    }

    /// Order in which to try servers for one connection attempt
    pub fn candidates(&self) -> Vec<usize> {
        self.candidates_with(&mut rand::thread_rng())
    }

    /// `candidates` with a caller-supplied random source
    pub fn candidates_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.servers.len());
        let mut skipped = Vec::new();

        for idx in 0..self.servers.len() {
            let failures = self.health.failures(idx);
            if failures > 0 && rng.gen_range(0..failures + BASE_FAILURE_CREDIT) < failures {
                debug!(
                    "Deferring {} ({} recent failures)",
                    self.servers[idx].address(),
                    failures
                );
                skipped.push(idx);
            } else {
                order.push(idx);
            }
        }

        order.extend(skipped);
        order
    }

    /// Record a successful connection through server `idx`
    pub fn report_success(&self, idx: usize) {
        self.health.report_success(idx);
    }

    /// Record a failed connection through server `idx`
    pub fn report_failure(&self, idx: usize) {
        self.health.report_failure(idx);
    }
}
