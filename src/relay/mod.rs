//! Shared relay context
//!
//! One `Relay` is built at startup and handed to every session: it owns
//! the server pool and the settings sessions need.

mod filter;
mod tcp;

pub use filter::{is_global_unicast, BlockList, UdpPolicy};
pub use tcp::{connect_upstream, pipe, relay_tcp, Acknowledge};

use crate::config::{Config, LocalConfig};
use crate::error::RelayError;
use crate::pool::{ServerPool, UpstreamServer};
use crate::transport::{AddrMaybeCached, ChannelFactory, CipherKind, TcpDialer};
use std::time::Duration;
use tracing::info;

/// Everything a client session needs
#[derive(Debug)]
pub struct Relay {
    pool: ServerPool,
    udp_policy: UdpPolicy,
    local: LocalConfig,
}

impl Relay {
    /// Assemble from an already-built pool
    pub fn new(pool: ServerPool, local: LocalConfig) -> Self {
        let udp_policy = UdpPolicy::new(
            BlockList::new(&local.block_domains),
            local.allow_non_global_udp_targets,
        );
        Relay {
            pool,
            udp_policy,
            local,
        }
    }

    /// Validate `config` and build channels for every upstream server
    pub fn from_config(config: &Config) -> Result<Self, RelayError> {
        config.validate().map_err(RelayError::Config)?;

        let dialer = TcpDialer::default().with_connect_timeout(config.local.connect_timeout());
        let mut factory = ChannelFactory::new(dialer);

        let mut servers = Vec::new();
        for server in config.upstreams().map_err(RelayError::Config)? {
            let kind: CipherKind = server.method.parse()?;
            let channel = factory.create(
                AddrMaybeCached::new(&server.address),
                kind,
                &server.password,
            )?;
            info!("Upstream {} ({})", server.address, kind);
            servers.push(UpstreamServer::new(channel));
        }

        Ok(Relay::new(ServerPool::new(servers)?, config.local.clone()))
    }

    /// Upstream server pool
    pub fn pool(&self) -> &ServerPool {
        &self.pool
    }

    /// UDP target policy
    pub fn udp_policy(&self) -> &UdpPolicy {
        &self.udp_policy
    }

    /// Local front-end settings
    pub fn local(&self) -> &LocalConfig {
        &self.local
    }

    /// Time allowed for greeting and request
    pub fn handshake_timeout(&self) -> Duration {
        self.local.handshake_timeout()
    }
}
