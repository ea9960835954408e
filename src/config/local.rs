//! Local listener configuration
//!
//! The `[local]` table: where to listen and how client sessions behave.

use crate::helper::MAX_TIMEOUT_SECS;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1080)
}

fn default_handshake_timeout() -> u64 {
    crate::helper::DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

fn default_connect_timeout() -> u64 {
    crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_udp() -> bool {
    true
}

fn default_udp_idle_timeout() -> u64 {
    crate::helper::DEFAULT_UDP_IDLE_TIMEOUT_SECS
}

fn default_udp_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_keepalive_secs() -> u64 {
    crate::helper::DEFAULT_KEEPALIVE_SECS
}

/// Local SOCKS5 / HTTP front-end configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LocalConfig {
    /// SOCKS5 listen address
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Optional HTTP proxy listen address
    #[serde(default)]
    pub http_listen: Option<SocketAddr>,

    /// Seconds a client gets to finish the greeting and request
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,

    /// Seconds allowed for each upstream connection attempt
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Accept UDP ASSOCIATE
    #[serde(default = "default_udp")]
    pub udp: bool,

    /// Seconds without datagrams before a UDP session closes
    #[serde(default = "default_udp_idle_timeout")]
    pub udp_idle_timeout: u64,

    /// Address UDP relay sockets bind to
    #[serde(default = "default_udp_bind_ip")]
    pub udp_bind_ip: IpAddr,

    /// Domain suffixes whose UDP traffic is dropped
    #[serde(default)]
    pub block_domains: Vec<String>,

    /// Relay UDP to loopback, link-local, multicast and similar IPv4 targets
    #[serde(default)]
    pub allow_non_global_udp_targets: bool,

    /// TCP keepalive period for accepted client connections
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        LocalConfig {
            listen: default_listen(),
            http_listen: None,
            handshake_timeout: default_handshake_timeout(),
            connect_timeout: default_connect_timeout(),
            udp: default_udp(),
            udp_idle_timeout: default_udp_idle_timeout(),
            udp_bind_ip: default_udp_bind_ip(),
            block_domains: Vec::new(),
            allow_non_global_udp_targets: false,
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

impl LocalConfig {
    /// Handshake timeout as a `Duration`
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }

    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// UDP idle timeout as a `Duration`
    pub fn udp_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.udp_idle_timeout)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        let timeouts = [
            ("handshake_timeout", self.handshake_timeout, true),
            ("connect_timeout", self.connect_timeout, true),
            ("udp_idle_timeout", self.udp_idle_timeout, self.udp),
            ("keepalive_secs", self.keepalive_secs, true),
        ];
        for (name, secs, checked) in timeouts {
            if !checked {
                continue;
            }
            if secs == 0 {
                return Err(format!("{} must be greater than zero", name));
            }
            if secs > MAX_TIMEOUT_SECS {
                return Err(format!("{} must be at most {} seconds", name, MAX_TIMEOUT_SECS));
            }
        }
        if let Some(http) = self.http_listen {
            if http == self.listen && http.port() != 0 {
                return Err(format!("http_listen and listen are both {}", http));
            }
        }
        if self.block_domains.iter().any(|d| d.trim_matches('.').is_empty()) {
            return Err("block_domains contains an empty entry".to_string());
        }
        Ok(())
    }
}
