//! Name resolution for UDP targets
//!
//! Domain targets are resolved off the relay loop so a slow lookup never
//! holds up datagrams for other targets.

use crate::error::RelayError;
use crate::socks::types::TargetAddr;
use async_trait::async_trait;
use std::fmt::Debug;
use std::net::SocketAddr;

/// Turns a UDP target into the socket address its datagrams go to
#[async_trait]
pub trait Resolver: Debug + Send + Sync {
    async fn resolve(&self, target: &TargetAddr) -> Result<SocketAddr, RelayError>;
}

/// Resolver backed by the system's `getaddrinfo`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, target: &TargetAddr) -> Result<SocketAddr, RelayError> {
        target.resolve().await
    }
}
