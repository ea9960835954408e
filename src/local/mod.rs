//! Local listeners and lifecycle
//!
//! Binds the SOCKS5 listener (and the HTTP listener when configured),
//! spawns one task per accepted connection and stops accepting when the
//! shutdown broadcast fires.

use crate::config::Config;
use crate::error::{is_closed_error, RelayError, Socks5Error};
use crate::http::handle_http;
use crate::relay::Relay;
use crate::socks::handle_socks5;
use crate::transport::SocketOpts;
use anyhow::{Context, Result};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a full descriptor table does not spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Which front-end accepted a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrontEnd {
    Socks5,
    Http,
}

/// Bound listeners plus the shared relay context
#[derive(Debug)]
pub struct LocalServer {
    relay: Arc<Relay>,
    socks_listener: TcpListener,
    http_listener: Option<TcpListener>,
    socket_opts: SocketOpts,
}

impl LocalServer {
    /// Validate `config`, build the relay context and bind the listeners
    pub async fn bind(config: &Config) -> Result<Self> {
        let relay = Relay::from_config(config).context("Invalid configuration")?;
        let local = relay.local().clone();

        let socks_listener = TcpListener::bind(local.listen)
            .await
            .with_context(|| format!("Failed to bind SOCKS5 listener on {}", local.listen))?;

        let http_listener = match local.http_listen {
            Some(addr) => Some(
                TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("Failed to bind HTTP listener on {}", addr))?,
            ),
            None => None,
        };

        Ok(LocalServer {
            relay: Arc::new(relay),
            socks_listener,
            http_listener,
            socket_opts: SocketOpts::for_client(local.keepalive_secs),
        })
    }

    /// Address the SOCKS5 listener is bound to
    pub fn socks_addr(&self) -> io::Result<SocketAddr> {
        self.socks_listener.local_addr()
    }

    /// Address the HTTP listener is bound to, if any
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Accept connections until a shutdown signal arrives
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        info!("SOCKS5 listening on {}", self.socks_addr()?);
        if let Some(addr) = self.http_addr() {
            info!("HTTP proxy listening on {}", addr);
        }
        info!("{} upstream server(s)", self.relay.pool().len());

        loop {
            tokio::select! {
                accepted = self.socks_listener.accept() => {
                    self.dispatch(accepted, FrontEnd::Socks5).await;
                }
                accepted = accept_optional(self.http_listener.as_ref()) => {
                    self.dispatch(accepted, FrontEnd::Http).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing listeners");
                    break;
                }
            }
        }

        info!("Local server stopped");
        Ok(())
    }

    async fn dispatch(&self, accepted: io::Result<(TcpStream, SocketAddr)>, front_end: FrontEnd) {
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept {:?} connection: {}", front_end, e);
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                return;
            }
        };

        if let Err(e) = self.socket_opts.apply(&stream) {
            warn!("Failed to set socket options for {}: {}", peer, e);
        }
        debug!("Accepted {:?} connection from {}", front_end, peer);

        let relay = self.relay.clone();
        tokio::spawn(async move {
            let result = match front_end {
                FrontEnd::Socks5 => match stream.local_addr() {
                    Ok(local) => handle_socks5(stream, peer, local, &relay).await,
                    Err(e) => Err(e.into()),
                },
                FrontEnd::Http => handle_http(stream, peer, &relay).await,
            };
            log_session_end(front_end, peer, result);
        });
    }
}

/// Accept on `listener`, or never complete when there is none
async fn accept_optional(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

fn log_session_end(front_end: FrontEnd, peer: SocketAddr, result: Result<(), RelayError>) {
    match result {
        Ok(()) => debug!("{:?} session from {} finished", front_end, peer),
        Err(RelayError::Io(e)) if is_closed_error(&e) => {
            debug!("{:?} session from {} closed: {}", front_end, peer, e)
        }
        Err(RelayError::Socks5(Socks5Error::IncompleteRequest)) => {
            debug!("{:?} session from {} ended before a full request", front_end, peer)
        }
        Err(e) => warn!("{:?} session from {} failed: {}", front_end, peer, e),
    }
}

/// Run the local proxy until `shutdown_rx` fires
pub async fn run_local(config: Config, shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
    LocalServer::bind(&config).await?.run(shutdown_rx).await
}
