//! # Sockscone - Local SOCKS5 front-end for encrypted shadow tunnels
//!
//! Sockscone accepts SOCKS5 (and optionally HTTP proxy) clients on a local
//! port and relays their TCP streams and UDP datagrams through one of
//! several remote tunnel servers, encrypting everything on the way.
//!
//! ## Features
//!
//! - **Server failover**: servers that recently failed are skipped with a
//!   probability that grows with their failure count
//! - **Optimistic CONNECT**: the SOCKS5 success reply goes out before the
//!   upstream is dialed
//! - **Full UDP ASSOCIATE**: per-session NAT table, block-list and
//!   non-global target filtering, idle expiry
//! - **AEAD ciphers**: `aes-128-gcm`, `aes-256-gcm` and
//!   `chacha20-ietf-poly1305` behind the default `aead` feature
//! - **HTTP proxy**: `CONNECT` and absolute-form requests share the TCP relay
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sockscone::config::load_config;
//! use sockscone::local::run_local;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.toml")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     run_local(config, shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! SOCKS5 / HTTP client -> Sockscone -> tunnel server -> Target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod helper;
pub mod http;
pub mod local;
pub mod pool;
pub mod relay;
pub mod socks;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::{RelayError, Socks5Error};
pub use local::run_local;

/// Version of the Sockscone library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
