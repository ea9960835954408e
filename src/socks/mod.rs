//! SOCKS5 front-end
//!
//! Greeting, request parsing and dispatch to the TCP relay or the UDP
//! associate relay. Only the "no authentication" method is offered.

pub mod codec;
pub mod command;
mod consts;
mod handler;
mod handshake;
mod types;
pub mod udp;

pub use consts::*;
pub use handler::handle_socks5;
pub use handshake::negotiate;
pub use types::{SocksCommand, TargetAddr};
