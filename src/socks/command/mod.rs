//! SOCKS5 command parsing module
//!
//! Handles parsing SOCKS5 requests and building replies.

mod parser;
mod reply;

pub use parser::{read_request, Socks5Request};
pub use reply::{send_command_not_supported, send_general_failure, send_optimistic_success, send_reply};
