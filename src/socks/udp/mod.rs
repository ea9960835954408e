//! UDP ASSOCIATE support
//!
//! Datagram framing, the per-session NAT table and the relay loop that
//! moves datagrams between the client and the upstream server.

mod associate;
mod nat;
mod packet;
mod relay;
mod resolve;

pub use associate::handle_udp_associate;
pub use nat::{NatEntry, NatTable};
pub use packet::{encode_client_datagram, parse_client_datagram, ClientDatagram};
pub use relay::{ClientFilter, UdpSession, UdpStats};
pub use resolve::{Resolver, SystemResolver};
