//! Async rtnetlink plumbing for the kernel backend.
//!
//! Only the route netlink requests needed for veth pairs, link state,
//! addresses and queueing disciplines are implemented. Sockets are bound to
//! a network namespace when they are created, so requests never depend on
//! the calling thread's namespace.

pub mod attr;
pub mod builder;
pub mod connection;
pub mod link;
pub mod message;
pub mod messages;
pub mod namespace;
pub mod parse;
pub mod socket;
pub mod types;

mod addr;
mod tc;

pub use builder::MessageBuilder;
pub use connection::Connection;
pub use socket::NetlinkSocket;
pub use tc::{percent_to_prob, tick_in_usec};
