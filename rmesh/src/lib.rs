#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! The IPv6 datagram core of a low-power mesh stack.
//!
//! Packets live in a [`MessagePool`](message::MessagePool): a fixed number of
//! fixed-size buffers chained into messages. On top of the pool sit the IPv6
//! header/option codec, the MPL multicast engine, fragmentation and
//! reassembly, and the [`Ip6`](ip6::Ip6) core that decides whether a datagram
//! is received, forwarded on the mesh, or passed to the host.

#[macro_use]
mod macros;

pub mod error;
pub use error::{Error, Result};

pub mod conf;
pub mod time;

mod rand;

pub mod checksum_utils;

pub mod message;

pub mod ipv6;
pub mod icmpv6;
pub mod udp;

pub mod collab;
pub mod netif;

pub mod mpl;
pub mod fragment;

pub mod ip6;
pub use ip6::{DeviceRole, Ip6, MessageInfo};
