//! Components the IPv6 core talks to but does not implement.
//!
//! Every collaborator is handed the [`MessagePool`] together with the handle
//! it operates on, since the pool owns all message state.

use std::net::Ipv6Addr;

use crate::error::{Error, Result};
use crate::ip6::MessageInfo;
use crate::ipv6::IpProtocol;
use crate::message::{MessageHandle, MessagePool};

/// The mesh layer below the IPv6 core.
pub trait MeshForwarder {
    /// Take a datagram with all its headers in place for transmission.
    ///
    /// On success the forwarder owns the message. On error the core frees it.
    fn send_message(&mut self, pool: &mut MessagePool, message: MessageHandle) -> Result<()>;
}

/// Route resolution against the network data.
pub trait RouteLookup {
    /// The locator of the next hop towards `dst`.
    fn route_lookup(&mut self, src: &Ipv6Addr, dst: &Ipv6Addr) -> Result<u16>;
}

/// A route resolver that knows no routes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRoutes;

impl RouteLookup for NoRoutes {
    fn route_lookup(&mut self, _src: &Ipv6Addr, _dst: &Ipv6Addr) -> Result<u16> {
        Error::NoRoute.to_err()
    }
}

/// Outcome of a NAT64 translation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nat64Result {
    /// Not a NAT64 packet, deliver it unchanged.
    NotTranslated,
    /// Translation failed, drop the packet.
    Drop,
    /// The message now holds the translated packet.
    Forward,
}

/// Translates datagrams headed to the host.
pub trait Nat64Translator {
    /// Translate the message in place.
    fn translate_from_ip6(&mut self, pool: &mut MessagePool, message: MessageHandle) -> Nat64Result;
}

/// The sleepy children of a parent.
pub trait ChildTable {
    /// Bit `i` is set when sleepy child `i` subscribes to `address`.
    fn sleepy_child_mask(&self, address: &Ipv6Addr) -> u64;
}

/// Upper layer protocols (UDP, ICMPv6, TCP).
pub trait TransportHandler {
    /// Handle a datagram whose offset points at the transport header.
    ///
    /// The message is borrowed; the core frees it once this returns.
    fn handle_message(
        &mut self,
        pool: &mut MessagePool,
        message: MessageHandle,
        info: &MessageInfo,
        proto: IpProtocol,
    ) -> Result<()>;
}

/// Host side receive hook. It owns the message it is given.
pub type ReceiveCallback = dyn FnMut(&mut MessagePool, MessageHandle);
