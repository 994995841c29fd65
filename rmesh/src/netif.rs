//! Addresses and subscriptions of the mesh interface.

use std::net::Ipv6Addr;

use crate::error::{Error, Result};
use crate::ipv6::{
    locator_address, scope, Ipv6AddrExt, LINK_LOCAL_ALL_NODES, LINK_LOCAL_ALL_ROUTERS,
    REALM_LOCAL_ALL_MPL_FORWARDERS, REALM_LOCAL_ALL_NODES, REALM_LOCAL_ALL_ROUTERS,
};

/// Role of the device in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    /// The stack is not running.
    Disabled,
    /// Not attached to a partition.
    Detached,
    /// Attached as an end device.
    Child,
    /// A router.
    Router,
    /// The partition leader.
    Leader,
}

impl DeviceRole {
    /// Whether the device forwards mesh traffic.
    #[inline]
    pub fn is_router_or_leader(&self) -> bool {
        matches!(self, DeviceRole::Router | DeviceRole::Leader)
    }
}

/// A unicast address assigned to the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetifUnicastAddress {
    /// The address.
    pub address: Ipv6Addr,
    /// Length of the on-link prefix.
    pub prefix_len: u8,
    /// Preferred (not deprecated).
    pub preferred: bool,
    /// Scope used instead of the one derived from the address.
    pub scope_override: Option<u8>,
}

impl NetifUnicastAddress {
    /// A preferred address without a scope override.
    pub fn new(address: Ipv6Addr, prefix_len: u8) -> Self {
        Self {
            address,
            prefix_len,
            preferred: true,
            scope_override: None,
        }
    }

    /// The effective scope.
    pub fn scope(&self) -> u8 {
        self.scope_override.unwrap_or_else(|| self.address.scope())
    }
}

/// State of the mesh interface used by the IPv6 core.
#[derive(Debug, Clone)]
pub struct Netif {
    role: DeviceRole,
    rloc16: u16,
    mesh_local_prefix: [u8; 8],
    unicast: Vec<NetifUnicastAddress>,
    multicast: Vec<Ipv6Addr>,
    on_link: Vec<(Ipv6Addr, u8)>,
}

impl Netif {
    /// Create an interface holding its routing locator address and the
    /// link-local and realm-local all-nodes subscriptions.
    pub fn new(mesh_local_prefix: [u8; 8], rloc16: u16) -> Self {
        let mut rloc = NetifUnicastAddress::new(locator_address(&mesh_local_prefix, rloc16), 64);
        rloc.scope_override = Some(scope::REALM_LOCAL);

        Self {
            role: DeviceRole::Detached,
            rloc16,
            mesh_local_prefix,
            unicast: vec![rloc],
            multicast: vec![
                LINK_LOCAL_ALL_NODES,
                REALM_LOCAL_ALL_NODES,
                REALM_LOCAL_ALL_MPL_FORWARDERS,
            ],
            on_link: Vec::new(),
        }
    }

    /// The device role.
    #[inline]
    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// Change the role. Routers and leaders join the all-routers groups.
    pub(crate) fn set_role(&mut self, role: DeviceRole) {
        self.role = role;
        for group in [LINK_LOCAL_ALL_ROUTERS, REALM_LOCAL_ALL_ROUTERS] {
            let joined = self.is_multicast_subscribed(&group);
            if role.is_router_or_leader() && !joined {
                self.multicast.push(group);
            } else if !role.is_router_or_leader() && joined {
                self.multicast.retain(|a| *a != group);
            }
        }
    }

    /// Our 16-bit routing locator.
    #[inline]
    pub fn rloc16(&self) -> u16 {
        self.rloc16
    }

    /// Change the routing locator, replacing the locator address.
    pub fn set_rloc16(&mut self, rloc16: u16) {
        let old = self.rloc_address();
        let new = locator_address(&self.mesh_local_prefix, rloc16);
        for entry in self.unicast.iter_mut().filter(|e| e.address == old) {
            entry.address = new;
        }
        self.rloc16 = rloc16;
    }

    /// The routing locator address.
    pub fn rloc_address(&self) -> Ipv6Addr {
        locator_address(&self.mesh_local_prefix, self.rloc16)
    }

    /// The 64-bit mesh-local prefix.
    #[inline]
    pub fn mesh_local_prefix(&self) -> &[u8; 8] {
        &self.mesh_local_prefix
    }

    /// Whether `address` lies in the mesh-local prefix.
    pub fn is_mesh_local(&self, address: &Ipv6Addr) -> bool {
        address.octets()[..8] == self.mesh_local_prefix
    }

    /// A mesh-local routing locator.
    pub fn is_routing_locator(&self, address: &Ipv6Addr) -> bool {
        self.is_mesh_local(address) && address.is_rloc()
    }

    /// A mesh-local anycast locator.
    pub fn is_anycast_locator(&self, address: &Ipv6Addr) -> bool {
        self.is_mesh_local(address) && address.is_aloc()
    }

    /// Assigned unicast addresses.
    #[inline]
    pub fn unicast_addresses(&self) -> &[NetifUnicastAddress] {
        &self.unicast
    }

    /// Assign an address.
    pub fn add_unicast_address(&mut self, address: NetifUnicastAddress) -> Result<()> {
        if self.has_unicast_address(&address.address) {
            return Error::Already.to_err();
        }
        self.unicast.push(address);
        Ok(())
    }

    /// Remove an assigned address.
    pub fn remove_unicast_address(&mut self, address: &Ipv6Addr) -> Result<()> {
        let pos = self
            .unicast
            .iter()
            .position(|e| e.address == *address)
            .ok_or(Error::NotFound)?;
        self.unicast.remove(pos);
        Ok(())
    }

    /// Whether `address` is assigned to the interface.
    pub fn has_unicast_address(&self, address: &Ipv6Addr) -> bool {
        self.unicast.iter().any(|e| e.address == *address)
    }

    /// Join a multicast group.
    pub fn subscribe_multicast(&mut self, address: Ipv6Addr) -> Result<()> {
        if !address.is_multicast() {
            return Error::InvalidArgs.to_err();
        }
        if self.is_multicast_subscribed(&address) {
            return Error::Already.to_err();
        }
        self.multicast.push(address);
        Ok(())
    }

    /// Leave a multicast group.
    pub fn unsubscribe_multicast(&mut self, address: &Ipv6Addr) -> Result<()> {
        let pos = self
            .multicast
            .iter()
            .position(|a| a == address)
            .ok_or(Error::NotFound)?;
        self.multicast.remove(pos);
        Ok(())
    }

    /// Whether the interface listens to `address`.
    pub fn is_multicast_subscribed(&self, address: &Ipv6Addr) -> bool {
        self.multicast.contains(address)
    }

    /// Declare a prefix as on-link.
    pub fn add_on_link_prefix(&mut self, prefix: Ipv6Addr, prefix_len: u8) {
        self.on_link.push((prefix, prefix_len));
    }

    /// Whether `address` is reachable without routing: it falls in an
    /// on-link prefix or in the prefix of an assigned address.
    pub fn is_on_link(&self, address: &Ipv6Addr) -> bool {
        self.on_link
            .iter()
            .any(|(prefix, len)| address.matches_prefix(prefix, *len))
            || self
                .unicast
                .iter()
                .any(|e| e.prefix_len > 0 && address.matches_prefix(&e.address, e.prefix_len))
    }
}
