//! IPv6 wire formats and address helpers.

use std::net::Ipv6Addr;

enum_sim! {
    /// Next header values handled by the core.
    pub struct IpProtocol (u8) {
        /// Hop-by-Hop Options header.
        HOPOPT = 0,

        /// TCP.
        TCP = 6,

        /// UDP.
        UDP = 17,

        /// Encapsulated IPv6 (IP-in-IP tunnel).
        IPV6 = 41,

        /// IPv6 Routing header.
        IPV6_ROUTE = 43,

        /// IPv6 Fragment header.
        IPV6_FRAG = 44,

        /// ICMPv6.
        ICMPV6 = 58,

        /// No next header.
        IPV6_NO_NXT = 59,

        /// IPv6 Destination Options header.
        IPV6_OPTS = 60,
    }
}

mod header;
pub use header::{
    Ipv6Header, HOP_LIMIT_OFFSET, IPV6_HEADER_LEN, IPV6_HEADER_TEMPLATE, NEXT_HEADER_OFFSET,
    PAYLOAD_LEN_OFFSET,
};

pub mod extentions;
pub mod options;

/// Multicast and unicast address scopes (RFC 7346).
pub mod scope {
    /// Node-local (loopback) scope.
    pub const NODE_LOCAL: u8 = 0;
    /// Interface-local scope.
    pub const INTERFACE_LOCAL: u8 = 1;
    /// Link-local scope.
    pub const LINK_LOCAL: u8 = 2;
    /// Realm-local scope.
    pub const REALM_LOCAL: u8 = 3;
    /// Admin-local scope.
    pub const ADMIN_LOCAL: u8 = 4;
    /// Site-local scope.
    pub const SITE_LOCAL: u8 = 5;
    /// Organization-local scope.
    pub const ORG_LOCAL: u8 = 8;
    /// Global scope.
    pub const GLOBAL: u8 = 14;
}

/// ff02::1
pub const LINK_LOCAL_ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
/// ff02::2
pub const LINK_LOCAL_ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);
/// ff03::1
pub const REALM_LOCAL_ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff03, 0, 0, 0, 0, 0, 0, 1);
/// ff03::2
pub const REALM_LOCAL_ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff03, 0, 0, 0, 0, 0, 0, 2);
/// ff03::fc, the destination of tunnelled MPL traffic.
pub const REALM_LOCAL_ALL_MPL_FORWARDERS: Ipv6Addr =
    Ipv6Addr::new(0xff03, 0, 0, 0, 0, 0, 0, 0xfc);

/// First locator value reserved for anycast locators.
pub const ALOC16_MASK: u8 = 0xfc;

/// Mesh specific queries on IPv6 addresses.
pub trait Ipv6AddrExt {
    /// The scope of the address.
    fn scope(&self) -> u8;

    /// fe80::/10.
    fn is_link_local_unicast(&self) -> bool;

    /// A multicast address of link-local scope.
    fn is_link_local_multicast(&self) -> bool;

    /// A multicast address of realm-local scope.
    fn is_realm_local_multicast(&self) -> bool;

    /// A multicast address of scope larger than realm-local.
    fn is_multicast_larger_than_realm_local(&self) -> bool;

    /// The interface identifier (lower 64 bits).
    fn iid(&self) -> [u8; 8];

    /// The interface identifier has the `0000:00ff:fe00:xxxx` locator form.
    fn is_locator(&self) -> bool;

    /// A routing locator.
    fn is_rloc(&self) -> bool;

    /// An anycast locator.
    fn is_aloc(&self) -> bool;

    /// The 16-bit locator carried in the last two bytes.
    fn locator16(&self) -> u16;

    /// Number of leading bits shared with `other`.
    fn prefix_match(&self, other: &Ipv6Addr) -> u8;

    /// Whether the first `prefix_len` bits equal those of `prefix`.
    fn matches_prefix(&self, prefix: &Ipv6Addr, prefix_len: u8) -> bool {
        self.prefix_match(prefix) >= prefix_len
    }
}

impl Ipv6AddrExt for Ipv6Addr {
    fn scope(&self) -> u8 {
        if self.is_multicast() {
            self.octets()[1] & 0x0f
        } else if self.is_link_local_unicast() {
            scope::LINK_LOCAL
        } else if self.is_loopback() {
            scope::NODE_LOCAL
        } else {
            scope::GLOBAL
        }
    }

    fn is_link_local_unicast(&self) -> bool {
        let octets = self.octets();
        octets[0] == 0xfe && (octets[1] & 0xc0) == 0x80
    }

    fn is_link_local_multicast(&self) -> bool {
        self.is_multicast() && self.scope() == scope::LINK_LOCAL
    }

    fn is_realm_local_multicast(&self) -> bool {
        self.is_multicast() && self.scope() == scope::REALM_LOCAL
    }

    fn is_multicast_larger_than_realm_local(&self) -> bool {
        self.is_multicast() && self.scope() > scope::REALM_LOCAL
    }

    fn iid(&self) -> [u8; 8] {
        let mut iid = [0; 8];
        iid.copy_from_slice(&self.octets()[8..16]);
        iid
    }

    fn is_locator(&self) -> bool {
        let iid = self.iid();
        iid[..6] == [0x00, 0x00, 0x00, 0xff, 0xfe, 0x00]
    }

    fn is_rloc(&self) -> bool {
        self.is_locator() && self.octets()[14] < ALOC16_MASK
    }

    fn is_aloc(&self) -> bool {
        self.is_locator() && self.octets()[14] >= ALOC16_MASK
    }

    fn locator16(&self) -> u16 {
        let octets = self.octets();
        u16::from_be_bytes([octets[14], octets[15]])
    }

    fn prefix_match(&self, other: &Ipv6Addr) -> u8 {
        let mut bits = 0;
        for (a, b) in self.octets().iter().zip(other.octets().iter()) {
            let diff = a ^ b;
            if diff == 0 {
                bits += 8;
            } else {
                bits += diff.leading_zeros() as u8;
                break;
            }
        }
        bits
    }
}

/// Build a locator address from a 64-bit prefix and a 16-bit locator.
pub fn locator_address(prefix: &[u8; 8], locator: u16) -> Ipv6Addr {
    let mut octets = [0; 16];
    octets[..8].copy_from_slice(prefix);
    octets[8..14].copy_from_slice(&[0x00, 0x00, 0x00, 0xff, 0xfe, 0x00]);
    octets[14..16].copy_from_slice(&locator.to_be_bytes());
    Ipv6Addr::from(octets)
}
