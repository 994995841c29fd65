//! The IPv6 core.
//!
//! [`Ip6`] owns the [`MessagePool`] of the stack and sits between the upper
//! layer protocols and the mesh forwarder. Every received datagram is
//! classified into three independent decisions: `receive` (deliver to the
//! transport handler), `forward_thread` (send back into the mesh) and
//! `forward_host` (pass a copy to the host). Outgoing datagrams get their
//! IPv6 header, MPL option or IP-in-IP tunnel and transport checksum here,
//! and are either fragmented or put on the send queue, which is drained by
//! [`Ip6::poll`].

use std::fmt;
use std::net::Ipv6Addr;

use crate::checksum_utils;
use crate::collab::{
    ChildTable, MeshForwarder, Nat64Result, Nat64Translator, ReceiveCallback, RouteLookup,
    TransportHandler,
};
use crate::conf::Ip6Conf;
use crate::error::{Error, Result};
use crate::fragment::{self, Reassembler, Reassembly};
use crate::icmpv6::{
    IcmpType, CODE_FRAGMENT_REASSEMBLY_EXCEEDED, ICMP_CHECKSUM_OFFSET, ICMP_HEADER_TEMPLATE,
};
use crate::ipv6::extentions::{ExtHeader, EXT_HEADER_LEN, HBH_HEADER_TEMPLATE};
use crate::ipv6::options::{Ipv6Option, OptionAction, PadOption, MPL_TYPE, PAD1_TYPE, PADN_TYPE};
use crate::ipv6::{
    scope, IpProtocol, Ipv6AddrExt, Ipv6Header, HOP_LIMIT_OFFSET, IPV6_HEADER_LEN,
    IPV6_HEADER_TEMPLATE, REALM_LOCAL_ALL_MPL_FORWARDERS,
};
use crate::message::{
    MessageHandle, MessagePool, MessageSettings, MessageType, Origin, Priority, QueueId, QueueKind,
};
use crate::mpl::Mpl;
use crate::netif::{Netif, NetifUnicastAddress};
use crate::rand::Rand;
use crate::time::Instant;
use crate::udp::{UdpHeader, UDP_CHECKSUM_OFFSET, UDP_HEADER_LEN};

pub use crate::netif::DeviceRole;

const MPL_HBH_LEN: usize = 8;

/// Header room reserved in front of every message allocated through
/// [`Ip6::new_message`]: an IPv6 header, a Hop-by-Hop header carrying the
/// MPL option and the outer header of an IP-in-IP tunnel.
pub const HEADER_RESERVE: usize = IPV6_HEADER_LEN + MPL_HBH_LEN + IPV6_HEADER_LEN;

/// Largest datagram passed to the host.
const MINIMAL_MTU: usize = 1280;

/// UDP port of the mesh link establishment protocol.
pub const MLE_PORT: u16 = 19788;

const TCP_CHECKSUM_OFFSET: usize = 16;

const FORWARD_ICMP_TYPES: [IcmpType; 6] = [
    IcmpType::DST_UNREACH,
    IcmpType::PACKET_TOO_BIG,
    IcmpType::TIME_EXCEEDED,
    IcmpType::PARAMETER_PROBLEM,
    IcmpType::ECHO_REQUEST,
    IcmpType::ECHO_REPLY,
];

const DSCP_CS0: u8 = 0x00;
const DSCP_CS1: u8 = 0x08;
const DSCP_CS2: u8 = 0x10;
const DSCP_CS3: u8 = 0x18;
const DSCP_CS4: u8 = 0x20;
const DSCP_CS_MASK: u8 = 0x38;

/// The class selector DSCP carried by datagrams of a priority.
pub fn priority_to_dscp(priority: Priority) -> u8 {
    match priority {
        Priority::Low => DSCP_CS1,
        Priority::Normal | Priority::Net => DSCP_CS0,
        Priority::High => DSCP_CS4,
    }
}

/// The priority of a datagram carrying `dscp`.
pub fn dscp_to_priority(dscp: u8) -> Priority {
    match dscp & DSCP_CS_MASK {
        DSCP_CS1 | DSCP_CS2 => Priority::Low,
        DSCP_CS0 | DSCP_CS3 => Priority::Normal,
        _ => Priority::High,
    }
}

// Offset of the checksum within the transport header of `proto`.
fn checksum_field(proto: IpProtocol) -> Option<usize> {
    match proto {
        IpProtocol::UDP => Some(UDP_CHECKSUM_OFFSET),
        IpProtocol::ICMPV6 => Some(ICMP_CHECKSUM_OFFSET),
        IpProtocol::TCP => Some(TCP_CHECKSUM_OFFSET),
        _ => None,
    }
}

fn is_anycast_service_locator(address: &Ipv6Addr) -> bool {
    address.is_aloc() && (0xfc10..=0xfc2f).contains(&address.locator16())
}

/// Addressing of a datagram, from the point of view of this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageInfo {
    /// Local address. Unspecified or multicast lets the core pick a source.
    pub sock_addr: Ipv6Addr,
    /// Remote address.
    pub peer_addr: Ipv6Addr,
    /// Hop limit; zero selects the default unless `allow_zero_hop_limit`.
    pub hop_limit: u8,
    /// Send with a hop limit of zero when `hop_limit` is zero.
    pub allow_zero_hop_limit: bool,
    /// ECN bits of the traffic class.
    pub ecn: u8,
    /// Loop multicast datagrams back to local receivers.
    pub multicast_loop: bool,
}

impl MessageInfo {
    /// Information for a datagram to `peer_addr` with everything else left
    /// to the core.
    pub fn new(peer_addr: Ipv6Addr) -> Self {
        Self {
            sock_addr: Ipv6Addr::UNSPECIFIED,
            peer_addr,
            hop_limit: 0,
            allow_zero_hop_limit: false,
            ecn: 0,
            multicast_loop: false,
        }
    }
}

impl Default for MessageInfo {
    fn default() -> Self {
        Self::new(Ipv6Addr::UNSPECIFIED)
    }
}

/// The IPv6 core of a mesh node.
pub struct Ip6 {
    conf: Ip6Conf,
    pool: MessagePool,
    netif: Netif,
    mpl: Mpl,
    reassembler: Reassembler,
    rand: Rand,
    send_queue: QueueId,
    send_task_posted: bool,
    now: Instant,

    forwarder: Box<dyn MeshForwarder>,
    route_lookup: Option<Box<dyn RouteLookup>>,
    nat64: Option<Box<dyn Nat64Translator>>,
    child_table: Option<Box<dyn ChildTable>>,
    transport: Option<Box<dyn TransportHandler>>,
    receive_callback: Option<Box<ReceiveCallback>>,
}

impl fmt::Debug for Ip6 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ip6")
            .field("conf", &self.conf)
            .field("netif", &self.netif)
            .field("pool", &self.pool)
            .field("mpl", &self.mpl)
            .field("reassembler", &self.reassembler)
            .field("send_task_posted", &self.send_task_posted)
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}

impl Ip6 {
    /// Build the core around `pool`. Datagrams leave through `forwarder`.
    pub fn new(
        mut pool: MessagePool,
        netif: Netif,
        conf: Ip6Conf,
        forwarder: Box<dyn MeshForwarder>,
    ) -> Self {
        let send_queue = pool.new_queue(QueueKind::Priority);
        let mpl = Mpl::new(&mut pool, &conf);
        let reassembler = Reassembler::new(&conf, HEADER_RESERVE);

        let mut ip6 = Self {
            conf,
            pool,
            netif,
            mpl,
            reassembler,
            rand: Rand::new(conf.rand_seed),
            send_queue,
            send_task_posted: false,
            now: Instant::ZERO,
            forwarder,
            route_lookup: None,
            nat64: None,
            child_table: None,
            transport: None,
            receive_callback: None,
        };
        let role = ip6.netif.role();
        ip6.set_device_role(role);
        ip6
    }

    /// The configuration.
    #[inline]
    pub fn conf(&self) -> &Ip6Conf {
        &self.conf
    }

    /// The message pool.
    #[inline]
    pub fn pool(&self) -> &MessagePool {
        &self.pool
    }

    /// The message pool, for upper layers building messages.
    #[inline]
    pub fn pool_mut(&mut self) -> &mut MessagePool {
        &mut self.pool
    }

    /// The interface state.
    #[inline]
    pub fn netif(&self) -> &Netif {
        &self.netif
    }

    /// The interface state, for address management.
    #[inline]
    pub fn netif_mut(&mut self) -> &mut Netif {
        &mut self.netif
    }

    /// The MPL engine.
    #[inline]
    pub fn mpl(&self) -> &Mpl {
        &self.mpl
    }

    /// The reassembly list.
    #[inline]
    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    /// Number of datagrams waiting in the send queue.
    pub fn send_queue_len(&self) -> usize {
        self.pool.queue_len(self.send_queue)
    }

    /// The instant passed to the last [`poll`](Ip6::poll).
    #[inline]
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Change the device role. The role decides whether mesh traffic is
    /// forwarded and how often MPL retransmits.
    pub fn set_device_role(&mut self, role: DeviceRole) {
        self.netif.set_role(role);
        let expirations = match role {
            DeviceRole::Router | DeviceRole::Leader => self.conf.mpl_router_timer_expirations,
            DeviceRole::Child => self.conf.mpl_child_timer_expirations,
            DeviceRole::Disabled | DeviceRole::Detached => 0,
        };
        self.mpl.set_timer_expirations(expirations);
    }

    /// Install the route resolver.
    pub fn set_route_lookup(&mut self, route_lookup: Box<dyn RouteLookup>) {
        self.route_lookup = Some(route_lookup);
    }

    /// Install a NAT64 translator for traffic passed to the host.
    pub fn set_nat64_translator(&mut self, nat64: Box<dyn Nat64Translator>) {
        self.nat64 = Some(nat64);
    }

    /// Install the table of sleepy children.
    pub fn set_child_table(&mut self, child_table: Box<dyn ChildTable>) {
        self.child_table = Some(child_table);
    }

    /// Install the transport protocol dispatcher.
    pub fn set_transport_handler(&mut self, transport: Box<dyn TransportHandler>) {
        self.transport = Some(transport);
    }

    /// Install the host receive hook. Datagrams are only passed to the host
    /// while one is installed.
    pub fn set_receive_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut MessagePool, MessageHandle) + 'static,
    {
        self.receive_callback = Some(Box::new(callback));
    }

    /// Remove the host receive hook.
    pub fn clear_receive_callback(&mut self) {
        self.receive_callback = None;
    }

    /// Filter locator, echo request and link-local MLE traffic from the host.
    pub fn set_receive_filter(&mut self, enabled: bool) {
        self.conf.receive_filter = enabled;
    }

    /// Allocate a message for an upper layer, with room for every header
    /// the core may put in front of it plus `reserve` bytes.
    pub fn new_message(&mut self, reserve: usize, settings: MessageSettings) -> Result<MessageHandle> {
        self.pool
            .allocate(MessageType::Ip6, HEADER_RESERVE + reserve, settings)
    }

    /// Send a transport payload.
    ///
    /// The message offset must point at the transport header. On success
    /// the core owns the message; on error it stays with the caller as it
    /// was passed in and no copy of it has been sent.
    pub fn send_datagram(
        &mut self,
        message: MessageHandle,
        info: &MessageInfo,
        proto: IpProtocol,
    ) -> Result<()> {
        let (payload_len, priority, offset, reserved) = {
            let m = self.pool.get(message);
            (m.length(), m.priority(), m.offset(), m.reserved())
        };

        let mut header = IPV6_HEADER_TEMPLATE;
        header.set_dscp(priority_to_dscp(priority));
        header.set_ecn(info.ecn);
        header.set_next_header(proto);
        if info.hop_limit != 0 || info.allow_zero_hop_limit {
            header.set_hop_limit(info.hop_limit);
        } else {
            header.set_hop_limit(self.conf.default_hop_limit);
        }

        if info.sock_addr.is_unspecified() || info.sock_addr.is_multicast() {
            let src = self
                .select_source_address(info)
                .ok_or(Error::InvalidSourceAddress)?;
            header.set_src_addr(&src);
        } else {
            header.set_src_addr(&info.sock_addr);
        }
        header.set_dst_addr(&info.peer_addr);

        let tunnel_src = if info.peer_addr.is_multicast_larger_than_realm_local() {
            let tunnel_info = MessageInfo::new(REALM_LOCAL_ALL_MPL_FORWARDERS);
            Some(
                self.select_source_address(&tunnel_info)
                    .ok_or(Error::InvalidSourceAddress)?,
            )
        } else {
            None
        };

        let mut headers_len = IPV6_HEADER_LEN;
        if info.peer_addr.is_realm_local_multicast() {
            headers_len += MPL_HBH_LEN;
        }
        if tunnel_src.is_some() {
            headers_len += IPV6_HEADER_LEN + MPL_HBH_LEN;
        }
        if payload_len + headers_len - IPV6_HEADER_LEN > u16::MAX as usize {
            return Error::InvalidArgs.to_err();
        }
        if reserved < headers_len {
            return Error::NoBufs.to_err();
        }
        if !self.conf.fragmentation && payload_len + headers_len > self.conf.link_mtu {
            return Error::InvalidArgs.to_err();
        }
        header.set_payload_len(payload_len as u16);

        let checksum = checksum_field(proto).and_then(|field| {
            let saved = self.pool.get(message).read_array::<2>(offset + field).ok()?;
            Some((offset + field, saved))
        });
        let sequence = self.mpl.sequence();

        let res = self.build_and_enqueue(message, info, proto, header, tunnel_src);
        if res.is_err() {
            let added = self.pool.get(message).length() - payload_len;
            let mut m = self.pool.get_mut(message);
            m.remove_header(added);
            m.set_offset(offset);
            if let Some((pos, saved)) = checksum {
                m.write(pos, &saved);
            }
            self.mpl.rewind_sequence(sequence);
        }
        res
    }

    // Put the headers in front of a transport payload and queue the result.
    // Nothing leaves the core unless the datagram is queued.
    fn build_and_enqueue(
        &mut self,
        message: MessageHandle,
        info: &MessageInfo,
        proto: IpProtocol,
        mut header: Ipv6Header<[u8; IPV6_HEADER_LEN]>,
        tunnel_src: Option<Ipv6Addr>,
    ) -> Result<()> {
        if info.peer_addr.is_realm_local_multicast() {
            self.add_mpl_option(message, &mut header)?;
        }

        self.pool.get_mut(message).prepend(header.header_slice())?;
        self.update_checksum(message, &header.src_addr(), &header.dst_addr(), proto);

        let mut sleepy_copy = None;
        if let Some(src) = tunnel_src {
            sleepy_copy = self.sleepy_child_copy(message, &info.peer_addr);
            if let Err(err) = self.add_tunneled_mpl_option(message, &header, &src) {
                self.discard_sleepy_child_copy(sleepy_copy);
                return Err(err);
            }
        }

        self.pool
            .get_mut(message)
            .set_multicast_loop(info.multicast_loop);
        match self.enqueue_or_fragment(message) {
            Ok(()) => {
                if let Some((copy, mask)) = sleepy_copy {
                    self.send_to_sleepy_children(copy, mask);
                }
                Ok(())
            }
            Err(err) => {
                self.discard_sleepy_child_copy(sleepy_copy);
                Err(err)
            }
        }
    }

    /// Send a complete IPv6 datagram supplied by the host. The message is
    /// consumed in every case.
    pub fn send_raw(&mut self, message: MessageHandle) -> Result<()> {
        let header = match Ipv6Header::parse_from_message(&self.pool.get(message)) {
            Ok(header) => header,
            Err(err) => {
                self.pool.free(message);
                return Err(err);
            }
        };

        if header.src_addr().is_multicast() {
            self.pool.free(message);
            return Error::InvalidSourceAddress.to_err();
        }

        self.pool
            .get_mut(message)
            .set_priority(dscp_to_priority(header.dscp()));

        if header.dst_addr().is_multicast() {
            if let Err(err) = self.insert_mpl_option(message, header) {
                net_warn!("cannot add MPL option to raw datagram: {}", err);
                self.pool.free(message);
                return Err(err);
            }
        }

        self.handle_datagram(message, false)
    }

    /// Process a datagram. Messages whose origin is
    /// [`Origin::ThreadNetif`] were received from the mesh; any other
    /// message is locally originated.
    ///
    /// The message is consumed in every case.
    pub fn handle_datagram(&mut self, message: MessageHandle, is_reassembled: bool) -> Result<()> {
        let from_thread_netif = self.pool.get(message).origin() == Origin::ThreadNetif;

        match self.process_datagram(message, from_thread_netif, is_reassembled) {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.pool.free(message);
                Ok(())
            }
            Err(err) => {
                self.pool.free(message);
                match err {
                    Error::Parse => {
                        net_warn!("dropping malformed datagram");
                        Error::Drop.to_err()
                    }
                    err => {
                        net_debug!("datagram not processed: {}", err);
                        Err(err)
                    }
                }
            }
        }
    }

    /// Pick the source address for a datagram to `info.peer_addr`.
    ///
    /// An exact match wins. Otherwise candidates are compared on
    /// appropriate scope, then preference, then the longest matching
    /// prefix, then whether they are routing locators like the
    /// destination.
    pub fn select_source_address(&self, info: &MessageInfo) -> Option<Ipv6Addr> {
        let dst = info.peer_addr;
        let dst_scope = dst.scope();
        let dst_is_rloc = self.netif.is_routing_locator(&dst);
        let addresses = self.netif.unicast_addresses();

        if let Some(exact) = addresses.iter().find(|a| a.address == dst) {
            return Some(exact.address);
        }

        let mut best: Option<(&NetifUnicastAddress, u8)> = None;
        for candidate in addresses {
            if self.netif.is_anycast_locator(&candidate.address) {
                continue;
            }

            let mut matched = dst.prefix_match(&candidate.address);
            let override_scope = if matched >= candidate.prefix_len {
                matched = candidate.prefix_len;
                candidate.scope()
            } else {
                dst_scope
            };

            let better = match best {
                None => true,
                Some((current, current_len)) => {
                    if candidate.scope() < current.scope() {
                        candidate.scope() >= override_scope
                    } else if candidate.scope() > current.scope() {
                        current.scope() < override_scope
                    } else if candidate.preferred != current.preferred {
                        candidate.preferred
                    } else if matched > current_len {
                        true
                    } else {
                        matched == current_len
                            && dst_is_rloc == self.netif.is_routing_locator(&candidate.address)
                    }
                }
            };
            if better {
                best = Some((candidate, matched));
            }
        }
        best.map(|(address, _)| address.address)
    }

    /// Run deferred work: MPL and reassembly timers, then the send queue.
    /// Returns whether anything was done.
    pub fn poll(&mut self, now: Instant) -> bool {
        self.now = now;
        let mut did_something = false;

        if self
            .mpl
            .poll(&mut self.pool, &mut self.rand, now, self.send_queue)
        {
            self.send_task_posted = true;
        }

        for expired in self.reassembler.poll(&mut self.pool, now) {
            if let Err(err) = self.send_icmp_error(
                expired,
                IcmpType::TIME_EXCEEDED,
                CODE_FRAGMENT_REASSEMBLY_EXCEEDED,
            ) {
                net_debug!("no time exceeded error sent: {}", err);
            }
            self.pool.free(expired);
            did_something = true;
        }

        if self.send_task_posted {
            did_something |= self.handle_send_queue();
        }
        did_something
    }

    /// When [`poll`](Ip6::poll) should run next; `None` when idle.
    pub fn poll_at(&self) -> Option<Instant> {
        if self.send_task_posted {
            return Some(self.now);
        }
        match (self.mpl.poll_at(), self.reassembler.poll_at()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Answer `message` with an ICMPv6 error carrying its IPv6 header.
    ///
    /// ICMPv6 errors and datagrams without a unicast source are never
    /// answered. The caller keeps `message`.
    pub fn send_icmp_error(&mut self, message: MessageHandle, icmp_type: IcmpType, code: u8) -> Result<()> {
        let (header, inner_type) = {
            let m = self.pool.get(message);
            let header = Ipv6Header::parse_unchecked(m.read_array::<IPV6_HEADER_LEN>(0)?);
            let inner_type = match header.next_header() {
                IpProtocol::ICMPV6 => m.read_u8(IPV6_HEADER_LEN).ok().map(IcmpType::from),
                _ => None,
            };
            (header, inner_type)
        };

        let src = header.src_addr();
        if src.is_multicast() || src.is_unspecified() || inner_type.map_or(false, |t| t.is_error()) {
            return Error::Drop.to_err();
        }

        let reply = self.new_message(0, MessageSettings::default())?;
        let mut icmp = ICMP_HEADER_TEMPLATE;
        icmp.set_icmp_type(icmp_type);
        icmp.set_code(code);

        let mut info = MessageInfo::new(src);
        info.sock_addr = header.dst_addr();

        let res = {
            let mut m = self.pool.get_mut(reply);
            m.append(icmp.header_slice())
                .and_then(|_| m.append(header.header_slice()))
        };
        if let Err(err) = res.and_then(|_| self.send_datagram(reply, &info, IpProtocol::ICMPV6)) {
            self.pool.free(reply);
            return Err(err);
        }
        net_debug!("sent icmp type {} code {} to {}", icmp_type.raw(), code, src);
        Ok(())
    }

    fn handle_send_queue(&mut self) -> bool {
        self.send_task_posted = false;
        let mut sent = false;

        while let Some(message) = self.pool.queue_head(self.send_queue) {
            self.pool.dequeue(message);
            if let Err(err) = self.handle_datagram(message, false) {
                net_debug!("queued datagram dropped: {}", err);
            }
            sent = true;
        }
        sent
    }

    fn enqueue_or_fragment(&mut self, message: MessageHandle) -> Result<()> {
        let len = self.pool.get(message).length();
        if len > self.conf.link_mtu {
            if !self.conf.fragmentation {
                return Error::InvalidArgs.to_err();
            }
            let res = fragment::fragment_datagram(
                &mut self.pool,
                &mut self.rand,
                message,
                self.conf.link_mtu,
                HEADER_RESERVE,
                self.send_queue,
            );
            if let Err(err) = res {
                // Fragments queued before the failure still go out.
                if self.send_queue_len() > 0 {
                    self.send_task_posted = true;
                }
                return Err(err);
            }
        } else {
            self.pool.enqueue(self.send_queue, message);
        }
        self.send_task_posted = true;
        Ok(())
    }

    fn update_checksum(&mut self, message: MessageHandle, src: &Ipv6Addr, dst: &Ipv6Addr, proto: IpProtocol) {
        let field = match checksum_field(proto) {
            Some(field) => field,
            None => return,
        };
        let (offset, len) = {
            let m = self.pool.get(message);
            (m.offset(), m.length() - m.offset())
        };
        if len < field + 2 {
            return;
        }

        self.pool.get_mut(message).write(offset + field, &[0, 0]);
        let sum = {
            let m = self.pool.get(message);
            checksum_utils::combine(&[
                checksum_utils::pseudo_header(src, dst, proto, len as u32),
                checksum_utils::from_buf(m.cursor_at(offset, len), len),
            ])
        };
        let mut checksum = !sum;
        if proto == IpProtocol::UDP && checksum == 0 {
            checksum = 0xffff;
        }
        self.pool
            .get_mut(message)
            .write(offset + field, &checksum.to_be_bytes());
    }

    // Put a Hop-by-Hop header holding a fresh MPL option in front of the
    // message and account for it in `header`.
    fn add_mpl_option(&mut self, message: MessageHandle, header: &mut Ipv6Header<[u8; IPV6_HEADER_LEN]>) -> Result<()> {
        let option = self.mpl.init_option(&header.src_addr(), self.netif.rloc16());

        let mut hbh_header = HBH_HEADER_TEMPLATE;
        hbh_header.set_next_header(header.next_header());
        hbh_header.set_len(0);

        let mut hbh = [0; MPL_HBH_LEN];
        hbh[..EXT_HEADER_LEN].copy_from_slice(hbh_header.header_slice());
        let mut pos = EXT_HEADER_LEN;
        hbh[pos..pos + option.size()].copy_from_slice(option.as_bytes());
        pos += option.size();
        if let Ok(pad) = PadOption::to_pad_header_with_size(pos) {
            hbh[pos..pos + pad.size()].copy_from_slice(pad.as_bytes());
        }

        let payload_len = header
            .payload_len()
            .checked_add(MPL_HBH_LEN as u16)
            .ok_or(Error::InvalidArgs)?;
        self.pool.get_mut(message).prepend(&hbh)?;
        header.set_payload_len(payload_len);
        header.set_next_header(IpProtocol::HOPOPT);
        Ok(())
    }

    // Wrap the datagram in an IP-in-IP tunnel to the realm-local all MPL
    // forwarders group, the outer header carrying the MPL option.
    fn add_tunneled_mpl_option(
        &mut self,
        message: MessageHandle,
        inner: &Ipv6Header<[u8; IPV6_HEADER_LEN]>,
        src: &Ipv6Addr,
    ) -> Result<()> {
        let payload_len = inner
            .payload_len()
            .checked_add(IPV6_HEADER_LEN as u16)
            .ok_or(Error::InvalidArgs)?;

        let mut tunnel = IPV6_HEADER_TEMPLATE;
        tunnel.set_hop_limit(self.conf.default_hop_limit);
        tunnel.set_payload_len(payload_len);
        tunnel.set_next_header(IpProtocol::IPV6);
        tunnel.set_src_addr(src);
        tunnel.set_dst_addr(&REALM_LOCAL_ALL_MPL_FORWARDERS);

        self.add_mpl_option(message, &mut tunnel)?;
        self.pool.get_mut(message).prepend(tunnel.header_slice())
    }

    // Add MPL to a complete multicast datagram: in place for realm-local
    // destinations, through a tunnel for larger scopes.
    fn insert_mpl_option(&mut self, message: MessageHandle, mut header: Ipv6Header<[u8; IPV6_HEADER_LEN]>) -> Result<()> {
        let dst = header.dst_addr();
        if !dst.is_multicast() || dst.scope() < scope::REALM_LOCAL {
            return Ok(());
        }

        if !dst.is_realm_local_multicast() {
            let info = MessageInfo::new(REALM_LOCAL_ALL_MPL_FORWARDERS);
            let src = self
                .select_source_address(&info)
                .ok_or(Error::InvalidSourceAddress)?;
            if let Some((copy, mask)) = self.sleepy_child_copy(message, &dst) {
                self.send_to_sleepy_children(copy, mask);
            }
            return self.add_tunneled_mpl_option(message, &header, &src);
        }

        if header.next_header() == IpProtocol::HOPOPT {
            let mut hbh = ExtHeader::parse_unchecked(
                self.pool
                    .get(message)
                    .read_array::<EXT_HEADER_LEN>(IPV6_HEADER_LEN)?,
            );
            let hbh_size = hbh.size();
            if hbh_size > header.payload_len() as usize {
                return Error::Parse.to_err();
            }
            // A Hop-by-Hop header already at its largest size has no room left.
            let hbh_len = hbh.len().checked_add(1).ok_or(Error::InvalidArgs)?;
            let payload_len = header
                .payload_len()
                .checked_add(MPL_HBH_LEN as u16)
                .ok_or(Error::InvalidArgs)?;
            hbh.set_len(hbh_len);

            self.pool.get_mut(message).remove_header(IPV6_HEADER_LEN);

            let option = self.mpl.init_option(&header.src_addr(), self.netif.rloc16());
            let mut m = self.pool.get_mut(message);
            m.write(0, hbh.header_slice());
            m.insert_header(hbh_size, MPL_HBH_LEN)?;
            m.write(hbh_size, option.as_bytes());
            if let Ok(pad) = PadOption::to_pad_header_with_size(option.size()) {
                m.write(hbh_size + option.size(), pad.as_bytes());
            }
            header.set_payload_len(payload_len);
        } else {
            self.pool.get_mut(message).remove_header(IPV6_HEADER_LEN);
            self.add_mpl_option(message, &mut header)?;
        }

        self.pool.get_mut(message).prepend(header.header_slice())
    }

    fn sleepy_child_mask(&self, address: &Ipv6Addr) -> u64 {
        self.child_table
            .as_ref()
            .map_or(0, |table| table.sleepy_child_mask(address))
    }

    // Copy a multicast datagram for the sleepy children subscribed to `dst`,
    // together with their mask. The copy is not marked yet.
    fn sleepy_child_copy(&mut self, message: MessageHandle, dst: &Ipv6Addr) -> Option<(MessageHandle, u64)> {
        let mask = self.sleepy_child_mask(dst);
        if mask == 0 {
            return None;
        }

        match self.pool.clone_full(message) {
            Ok(copy) => Some((copy, mask)),
            Err(err) => {
                net_warn!("no copy of multicast datagram for sleepy children: {}", err);
                None
            }
        }
    }

    fn discard_sleepy_child_copy(&mut self, copy: Option<(MessageHandle, u64)>) {
        if let Some((copy, _)) = copy {
            self.pool.free(copy);
        }
    }

    // Hand a copy marked for every child in `mask` to the forwarder for
    // indirect transmission.
    fn send_to_sleepy_children(&mut self, copy: MessageHandle, mask: u64) {
        let children: Vec<u8> = (0..64).filter(|i| mask & (1 << i) != 0).collect();
        for &child in &children {
            self.pool.set_child(copy, child);
        }

        match self.forwarder.send_message(&mut self.pool, copy) {
            Ok(()) => net_info!("multicast copy for {} sleepy children", children.len()),
            Err(err) => {
                net_warn!("forwarder refused sleepy child copy: {}", err);
                self.pool.free(copy);
                for child in children {
                    self.pool.clear_child(copy, child);
                }
            }
        }
    }

    fn lookup_route(&mut self, src: &Ipv6Addr, dst: &Ipv6Addr) -> Result<u16> {
        match self.route_lookup.as_mut() {
            Some(route_lookup) => route_lookup.route_lookup(src, dst),
            None => Error::NoRoute.to_err(),
        }
    }

    // Returns whether the message was handed to the forwarder.
    fn process_datagram(
        &mut self,
        message: MessageHandle,
        from_thread_netif: bool,
        is_reassembled: bool,
    ) -> Result<bool> {
        loop {
            let header = Ipv6Header::parse_from_message(&self.pool.get(message))?;
            if !header.is_valid(self.conf.max_datagram_len()) {
                return Error::Parse.to_err();
            }
            let src = header.src_addr();
            let dst = header.dst_addr();

            let mut receive = false;
            let mut forward_thread = false;
            let mut forward_host = false;

            if dst.is_multicast() {
                forward_thread = !from_thread_netif
                    || (dst.is_multicast_larger_than_realm_local() && self.sleepy_child_mask(&dst) != 0);
                forward_host = true;
                receive = (from_thread_netif || self.pool.get(message).multicast_loop())
                    && self.netif.is_multicast_subscribed(&dst);
            } else if self.netif.has_unicast_address(&dst) {
                receive = true;
            } else if !from_thread_netif || !dst.is_link_local_unicast() {
                forward_thread = dst.is_link_local_unicast()
                    || self.netif.is_on_link(&dst)
                    || self.lookup_route(&src, &dst).is_ok();
                forward_host = !forward_thread;
            }

            self.pool.get_mut(message).set_offset(IPV6_HEADER_LEN);
            let next_header =
                self.handle_extension_headers(message, &header, from_thread_netif, &mut receive)?;

            if receive && next_header == IpProtocol::IPV6 {
                let offset = self.pool.get(message).offset();
                self.pool.get_mut(message).remove_header(offset);
                net_trace!("decapsulating datagram tunnelled from {}", src);
                continue;
            }

            if (forward_host || receive) && !is_reassembled {
                if let Err(err) = self.pass_to_host(message, &header, next_header, receive, from_thread_netif) {
                    net_trace!("not passed to host: {}", err);
                }
            }

            let payload_res = if receive {
                let offset = self.pool.get(message).offset();
                let info = MessageInfo {
                    sock_addr: dst,
                    peer_addr: src,
                    hop_limit: header.hop_limit(),
                    allow_zero_hop_limit: false,
                    ecn: header.ecn(),
                    multicast_loop: self.pool.get(message).multicast_loop(),
                };
                let res = self.handle_payload(message, &info, next_header, forward_thread || forward_host);
                self.pool.get_mut(message).set_offset(offset);
                res
            } else {
                Ok(())
            };

            if !forward_thread {
                return payload_res.map(|_| false);
            }

            let mut hop_limit = header.hop_limit();
            if from_thread_netif {
                if !self.netif.role().is_router_or_leader() {
                    return payload_res.map(|_| false);
                }
                hop_limit = hop_limit.saturating_sub(1);
            }
            if hop_limit == 0 {
                return Error::Drop.to_err();
            }
            self.pool.get_mut(message).write_u8(HOP_LIMIT_OFFSET, hop_limit);

            if next_header == IpProtocol::ICMPV6 {
                let offset = self.pool.get(message).offset();
                let icmp_type = IcmpType::from(self.pool.get(message).read_u8(offset)?);
                if !FORWARD_ICMP_TYPES.contains(&icmp_type) {
                    return Error::Drop.to_err();
                }
            }

            self.forwarder.send_message(&mut self.pool, message)?;
            return payload_res.map(|_| true);
        }
    }

    // Walk the extension headers while the datagram is for us, or while a
    // Hop-by-Hop header is in front. Returns the protocol found behind them.
    fn handle_extension_headers(
        &mut self,
        message: MessageHandle,
        header: &Ipv6Header<[u8; IPV6_HEADER_LEN]>,
        from_thread_netif: bool,
        receive: &mut bool,
    ) -> Result<IpProtocol> {
        let src = header.src_addr();
        let mut next_header = header.next_header();

        while *receive || next_header == IpProtocol::HOPOPT {
            let offset = self.pool.get(message).offset();
            match next_header {
                IpProtocol::HOPOPT | IpProtocol::IPV6_OPTS => {
                    let ext = ExtHeader::parse_unchecked(
                        self.pool.get(message).read_array::<EXT_HEADER_LEN>(offset)?,
                    );
                    self.handle_options(message, &src, !from_thread_netif, receive)?;
                    next_header = ext.next_header();
                }
                IpProtocol::IPV6_FRAG => {
                    // Our own fragments are forwarded as they are, never looped back.
                    if !from_thread_netif {
                        *receive = false;
                        break;
                    }
                    let ext = ExtHeader::parse_unchecked(
                        self.pool.get(message).read_array::<EXT_HEADER_LEN>(offset)?,
                    );
                    if let Err(err) =
                        self.pass_to_host(message, header, next_header, *receive, from_thread_netif)
                    {
                        net_trace!("fragment not passed to host: {}", err);
                    }

                    // Rejected fragments are dropped; the reassembler logs why.
                    match self
                        .reassembler
                        .handle_fragment(&mut self.pool, self.now, message)
                    {
                        Ok(Reassembly::Atomic) => next_header = ext.next_header(),
                        Ok(Reassembly::Pending) | Err(_) => return Error::Drop.to_err(),
                        Ok(Reassembly::Complete(assembled)) => {
                            if let Err(err) = self.handle_datagram(assembled, true) {
                                net_debug!("reassembled datagram dropped: {}", err);
                            }
                            return Error::Drop.to_err();
                        }
                    }
                }
                IpProtocol::IPV6_ROUTE | IpProtocol::IPV6_NO_NXT => return Error::Drop.to_err(),
                _ => break,
            }
        }
        Ok(next_header)
    }

    fn handle_options(
        &mut self,
        message: MessageHandle,
        src: &Ipv6Addr,
        is_outbound: bool,
        receive: &mut bool,
    ) -> Result<()> {
        let (offset, end) = {
            let m = self.pool.get(message);
            let ext = ExtHeader::parse_unchecked(m.read_array::<EXT_HEADER_LEN>(m.offset())?);
            let end = m.offset() + ext.size();
            if end > m.length() {
                return Error::Parse.to_err();
            }
            (m.offset(), end)
        };

        let mut cur = offset + EXT_HEADER_LEN;
        while cur < end {
            let option = Ipv6Option::parse_from(&self.pool.get(message), cur, end)?;
            match option.option_type() {
                PAD1_TYPE | PADN_TYPE => {}
                MPL_TYPE => {
                    let deliver = self.mpl.process_option(
                        &mut self.pool,
                        &mut self.rand,
                        self.now,
                        message,
                        cur,
                        src,
                        is_outbound,
                    )?;
                    if !deliver {
                        *receive = false;
                    }
                }
                _ => {
                    if option.action() != OptionAction::Skip {
                        return Error::Drop.to_err();
                    }
                }
            }
            cur += option.size();
        }

        self.pool.get_mut(message).set_offset(end);
        Ok(())
    }

    fn handle_payload(
        &mut self,
        message: MessageHandle,
        info: &MessageInfo,
        proto: IpProtocol,
        keep_original: bool,
    ) -> Result<()> {
        if self.transport.is_none() {
            return Ok(());
        }
        let target = if keep_original {
            self.pool.clone_full(message)?
        } else {
            message
        };

        let res = match self.transport.as_mut() {
            Some(transport) => transport.handle_message(&mut self.pool, target, info, proto),
            None => Ok(()),
        };
        if keep_original {
            self.pool.free(target);
        }
        res
    }

    // Give the host a copy of a datagram received from the mesh.
    fn pass_to_host(
        &mut self,
        message: MessageHandle,
        header: &Ipv6Header<[u8; IPV6_HEADER_LEN]>,
        proto: IpProtocol,
        receive: bool,
        from_thread_netif: bool,
    ) -> Result<()> {
        if !from_thread_netif || self.receive_callback.is_none() {
            return Error::NoRoute.to_err();
        }

        let (length, offset) = {
            let m = self.pool.get(message);
            (m.length(), m.offset())
        };
        if length > MINIMAL_MTU {
            return Error::Drop.to_err();
        }
        if self.netif.is_mesh_local(&header.src_addr()) && !receive {
            return Error::Drop.to_err();
        }

        if self.conf.receive_filter {
            let dst = header.dst_addr();
            if dst.is_locator() && !is_anycast_service_locator(&dst) {
                return Error::Drop.to_err();
            }
            match proto {
                IpProtocol::ICMPV6 => {
                    let icmp_type = self.pool.get(message).read_u8(offset).map(IcmpType::from);
                    if icmp_type == Ok(IcmpType::ECHO_REQUEST) {
                        return Error::Drop.to_err();
                    }
                }
                IpProtocol::UDP => {
                    if let Ok(buf) = self.pool.get(message).read_array::<UDP_HEADER_LEN>(offset) {
                        let udp = UdpHeader::parse_unchecked(buf);
                        if udp.dst_port() == MLE_PORT
                            && (dst.is_link_local_unicast() || dst.is_link_local_multicast())
                        {
                            return Error::Drop.to_err();
                        }
                    }
                }
                _ => {}
            }
        }

        let copy = self.pool.clone_full(message)?;
        if let Err(err) = self.remove_mpl_option(copy) {
            self.pool.free(copy);
            return Err(err);
        }

        if let Some(nat64) = self.nat64.as_mut() {
            match nat64.translate_from_ip6(&mut self.pool, copy) {
                Nat64Result::NotTranslated | Nat64Result::Forward => {}
                Nat64Result::Drop => {
                    self.pool.free(copy);
                    return Error::Drop.to_err();
                }
            }
        }

        match self.receive_callback.as_mut() {
            Some(callback) => {
                callback(&mut self.pool, copy);
                Ok(())
            }
            None => {
                self.pool.free(copy);
                Error::NoRoute.to_err()
            }
        }
    }

    /// Strip the MPL option from a datagram bound for the host: the whole
    /// Hop-by-Hop header when MPL is its only option, its last eight bytes
    /// when MPL sits there, otherwise the option is overwritten by PadN.
    pub fn remove_mpl_option(&mut self, message: MessageHandle) -> Result<()> {
        let (mut header, hbh, end, mpl) = {
            let m = self.pool.get(message);
            let header = Ipv6Header::parse_unchecked(m.read_array::<IPV6_HEADER_LEN>(0)?);
            if header.next_header() != IpProtocol::HOPOPT {
                return Ok(());
            }
            let hbh = ExtHeader::parse_unchecked(m.read_array::<EXT_HEADER_LEN>(IPV6_HEADER_LEN)?);
            let end = IPV6_HEADER_LEN + hbh.size();
            if m.length() < end {
                return Error::Parse.to_err();
            }

            let mut mpl: Option<(usize, usize)> = None;
            let mut remove = false;
            let mut cur = IPV6_HEADER_LEN + EXT_HEADER_LEN;
            while cur < end {
                let option = Ipv6Option::parse_from(&m, cur, end)?;
                match option.option_type() {
                    PAD1_TYPE | PADN_TYPE => {}
                    MPL_TYPE => {
                        if mpl.is_some() {
                            return Error::Parse.to_err();
                        }
                        mpl = Some((cur, option.size()));
                        remove = (cur == IPV6_HEADER_LEN + EXT_HEADER_LEN && hbh.len() == 0)
                            || cur + MPL_HBH_LEN == end;
                    }
                    _ => remove = false,
                }
                cur += option.size();
            }

            (header, hbh, end, mpl.map(|(off, size)| (off, size, remove)))
        };

        let (mpl_offset, mpl_size, remove) = match mpl {
            Some(mpl) => mpl,
            None => return Ok(()),
        };

        if !remove {
            let mut m = self.pool.get_mut(message);
            m.write(mpl_offset, &[PADN_TYPE, (mpl_size - 2) as u8]);
            for pos in mpl_offset + 2..mpl_offset + mpl_size {
                m.write_u8(pos, 0);
            }
            return Ok(());
        }

        let mut m = self.pool.get_mut(message);
        if hbh.len() == 0 {
            m.remove_header_at(IPV6_HEADER_LEN, MPL_HBH_LEN);
            header.set_next_header(hbh.next_header());
        } else {
            m.remove_header_at(end - MPL_HBH_LEN, MPL_HBH_LEN);
            let mut shrunk = hbh;
            shrunk.set_len(hbh.len() - 1);
            m.write(IPV6_HEADER_LEN, shrunk.header_slice());
        }
        header.set_payload_len(header.payload_len() - MPL_HBH_LEN as u16);
        m.write(0, header.header_slice());
        Ok(())
    }
}
