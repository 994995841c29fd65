#![allow(dead_code)]

use std::cell::RefCell;
use std::net::Ipv6Addr;
use std::rc::Rc;

use rmesh::collab::{MeshForwarder, RouteLookup, TransportHandler};
use rmesh::conf::{Ip6Conf, PoolConf};
use rmesh::ipv6::*;
use rmesh::message::*;
use rmesh::netif::Netif;
use rmesh::udp::*;
use rmesh::{DeviceRole, Ip6, MessageInfo, Result};

pub const MESH_LOCAL_PREFIX: [u8; 8] = [0xfd, 0x00, 0x0d, 0xb8, 0, 0, 0, 0];

pub fn rloc(rloc16: u16) -> Ipv6Addr {
    locator_address(&MESH_LOCAL_PREFIX, rloc16)
}

pub fn hex_to_packet(hex: &str) -> Vec<u8> {
    let content: String = hex.chars().filter(|c| !c.is_whitespace()).collect();

    let mut res = Vec::new();
    let mut chars = content.chars();
    let mut start_idx = 0;
    while chars.as_str().len() > 0 {
        // Pop two characters out
        chars.next();
        chars.next();

        let end_idx = content.len() - chars.as_str().len();
        res.push(u8::from_str_radix(&content[start_idx..end_idx], 16).unwrap());
        start_idx = end_idx;
    }

    res
}

/// A frame handed to the mesh forwarder.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub priority: Priority,
    pub sub_type: SubType,
    pub child_mask: u64,
    pub datagram_tag: u32,
}

pub type Frames = Rc<RefCell<Vec<Frame>>>;

/// Records every frame and releases it right away.
pub struct CaptureForwarder(pub Frames);

impl MeshForwarder for CaptureForwarder {
    fn send_message(&mut self, pool: &mut MessagePool, message: MessageHandle) -> Result<()> {
        let frame = {
            let m = pool.get(message);
            Frame {
                data: m.to_vec(),
                priority: m.priority(),
                sub_type: m.sub_type(),
                child_mask: m.child_mask(),
                datagram_tag: m.datagram_tag(),
            }
        };
        for child in 0..64 {
            if frame.child_mask & (1 << child) != 0 {
                pool.clear_child(message, child);
            }
        }
        pool.free(message);
        self.0.borrow_mut().push(frame);
        Ok(())
    }
}

/// What a transport handler saw.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub proto: IpProtocol,
    pub info: MessageInfo,
    pub payload: Vec<u8>,
    pub datagram_tag: u32,
}

pub type Deliveries = Rc<RefCell<Vec<Delivery>>>;

pub struct RecordingTransport(pub Deliveries);

impl TransportHandler for RecordingTransport {
    fn handle_message(
        &mut self,
        pool: &mut MessagePool,
        message: MessageHandle,
        info: &MessageInfo,
        proto: IpProtocol,
    ) -> Result<()> {
        let m = pool.get(message);
        let payload = m.to_vec()[m.offset()..].to_vec();
        self.0.borrow_mut().push(Delivery {
            proto,
            info: *info,
            payload,
            datagram_tag: m.datagram_tag(),
        });
        Ok(())
    }
}

/// Resolves every destination to the same next hop.
pub struct StaticRoute(pub u16);

impl RouteLookup for StaticRoute {
    fn route_lookup(&mut self, _src: &Ipv6Addr, _dst: &Ipv6Addr) -> Result<u16> {
        Ok(self.0)
    }
}

pub struct Node {
    pub ip6: Ip6,
    pub frames: Frames,
    pub deliveries: Deliveries,
    pub host: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl Node {
    pub fn new(rloc16: u16, role: DeviceRole) -> Self {
        Self::with_conf(rloc16, role, Ip6Conf::new())
    }

    pub fn with_conf(rloc16: u16, role: DeviceRole, conf: Ip6Conf) -> Self {
        Self::with_pool(rloc16, role, conf, PoolConf::new())
    }

    pub fn with_pool(rloc16: u16, role: DeviceRole, conf: Ip6Conf, pool_conf: PoolConf) -> Self {
        let frames = Frames::default();
        let deliveries = Deliveries::default();

        let pool = MessagePool::new(&pool_conf);
        let netif = Netif::new(MESH_LOCAL_PREFIX, rloc16);
        let mut ip6 = Ip6::new(pool, netif, conf, Box::new(CaptureForwarder(frames.clone())));
        ip6.set_device_role(role);
        ip6.set_transport_handler(Box::new(RecordingTransport(deliveries.clone())));

        Self {
            ip6,
            frames,
            deliveries,
            host: Rc::default(),
        }
    }

    /// Install a receive callback that records what reaches the host.
    pub fn attach_host(&mut self) {
        let host = self.host.clone();
        self.ip6.set_receive_callback(move |pool, message| {
            host.borrow_mut().push(pool.get(message).to_vec());
            pool.free(message);
        });
    }

    /// Feed a datagram as if it was received from the mesh.
    pub fn receive(&mut self, datagram: &[u8]) -> Result<()> {
        let pool = self.ip6.pool_mut();
        let message = pool.allocate(MessageType::Ip6, 0, MessageSettings::default())?;
        let mut m = pool.get_mut(message);
        m.set_origin(Origin::ThreadNetif);
        m.append(datagram)?;
        self.ip6.handle_datagram(message, false)
    }

    /// A message holding a UDP header and `payload`, ready for
    /// `send_datagram`.
    pub fn udp_message(&mut self, payload: &[u8]) -> Result<MessageHandle> {
        let message = self.ip6.new_message(0, MessageSettings::default())?;
        let mut udp = UDP_HEADER_TEMPLATE;
        udp.set_src_port(1234);
        udp.set_dst_port(5678);
        udp.set_packet_len((UDP_HEADER_LEN + payload.len()) as u16);

        let mut m = self.ip6.pool_mut().get_mut(message);
        let res = m.append(udp.header_slice()).and_then(|_| m.append(payload));
        if let Err(err) = res {
            self.ip6.pool_mut().free(message);
            return Err(err);
        }
        Ok(message)
    }

    /// Send a UDP payload through the core.
    pub fn send_udp(&mut self, info: &MessageInfo, payload: &[u8]) -> Result<()> {
        let message = self.udp_message(payload)?;
        let res = self.ip6.send_datagram(message, info, IpProtocol::UDP);
        if res.is_err() {
            self.ip6.pool_mut().free(message);
        }
        res
    }

    pub fn take_frames(&self) -> Vec<Frame> {
        self.frames.borrow_mut().drain(..).collect()
    }
}

/// An IPv6 header followed by `ext` and a UDP header carrying `payload`.
pub fn udp_datagram(
    src: &Ipv6Addr,
    dst: &Ipv6Addr,
    hop_limit: u8,
    ext: &[u8],
    payload: &[u8],
) -> Vec<u8> {
    let mut udp = UDP_HEADER_TEMPLATE;
    udp.set_src_port(1234);
    udp.set_dst_port(5678);
    udp.set_packet_len((UDP_HEADER_LEN + payload.len()) as u16);

    let mut header = IPV6_HEADER_TEMPLATE;
    header.set_payload_len((ext.len() + UDP_HEADER_LEN + payload.len()) as u16);
    header.set_next_header(if ext.is_empty() {
        IpProtocol::UDP
    } else {
        IpProtocol::HOPOPT
    });
    header.set_hop_limit(hop_limit);
    header.set_src_addr(src);
    header.set_dst_addr(dst);

    let mut out = header.header_slice().to_vec();
    out.extend_from_slice(ext);
    out.extend_from_slice(udp.header_slice());
    out.extend_from_slice(payload);
    out
}

/// Hop-by-Hop header holding an MPL option with an elided seed.
pub fn mpl_hbh(next_header: IpProtocol, sequence: u8) -> [u8; 8] {
    [next_header.raw(), 0, 0x6d, 0x02, 0x00, sequence, 0x01, 0x00]
}
