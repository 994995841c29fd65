mod common;

use common::*;

use rmesh::conf::{Ip6Conf, PoolConf};
use rmesh::icmpv6::*;
use rmesh::ipv6::extentions::*;
use rmesh::ipv6::*;
use rmesh::time::Instant;
use rmesh::{DeviceRole, Error, MessageInfo};

use smoltcp::wire;

const SENDER: u16 = 0x0400;
const RECEIVER: u16 = 0x0800;

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

// Send a 2000 byte UDP payload from SENDER to RECEIVER and return the frames.
fn fragments() -> (Vec<Frame>, Vec<u8>) {
    let mut sender = Node::new(SENDER, DeviceRole::Router);
    let data = payload(2000);
    sender
        .send_udp(&MessageInfo::new(rloc(RECEIVER)), &data)
        .unwrap();
    assert_eq!(sender.ip6.send_queue_len(), 2);
    sender.ip6.poll(Instant::ZERO);
    (sender.take_frames(), data)
}

fn frag_header(frame: &[u8]) -> FragHeader<&[u8]> {
    FragHeader::parse(&frame[IPV6_HEADER_LEN..]).unwrap()
}

#[test]
fn large_datagram_is_split_in_two() {
    let (frames, _) = fragments();
    assert_eq!(frames.len(), 2);

    let first = &frames[0].data;
    let second = &frames[1].data;
    assert!(first.len() <= 1280);
    assert_eq!(first.len(), 40 + 8 + 1232);
    assert_eq!(second.len(), 40 + 8 + (2008 - 1232));

    for frame in [first, second] {
        let header = Ipv6Header::parse(&frame[..]).unwrap();
        assert_eq!(header.next_header(), IpProtocol::IPV6_FRAG);
        assert_eq!(header.payload_len() as usize, frame.len() - IPV6_HEADER_LEN);
        assert_eq!(header.src_addr(), rloc(SENDER));
        assert_eq!(header.dst_addr(), rloc(RECEIVER));
    }

    let f1 = frag_header(first);
    let f2 = frag_header(second);
    assert_eq!(f1.frag_off(), 0);
    assert!(f1.m_flag());
    assert_eq!(f2.frag_off() as usize, (1280 - 48) / 8);
    assert_eq!(f2.frag_off(), 154);
    assert!(!f2.m_flag());
    assert_eq!(f1.ident(), f2.ident());
    assert_eq!(frames[0].datagram_tag, f1.ident());
    assert_eq!(frames[1].datagram_tag, f1.ident());
    assert_eq!(f1.next_header(), IpProtocol::UDP);
    assert_eq!(f2.next_header(), IpProtocol::UDP);
}

#[test]
fn out_of_order_fragments_are_reassembled() {
    let (frames, data) = fragments();
    let mut receiver = Node::new(RECEIVER, DeviceRole::Router);

    assert_eq!(receiver.receive(&frames[1].data), Err(Error::Drop));
    assert_eq!(receiver.ip6.reassembler().nb_entries(), 1);
    assert!(receiver.deliveries.borrow().is_empty());

    assert_eq!(receiver.receive(&frames[0].data), Err(Error::Drop));
    assert_eq!(receiver.ip6.reassembler().nb_entries(), 0);

    let deliveries = receiver.deliveries.borrow();
    assert_eq!(deliveries.len(), 1);
    let delivery = &deliveries[0];
    assert_eq!(delivery.proto, IpProtocol::UDP);
    assert_eq!(delivery.info.peer_addr, rloc(SENDER));
    assert_eq!(delivery.info.sock_addr, rloc(RECEIVER));
    assert_eq!(delivery.payload.len(), 2008);
    assert_eq!(&delivery.payload[8..], &data[..]);
    assert_eq!(delivery.datagram_tag, frag_header(&frames[0].data).ident());

    // The checksum computed before fragmentation still holds.
    let src = wire::IpAddress::Ipv6(wire::Ipv6Address::from_bytes(&rloc(SENDER).octets()));
    let dst = wire::IpAddress::Ipv6(wire::Ipv6Address::from_bytes(&rloc(RECEIVER).octets()));
    let udp = wire::UdpPacket::new_checked(&delivery.payload[..]).unwrap();
    assert!(udp.verify_checksum(&src, &dst));

    drop(deliveries);
    assert_eq!(receiver.ip6.pool().nb_messages(), 0);
}

#[test]
fn reassembly_timeout_reports_time_exceeded() {
    let (frames, _) = fragments();
    let mut receiver = Node::new(RECEIVER, DeviceRole::Router);

    assert_eq!(receiver.receive(&frames[0].data), Err(Error::Drop));
    assert_eq!(receiver.ip6.reassembler().nb_entries(), 1);
    assert!(receiver.ip6.poll_at().is_some());

    receiver.ip6.poll(Instant::from_secs(30));
    assert_eq!(receiver.ip6.reassembler().nb_entries(), 1);
    assert!(receiver.take_frames().is_empty());

    receiver.ip6.poll(Instant::from_secs(61));
    assert_eq!(receiver.ip6.reassembler().nb_entries(), 0);

    let frames = receiver.take_frames();
    assert_eq!(frames.len(), 1);
    let reply = &frames[0].data;

    let header = Ipv6Header::parse(&reply[..]).unwrap();
    assert_eq!(header.next_header(), IpProtocol::ICMPV6);
    assert_eq!(header.src_addr(), rloc(RECEIVER));
    assert_eq!(header.dst_addr(), rloc(SENDER));
    assert_eq!(header.payload_len() as usize, ICMP_HEADER_LEN + IPV6_HEADER_LEN);

    let icmp = IcmpHeader::parse(&reply[IPV6_HEADER_LEN..]).unwrap();
    assert_eq!(icmp.icmp_type(), IcmpType::TIME_EXCEEDED);
    assert_eq!(icmp.code(), CODE_FRAGMENT_REASSEMBLY_EXCEEDED);

    // The offending header is quoted back.
    let quoted = Ipv6Header::parse(&reply[IPV6_HEADER_LEN + ICMP_HEADER_LEN..]).unwrap();
    assert_eq!(quoted.src_addr(), rloc(SENDER));
    assert_eq!(quoted.dst_addr(), rloc(RECEIVER));

    let src = wire::IpAddress::Ipv6(wire::Ipv6Address::from_bytes(&rloc(RECEIVER).octets()));
    let dst = wire::IpAddress::Ipv6(wire::Ipv6Address::from_bytes(&rloc(SENDER).octets()));
    let smol = wire::Icmpv6Packet::new_checked(&reply[IPV6_HEADER_LEN..]).unwrap();
    assert!(smol.verify_checksum(&src, &dst));

    // Nothing more is reported once the entry is gone.
    receiver.ip6.poll(Instant::from_secs(200));
    assert!(receiver.take_frames().is_empty());
    assert_eq!(receiver.ip6.pool().nb_messages(), 0);
}

#[test]
fn atomic_fragment_is_processed_in_place() {
    let mut receiver = Node::new(RECEIVER, DeviceRole::Router);

    let mut frag = FRAG_HEADER_TEMPLATE;
    frag.set_next_header(IpProtocol::UDP);
    frag.set_ident(7);

    let mut datagram = udp_datagram(&rloc(SENDER), &rloc(RECEIVER), 64, &[], b"atomic");
    let mut header = Ipv6Header::parse_unchecked(&mut datagram[..IPV6_HEADER_LEN]);
    header.set_next_header(IpProtocol::IPV6_FRAG);
    header.set_payload_len(header.payload_len() + FRAG_HEADER_LEN as u16);
    let tail = datagram.split_off(IPV6_HEADER_LEN);
    datagram.extend_from_slice(frag.header_slice());
    datagram.extend_from_slice(&tail);

    receiver.receive(&datagram).unwrap();
    let deliveries = receiver.deliveries.borrow();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(&deliveries[0].payload[8..], b"atomic");
    assert_eq!(receiver.ip6.reassembler().nb_entries(), 0);
}

#[test]
fn oversized_send_without_fragmentation() {
    let mut conf = rmesh::conf::Ip6Conf::new();
    conf.set_fragmentation(false);
    let mut sender = Node::with_conf(SENDER, DeviceRole::Router, conf);

    let res = sender.send_udp(&MessageInfo::new(rloc(RECEIVER)), &payload(1500));
    assert_eq!(res, Err(Error::InvalidArgs));
    assert_eq!(sender.ip6.pool().nb_messages(), 0);

    sender
        .send_udp(&MessageInfo::new(rloc(RECEIVER)), &payload(1000))
        .unwrap();
    sender.ip6.poll(Instant::ZERO);
    let frames = sender.take_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data.len(), 40 + 8 + 1000);
}

#[test]
fn foreign_fragment_is_forwarded_untouched() {
    let (frames, _) = fragments();
    let mut router = Node::new(0x0c00, DeviceRole::Router);

    router.receive(&frames[1].data).unwrap();
    assert_eq!(router.ip6.reassembler().nb_entries(), 0);

    let forwarded = router.take_frames();
    assert_eq!(forwarded.len(), 1);
    let mut expected = frames[1].data.clone();
    expected[HOP_LIMIT_OFFSET] -= 1;
    assert_eq!(forwarded[0].data, expected);
}

#[test]
fn fragment_beyond_assembled_limit_is_dropped() {
    let (frames, _) = fragments();
    let mut conf = Ip6Conf::new();
    conf.set_max_assembled_datagram_len(1500);
    let mut receiver = Node::with_conf(RECEIVER, DeviceRole::Router, conf);

    assert_eq!(receiver.receive(&frames[1].data), Err(Error::Drop));
    assert_eq!(receiver.ip6.reassembler().nb_entries(), 0);
    assert_eq!(receiver.ip6.pool().nb_messages(), 0);

    assert_eq!(receiver.receive(&frames[0].data), Err(Error::Drop));
    assert_eq!(receiver.ip6.reassembler().nb_entries(), 1);
    assert!(receiver.deliveries.borrow().is_empty());
}

#[test]
fn fragment_beyond_reassembly_capacity_is_dropped() {
    let (frames, _) = fragments();
    let mut receiver = Node::new(RECEIVER, DeviceRole::Router);

    for i in 0..5u8 {
        let mut frame = frames[0].data.clone();
        // Last byte of the identification.
        frame[IPV6_HEADER_LEN + 7] ^= i + 1;
        assert_eq!(receiver.receive(&frame), Err(Error::Drop));
    }
    assert_eq!(receiver.ip6.reassembler().nb_entries(), 4);
    assert_eq!(receiver.ip6.pool().nb_messages(), 4);
}

// Enough 128 byte buffers for a 2008 byte payload and the first of its
// two fragments, not for the second.
fn short_pool() -> PoolConf {
    let mut conf = PoolConf::new();
    conf.set_nb_buffers(30);
    conf
}

#[test]
fn send_out_of_buffers_mid_fragmentation() {
    let mut sender = Node::with_pool(SENDER, DeviceRole::Router, Ip6Conf::new(), short_pool());
    let message = sender.udp_message(&payload(2000)).unwrap();
    let before = sender.ip6.pool().get(message).to_vec();

    let res = sender
        .ip6
        .send_datagram(message, &MessageInfo::new(rloc(RECEIVER)), IpProtocol::UDP);
    assert_eq!(res, Err(Error::NoBufs));
    {
        let m = sender.ip6.pool().get(message);
        assert_eq!(m.length(), 2008);
        assert_eq!(m.offset(), 0);
        assert_eq!(m.to_vec(), before);
    }

    // The fragment queued before the failure still goes out.
    assert_eq!(sender.ip6.send_queue_len(), 1);
    assert!(sender.ip6.poll_at().is_some());
    sender.ip6.poll(Instant::ZERO);
    let frames = sender.take_frames();
    assert_eq!(frames.len(), 1);
    assert!(frag_header(&frames[0].data).m_flag());
    assert_eq!(sender.ip6.poll_at(), None);

    sender.ip6.pool_mut().free(message);
    assert_eq!(sender.ip6.pool().nb_messages(), 0);
    assert_eq!(sender.ip6.pool().free_buffers(), 30);
}

#[test]
fn multicast_send_out_of_buffers_keeps_mpl_sequence() {
    let mut sender = Node::with_pool(SENDER, DeviceRole::Router, Ip6Conf::new(), short_pool());
    let message = sender.udp_message(&payload(2000)).unwrap();
    let before = sender.ip6.pool().get(message).to_vec();
    let dst = "ff03::1".parse().unwrap();

    let res = sender
        .ip6
        .send_datagram(message, &MessageInfo::new(dst), IpProtocol::UDP);
    assert_eq!(res, Err(Error::NoBufs));
    assert_eq!(sender.ip6.mpl().sequence(), 0);
    {
        let m = sender.ip6.pool().get(message);
        assert_eq!(m.length(), 2008);
        assert_eq!(m.reserved(), rmesh::ip6::HEADER_RESERVE);
        assert_eq!(m.to_vec(), before);
    }
    assert_eq!(sender.ip6.send_queue_len(), 1);
    sender.ip6.pool_mut().free(message);
}
