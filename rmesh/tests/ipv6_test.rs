mod common;

use std::net::Ipv6Addr;
use std::str::FromStr;

use common::*;

use rmesh::checksum_utils;
use rmesh::conf::PoolConf;
use rmesh::ipv6::extentions::*;
use rmesh::ipv6::options::*;
use rmesh::ipv6::*;
use rmesh::message::*;
use rmesh::udp::*;
use rmesh::Error;

use smoltcp::wire;

fn smol_addr(addr: &Ipv6Addr) -> wire::IpAddress {
    wire::IpAddress::Ipv6(wire::Ipv6Address::from_bytes(&addr.octets()))
}

// Realm-local multicast UDP datagram carrying an MPL option with seed 0x0400.
const MPL_DATAGRAM: &str = "
    6000000000160040fd000db800000000000000fffe000400ff030000000000000000000000000001
    1100 6d04 4005 0400
    04d2162e000e0000 48656c6c6f21";

#[test]
fn ipv6_header_parse() {
    let pkt = hex_to_packet(MPL_DATAGRAM);
    assert_eq!(pkt.len(), 62);

    let header = Ipv6Header::parse(&pkt[..]).unwrap();
    assert_eq!(header.version(), 6);
    assert_eq!(header.traffic_class(), 0);
    assert_eq!(header.flow_label(), 0);
    assert_eq!(header.payload_len(), 22);
    assert_eq!(header.next_header(), IpProtocol::HOPOPT);
    assert_eq!(header.hop_limit(), 64);
    assert_eq!(
        header.src_addr(),
        Ipv6Addr::from_str("fd00:db8::ff:fe00:400").unwrap()
    );
    assert_eq!(header.dst_addr(), Ipv6Addr::from_str("ff03::1").unwrap());
    assert!(header.dst_addr().is_realm_local_multicast());
    assert!(header.src_addr().is_rloc());

    let hbh = ExtHeader::parse(&pkt[40..]).unwrap();
    assert_eq!(hbh.next_header(), IpProtocol::UDP);
    assert_eq!(hbh.size(), 8);

    let udp = UdpHeader::parse(&pkt[48..]).unwrap();
    assert_eq!(udp.src_port(), 1234);
    assert_eq!(udp.dst_port(), 5678);
    assert_eq!(udp.packet_len(), 14);

    let smol = wire::Ipv6Packet::new_checked(&pkt[..]).unwrap();
    assert_eq!(smol.payload_len(), header.payload_len());
    assert_eq!(smol.hop_limit(), header.hop_limit());
    assert_eq!(smol.src_addr().as_bytes(), &header.src_addr().octets()[..]);
}

#[test]
fn mpl_option_from_message() {
    let pkt = hex_to_packet(MPL_DATAGRAM);
    let mut pool = MessagePool::new(&PoolConf::new());
    let msg = pool
        .allocate(MessageType::Ip6, 0, MessageSettings::default())
        .unwrap();
    pool.get_mut(msg).append(&pkt).unwrap();

    let m = pool.get(msg);
    let header = Ipv6Header::parse_from_message(&m).unwrap();
    assert_eq!(header.next_header(), IpProtocol::HOPOPT);

    let option = Ipv6Option::parse_from(&m, 42, 48).unwrap();
    assert_eq!(option.option_type(), MPL_TYPE);
    assert_eq!(option.size(), 6);
    assert_eq!(option.action(), OptionAction::Discard);

    let mpl = MplOption::parse_from_message(&m, 42).unwrap();
    assert_eq!(mpl.seed_id_length(), SeedIdLength::Len2);
    assert_eq!(mpl.seed_id(), 0x0400);
    assert_eq!(mpl.sequence(), 5);

    assert_eq!(Ipv6Option::parse_from(&m, 44, 46), Err(Error::Parse));
}

#[test]
fn truncated_datagram_is_rejected() {
    let pkt = hex_to_packet(MPL_DATAGRAM);
    let mut pool = MessagePool::new(&PoolConf::new());
    let msg = pool
        .allocate(MessageType::Ip6, 0, MessageSettings::default())
        .unwrap();
    pool.get_mut(msg).append(&pkt[..60]).unwrap();
    assert_eq!(
        Ipv6Header::parse_from_message(&pool.get(msg)).err(),
        Some(Error::Parse)
    );

    let mut bad_version = pkt.clone();
    bad_version[0] = 0x40;
    pool.get_mut(msg).set_length(0).unwrap();
    pool.get_mut(msg).append(&bad_version).unwrap();
    assert_eq!(
        Ipv6Header::parse_from_message(&pool.get(msg)).err(),
        Some(Error::Parse)
    );

    assert!(Ipv6Header::parse(&pkt[..39]).is_err());
}

#[test]
fn ipv6_header_build_matches_smoltcp() {
    let src = Ipv6Addr::from_str("fd00:db8::1").unwrap();
    let dst = Ipv6Addr::from_str("2001:db8::2").unwrap();

    let mut header = IPV6_HEADER_TEMPLATE;
    header.set_payload_len(20);
    header.set_next_header(IpProtocol::UDP);
    header.set_hop_limit(17);
    header.set_src_addr(&src);
    header.set_dst_addr(&dst);

    let mut smol_bytes = [0u8; 40];
    let repr = wire::Ipv6Repr {
        src_addr: wire::Ipv6Address::from_bytes(&src.octets()),
        dst_addr: wire::Ipv6Address::from_bytes(&dst.octets()),
        next_header: wire::IpProtocol::Udp,
        payload_len: 20,
        hop_limit: 17,
    };
    repr.emit(&mut wire::Ipv6Packet::new_unchecked(&mut smol_bytes[..]));

    assert_eq!(header.header_slice(), &smol_bytes[..]);
}

#[test]
fn fragment_header_fields() {
    let mut frag = FRAG_HEADER_TEMPLATE;
    frag.set_next_header(IpProtocol::UDP);
    frag.set_frag_off(154);
    frag.set_m_flag(true);
    frag.set_ident(0xdeadbeef);

    assert_eq!(
        frag.header_slice(),
        &[0x11, 0x00, 0x04, 0xd1, 0xde, 0xad, 0xbe, 0xef]
    );
    assert_eq!(frag.frag_off_bytes(), 1232);

    let parsed = FragHeader::parse(frag.header_slice()).unwrap();
    assert_eq!(parsed.frag_off(), 154);
    assert!(parsed.m_flag());
    assert_eq!(parsed.ident(), 0xdeadbeef);
    assert_eq!(divisible_by_eight(1280 - 48), 1232);
    assert_eq!(divisible_by_eight(13), 8);
}

#[test]
fn udp_checksum_matches_smoltcp() {
    let src = Ipv6Addr::from_str("fd00:db8::ff:fe00:400").unwrap();
    let dst = Ipv6Addr::from_str("fd00:db8::ff:fe00:c01").unwrap();
    let payload = b"checksum across buffers";

    let mut udp = UDP_HEADER_TEMPLATE;
    udp.set_src_port(19788);
    udp.set_dst_port(19788);
    udp.set_packet_len((UDP_HEADER_LEN + payload.len()) as u16);

    let mut bytes = udp.header_slice().to_vec();
    bytes.extend_from_slice(payload);

    let mut conf = PoolConf::new();
    conf.set_buffer_size(7);
    let mut pool = MessagePool::new(&conf);
    let msg = pool
        .allocate(MessageType::Ip6, 3, MessageSettings::default())
        .unwrap();
    pool.get_mut(msg).append(&bytes).unwrap();

    let len = bytes.len();
    let ours = !checksum_utils::combine(&[
        checksum_utils::pseudo_header(&src, &dst, IpProtocol::UDP, len as u32),
        checksum_utils::from_buf(pool.get(msg).cursor(), len),
    ]);

    let mut smol = wire::UdpPacket::new_unchecked(&mut bytes[..]);
    smol.fill_checksum(&smol_addr(&src), &smol_addr(&dst));
    assert_eq!(ours, smol.checksum());
}
