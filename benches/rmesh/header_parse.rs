use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rmesh::conf::PoolConf;
use rmesh::ipv6::extentions::*;
use rmesh::ipv6::options::*;
use rmesh::ipv6::*;
use rmesh::message::*;
use rmesh::udp::*;

use std::net::Ipv6Addr;

// ff03::1 from fd00:db8::ff:fe00:400 with an MPL option, seed 0x0400.
static DATAGRAM_BYTES: [u8; 62] = [
    0x60, 0x00, 0x00, 0x00, 0x00, 0x16, 0x00, 0x40, 0xfd, 0x00, 0x0d, 0xb8, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0xff, 0xfe, 0x00, 0x04, 0x00, 0xff, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x11, 0x00, 0x6d, 0x04, 0x40, 0x05, 0x04, 0x00,
    0x04, 0xd2, 0x16, 0x2e, 0x00, 0x0e, 0x00, 0x00, 0x48, 0x65, 0x6c, 0x6c, 0x6f, 0x21,
];

fn slice_parse(buf: &[u8]) {
    let header = Ipv6Header::parse(buf).unwrap();
    assert!(header.next_header() == IpProtocol::HOPOPT);
    assert!(header.dst_addr() == Ipv6Addr::new(0xff03, 0, 0, 0, 0, 0, 0, 1));
    assert!(header.hop_limit() == 64);

    let hbh = ExtHeader::parse(&buf[IPV6_HEADER_LEN..]).unwrap();
    assert!(hbh.next_header() == IpProtocol::UDP);

    let udp = UdpHeader::parse(&buf[IPV6_HEADER_LEN + hbh.size()..]).unwrap();
    assert!(udp.dst_port() == 5678);
}

fn message_parse(pool: &MessagePool, message: MessageHandle) {
    let m = pool.get(message);
    let header = Ipv6Header::parse_from_message(&m).unwrap();
    assert!(header.next_header() == IpProtocol::HOPOPT);

    let mpl = MplOption::parse_from_message(&m, IPV6_HEADER_LEN + 2).unwrap();
    assert!(mpl.seed_id() == 0x0400);
    assert!(mpl.sequence() == 5);
}

pub fn b(c: &mut Criterion) {
    c.bench_function("slice_parse", |b| {
        b.iter(|| {
            slice_parse(black_box(&DATAGRAM_BYTES[..]));
        })
    });

    // Small buffers so the datagram spans several of them.
    let mut conf = PoolConf::new();
    conf.set_buffer_size(32);
    let mut pool = MessagePool::new(&conf);
    let message = pool
        .allocate(MessageType::Ip6, 0, MessageSettings::default())
        .unwrap();
    pool.get_mut(message).append(&DATAGRAM_BYTES).unwrap();

    c.bench_function("message_parse", |b| {
        b.iter(|| {
            message_parse(black_box(&pool), black_box(message));
        })
    });
}

criterion_group!(benches, b);
criterion_main!(benches);
