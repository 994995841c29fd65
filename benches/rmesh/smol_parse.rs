use criterion::{black_box, criterion_group, criterion_main, Criterion};
use smoltcp::wire::*;

// ff03::1 from fd00:db8::ff:fe00:400 with an MPL option, seed 0x0400.
static DATAGRAM_BYTES: [u8; 62] = [
    0x60, 0x00, 0x00, 0x00, 0x00, 0x16, 0x00, 0x40, 0xfd, 0x00, 0x0d, 0xb8, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0xff, 0xfe, 0x00, 0x04, 0x00, 0xff, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x11, 0x00, 0x6d, 0x04, 0x40, 0x05, 0x04, 0x00,
    0x04, 0xd2, 0x16, 0x2e, 0x00, 0x0e, 0x00, 0x00, 0x48, 0x65, 0x6c, 0x6c, 0x6f, 0x21,
];

fn smol_parse(buf: &[u8]) {
    let ippkt = Ipv6Packet::new_checked(buf).unwrap();
    assert!(ippkt.next_header() == IpProtocol::HopByHop);
    assert!(ippkt.dst_addr() == Ipv6Address::new(0xff03, 0, 0, 0, 0, 0, 0, 1));
    assert!(ippkt.hop_limit() == 64);

    let hbh = Ipv6HopByHopHeader::new_checked(ippkt.payload()).unwrap();
    assert!(hbh.next_header() == IpProtocol::Udp);

    let udppkt = UdpPacket::new_checked(&ippkt.payload()[8..]).unwrap();
    assert!(udppkt.dst_port() == 5678);
}

pub fn b(c: &mut Criterion) {
    c.bench_function("smol_parse", |b| {
        b.iter(|| {
            smol_parse(black_box(&DATAGRAM_BYTES[..]));
        })
    });
}

criterion_group!(benches, b);
criterion_main!(benches);
