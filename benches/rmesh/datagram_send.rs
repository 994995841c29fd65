use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rmesh::collab::MeshForwarder;
use rmesh::conf::{Ip6Conf, PoolConf};
use rmesh::ipv6::*;
use rmesh::message::*;
use rmesh::netif::Netif;
use rmesh::time::Instant;
use rmesh::udp::*;
use rmesh::{DeviceRole, Ip6, MessageInfo, Result};

const MESH_LOCAL_PREFIX: [u8; 8] = [0xfd, 0x00, 0x0d, 0xb8, 0, 0, 0, 0];

struct Sink;

impl MeshForwarder for Sink {
    fn send_message(&mut self, pool: &mut MessagePool, message: MessageHandle) -> Result<()> {
        pool.free(message);
        Ok(())
    }
}

fn new_core() -> Ip6 {
    let pool = MessagePool::new(&PoolConf::new());
    let netif = Netif::new(MESH_LOCAL_PREFIX, 0x0400);
    let mut ip6 = Ip6::new(pool, netif, Ip6Conf::new(), Box::new(Sink));
    ip6.set_device_role(DeviceRole::Router);
    ip6
}

fn send_udp(ip6: &mut Ip6, info: &MessageInfo, payload: &[u8], now: Instant) {
    let message = ip6.new_message(0, MessageSettings::default()).unwrap();
    let mut udp = UDP_HEADER_TEMPLATE;
    udp.set_src_port(19788);
    udp.set_dst_port(19788);
    udp.set_packet_len((UDP_HEADER_LEN + payload.len()) as u16);

    let mut m = ip6.pool_mut().get_mut(message);
    m.append(udp.header_slice()).unwrap();
    m.append(payload).unwrap();

    ip6.send_datagram(message, info, IpProtocol::UDP).unwrap();
    ip6.poll(now);
}

pub fn b(c: &mut Criterion) {
    let payload = [0x5a; 66];

    c.bench_function("unicast_send", |b| {
        let mut ip6 = new_core();
        let info = MessageInfo::new(locator_address(&MESH_LOCAL_PREFIX, 0x0800));
        b.iter(|| {
            send_udp(&mut ip6, black_box(&info), black_box(&payload[..]), Instant::ZERO);
        })
    });

    // Realm-local multicast also walks the MPL option on the way out.
    c.bench_function("multicast_send", |b| {
        let mut ip6 = new_core();
        let info = MessageInfo::new(REALM_LOCAL_ALL_NODES);
        let mut now = 0;
        b.iter(|| {
            send_udp(&mut ip6, black_box(&info), black_box(&payload[..]), Instant::from_millis(now));
            // Let the seed set and the retransmission buffer drain.
            now += 10_000;
            ip6.poll(Instant::from_millis(now - 5_000));
        })
    });
}

criterion_group!(benches, b);
criterion_main!(benches);
