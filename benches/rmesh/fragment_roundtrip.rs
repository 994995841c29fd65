use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rmesh::collab::MeshForwarder;
use rmesh::conf::{Ip6Conf, PoolConf};
use rmesh::ipv6::*;
use rmesh::message::*;
use rmesh::netif::Netif;
use rmesh::time::Instant;
use rmesh::udp::*;
use rmesh::{DeviceRole, Ip6, MessageInfo, Result};

use std::cell::RefCell;
use std::rc::Rc;

const MESH_LOCAL_PREFIX: [u8; 8] = [0xfd, 0x00, 0x0d, 0xb8, 0, 0, 0, 0];

type Frames = Rc<RefCell<Vec<Vec<u8>>>>;

struct Capture(Frames);

impl MeshForwarder for Capture {
    fn send_message(&mut self, pool: &mut MessagePool, message: MessageHandle) -> Result<()> {
        self.0.borrow_mut().push(pool.get(message).to_vec());
        pool.free(message);
        Ok(())
    }
}

fn new_core(rloc16: u16, frames: Frames) -> Ip6 {
    let pool = MessagePool::new(&PoolConf::new());
    let netif = Netif::new(MESH_LOCAL_PREFIX, rloc16);
    let mut ip6 = Ip6::new(pool, netif, Ip6Conf::new(), Box::new(Capture(frames)));
    ip6.set_device_role(DeviceRole::Router);
    ip6
}

fn roundtrip(sender: &mut Ip6, receiver: &mut Ip6, frames: &Frames, payload: &[u8]) {
    let message = sender.new_message(0, MessageSettings::default()).unwrap();
    let mut udp = UDP_HEADER_TEMPLATE;
    udp.set_src_port(1234);
    udp.set_dst_port(5678);
    udp.set_packet_len((UDP_HEADER_LEN + payload.len()) as u16);

    let mut m = sender.pool_mut().get_mut(message);
    m.append(udp.header_slice()).unwrap();
    m.append(payload).unwrap();

    let info = MessageInfo::new(receiver.netif().rloc_address());
    sender.send_datagram(message, &info, IpProtocol::UDP).unwrap();
    sender.poll(Instant::ZERO);

    for frame in frames.borrow_mut().drain(..) {
        let pool = receiver.pool_mut();
        let message = pool
            .allocate(MessageType::Ip6, 0, MessageSettings::default())
            .unwrap();
        let mut m = pool.get_mut(message);
        m.set_origin(Origin::ThreadNetif);
        m.append(&frame).unwrap();
        // Fragments are consumed by the reassembler.
        let _ = receiver.handle_datagram(message, false);
    }
    assert!(receiver.reassembler().nb_entries() == 0);
}

pub fn b(c: &mut Criterion) {
    c.bench_function("fragment_roundtrip", |b| {
        let frames = Frames::default();
        let mut sender = new_core(0x0400, frames.clone());
        let mut receiver = new_core(0x0800, Frames::default());
        let payload = vec![0xa5; 2000];
        b.iter(|| {
            roundtrip(&mut sender, &mut receiver, &frames, black_box(&payload[..]));
        })
    });
}

criterion_group!(benches, b);
criterion_main!(benches);
