//! RFC 1071 checksums over slices and buffer chains.

use std::net::Ipv6Addr;

use byteorder::{ByteOrder, NetworkEndian};
use bytes::Buf;

use crate::ipv6::IpProtocol;

/// Compute an RFC 1071 checksum (without the final complement) over the first
/// `len` bytes of `buf`, which may span several buffers of a message.
pub fn from_buf<T: Buf>(buf: T, len: usize) -> u16 {
    let mut buf = buf.take(len);
    let mut tail_byte = None;
    let mut accum = 0;

    while buf.has_remaining() {
        let chunk = buf.chunk();
        let chunk_len = chunk.len();

        tail_byte = sum_with_tail_byte(chunk, &mut accum, tail_byte);

        buf.advance(chunk_len);
    }

    if let Some(byte) = tail_byte {
        accum += (byte as u32) << 8;
    }

    propagate_carries(accum)
}

/// Compute an RFC 1071 checksum (without the final complement) over `data`.
pub fn from_slice(data: &[u8]) -> u16 {
    let mut accum = 0;
    if let Some(byte) = sum_with_tail_byte(data, &mut accum, None) {
        accum += (byte as u32) << 8;
    }
    propagate_carries(accum)
}

/// Combine several RFC 1071 checksums.
pub fn combine(checksums: &[u16]) -> u16 {
    let mut accum: u32 = 0;
    for &word in checksums {
        accum += word as u32;
    }
    propagate_carries(accum)
}

/// Checksum of the IPv6 pseudo-header (RFC 8200 section 8.1).
pub fn pseudo_header(src_addr: &Ipv6Addr, dst_addr: &Ipv6Addr, proto: IpProtocol, len: u32) -> u16 {
    let mut upper = [0; 8];
    NetworkEndian::write_u32(&mut upper[0..4], len);
    upper[7] = proto.into();

    combine(&[
        from_slice(&src_addr.octets()),
        from_slice(&dst_addr.octets()),
        from_slice(&upper),
    ])
}

// Sums `data` into `accum`, pairing a byte left over from the previous chunk
// with the first byte of this one. Returns the new odd byte, if any.
fn sum_with_tail_byte(mut data: &[u8], accum: &mut u32, tail_byte: Option<u8>) -> Option<u8> {
    if let Some(byte) = tail_byte {
        match data.first() {
            Some(&first) => {
                *accum += NetworkEndian::read_u16(&[byte, first]) as u32;
                data = &data[1..];
            }
            None => return Some(byte),
        }
    }

    // For each 32-byte chunk...
    const CHUNK_SIZE: usize = 32;
    while data.len() >= CHUNK_SIZE {
        let mut d = &data[..CHUNK_SIZE];
        // ... take by 2 bytes and sum them.
        while d.len() >= 2 {
            *accum += NetworkEndian::read_u16(d) as u32;
            d = &d[2..];
        }

        data = &data[CHUNK_SIZE..];
    }

    while data.len() >= 2 {
        *accum += NetworkEndian::read_u16(data) as u32;
        data = &data[2..];
    }

    data.first().copied()
}

fn propagate_carries(word: u32) -> u16 {
    let sum = (word >> 16) + (word & 0xffff);
    ((sum >> 16) as u16) + (sum as u16)
}
