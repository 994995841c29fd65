//! The UDP header (RFC 768).
#![allow(missing_docs)]

use byteorder::{ByteOrder, NetworkEndian};

/// A constant that defines the fixed byte length of the Udp protocol header.
pub const UDP_HEADER_LEN: usize = 8;
/// Offset of the checksum inside the UDP header.
pub const UDP_CHECKSUM_OFFSET: usize = 6;

/// A fixed Udp header.
pub const UDP_HEADER_TEMPLATE: UdpHeader<[u8; UDP_HEADER_LEN]> = UdpHeader {
    buf: [0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00],
};

#[derive(Debug, Clone, Copy)]
pub struct UdpHeader<T> {
    buf: T,
}

impl<T: AsRef<[u8]>> UdpHeader<T> {
    #[inline]
    pub fn parse_unchecked(buf: T) -> Self {
        Self { buf }
    }

    #[inline]
    pub fn release(self) -> T {
        self.buf
    }

    #[inline]
    pub fn parse(buf: T) -> Result<Self, T> {
        if buf.as_ref().len() < UDP_HEADER_LEN {
            return Err(buf);
        }
        Ok(Self { buf })
    }

    #[inline]
    pub fn header_slice(&self) -> &[u8] {
        &self.buf.as_ref()[0..UDP_HEADER_LEN]
    }

    #[inline]
    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buf.as_ref()[0..2])
    }

    #[inline]
    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buf.as_ref()[2..4])
    }

    #[inline]
    pub fn packet_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buf.as_ref()[4..6])
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buf.as_ref()[6..8])
    }
}

impl<T: AsMut<[u8]>> UdpHeader<T> {
    #[inline]
    pub fn set_src_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[0..2], value);
    }

    #[inline]
    pub fn set_dst_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[2..4], value);
    }

    #[inline]
    pub fn set_packet_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[4..6], value);
    }

    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[6..8], value);
    }
}
