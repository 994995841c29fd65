//! The ICMPv6 header (RFC 4443), as far as the datagram core needs it.
#![allow(missing_docs)]

use byteorder::{ByteOrder, NetworkEndian};

enum_sim! {
    /// ICMPv6 message types.
    pub struct IcmpType (u8) {
        DST_UNREACH = 1,
        PACKET_TOO_BIG = 2,
        TIME_EXCEEDED = 3,
        PARAMETER_PROBLEM = 4,
        ECHO_REQUEST = 128,
        ECHO_REPLY = 129,
    }
}

impl IcmpType {
    /// Error messages have the high-order bit of the type clear.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.0 < 128
    }
}

/// Hop limit exceeded in transit.
pub const CODE_HOP_LIMIT_EXCEEDED: u8 = 0;
/// Fragment reassembly time exceeded.
pub const CODE_FRAGMENT_REASSEMBLY_EXCEEDED: u8 = 1;

pub const ICMP_HEADER_LEN: usize = 8;
/// Offset of the checksum inside the ICMPv6 header.
pub const ICMP_CHECKSUM_OFFSET: usize = 2;

pub const ICMP_HEADER_TEMPLATE: IcmpHeader<[u8; ICMP_HEADER_LEN]> = IcmpHeader {
    buf: [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
};

#[derive(Debug, Clone, Copy)]
pub struct IcmpHeader<T> {
    buf: T,
}

impl<T: AsRef<[u8]>> IcmpHeader<T> {
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
        if buf.as_ref().len() < ICMP_HEADER_LEN {
            return Err(buf);
        }
        Ok(Self { buf })
    }

    #[inline]
    pub fn header_slice(&self) -> &[u8] {
        &self.buf.as_ref()[0..ICMP_HEADER_LEN]
    }

    #[inline]
    pub fn icmp_type(&self) -> IcmpType {
        self.buf.as_ref()[0].into()
    }

    #[inline]
    pub fn code(&self) -> u8 {
        self.buf.as_ref()[1]
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buf.as_ref()[2..4])
    }

    /// The four type-specific bytes following the checksum.
    #[inline]
    pub fn rest(&self) -> u32 {
        NetworkEndian::read_u32(&self.buf.as_ref()[4..8])
    }
}

impl<T: AsMut<[u8]>> IcmpHeader<T> {
    #[inline]
    pub fn set_icmp_type(&mut self, value: IcmpType) {
        self.buf.as_mut()[0] = value.into();
    }

    #[inline]
    pub fn set_code(&mut self, value: u8) {
        self.buf.as_mut()[1] = value;
    }

    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[2..4], value);
    }

    #[inline]
    pub fn set_rest(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buf.as_mut()[4..8], value);
    }
}
