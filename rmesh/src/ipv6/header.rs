#![allow(missing_docs)]

use std::net::Ipv6Addr;

use byteorder::{ByteOrder, NetworkEndian};

use super::IpProtocol;
use crate::error::{Error, Result};
use crate::message::Message;

header_field_val_accessors! {
    (next_header, next_header_mut, 6),
    (hop_limit, hop_limit_mut, 7),
}

header_field_range_accessors! {
    (ver_tc_flow, ver_tc_flow_mut, 0..4),
    (payload_len, payload_len_mut, 4..6),
    (src_addr, src_addr_mut, 8..24),
    (dst_addr, dst_addr_mut, 24..40),
}

/// Byte length of the fixed IPv6 header.
pub const IPV6_HEADER_LEN: usize = 40;

/// Offset of the payload length field.
pub const PAYLOAD_LEN_OFFSET: usize = 4;
/// Offset of the next header field.
pub const NEXT_HEADER_OFFSET: usize = 6;
/// Offset of the hop limit field.
pub const HOP_LIMIT_OFFSET: usize = 7;

/// A version 6 header with every other field zero.
pub const IPV6_HEADER_TEMPLATE: Ipv6Header<[u8; IPV6_HEADER_LEN]> = Ipv6Header {
    buf: [
        0x60, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ],
};

/// The fixed IPv6 header (RFC 8200 section 3).
#[derive(Debug, Clone, Copy)]
pub struct Ipv6Header<T> {
    buf: T,
}

impl<T: AsRef<[u8]>> Ipv6Header<T> {
    #[inline]
    pub fn parse_unchecked(buf: T) -> Self {
        Self { buf }
    }

    #[inline]
    pub fn buf(&self) -> &T {
        &self.buf
    }

    #[inline]
    pub fn release(self) -> T {
        self.buf
    }

    #[inline]
    pub fn parse(buf: T) -> std::result::Result<Self, T> {
        if buf.as_ref().len() < IPV6_HEADER_LEN {
            return Err(buf);
        }
        Ok(Self { buf })
    }

    #[inline]
    pub fn header_slice(&self) -> &[u8] {
        &self.buf.as_ref()[0..IPV6_HEADER_LEN]
    }

    #[inline]
    pub fn version(&self) -> u8 {
        ver_tc_flow(self.buf.as_ref())[0] >> 4
    }

    #[inline]
    pub fn is_version6(&self) -> bool {
        self.version() == 6
    }

    #[inline]
    pub fn traffic_class(&self) -> u8 {
        let data = ver_tc_flow(self.buf.as_ref());
        (data[0] << 4) | (data[1] >> 4)
    }

    /// Differentiated services code point, the upper 6 bits of the traffic class.
    #[inline]
    pub fn dscp(&self) -> u8 {
        self.traffic_class() >> 2
    }

    /// Explicit congestion notification, the lower 2 bits of the traffic class.
    #[inline]
    pub fn ecn(&self) -> u8 {
        self.traffic_class() & 0x03
    }

    #[inline]
    pub fn flow_label(&self) -> u32 {
        NetworkEndian::read_u32(ver_tc_flow(self.buf.as_ref())) & 0xfffff
    }

    #[inline]
    pub fn payload_len(&self) -> u16 {
        NetworkEndian::read_u16(payload_len(self.buf.as_ref()))
    }

    #[inline]
    pub fn next_header(&self) -> IpProtocol {
        (*next_header(self.buf.as_ref())).into()
    }

    #[inline]
    pub fn hop_limit(&self) -> u8 {
        *hop_limit(self.buf.as_ref())
    }

    #[inline]
    pub fn src_addr(&self) -> Ipv6Addr {
        let mut octets = [0; 16];
        octets.copy_from_slice(src_addr(self.buf.as_ref()));
        Ipv6Addr::from(octets)
    }

    #[inline]
    pub fn dst_addr(&self) -> Ipv6Addr {
        let mut octets = [0; 16];
        octets.copy_from_slice(dst_addr(self.buf.as_ref()));
        Ipv6Addr::from(octets)
    }

    /// Version 6 and a datagram no longer than `max_len`.
    #[inline]
    pub fn is_valid(&self, max_len: usize) -> bool {
        self.is_version6() && IPV6_HEADER_LEN + self.payload_len() as usize <= max_len
    }

    #[inline]
    pub fn to_owned(&self) -> Ipv6Header<[u8; IPV6_HEADER_LEN]> {
        let mut buf = [0; IPV6_HEADER_LEN];
        buf.copy_from_slice(self.header_slice());
        Ipv6Header { buf }
    }
}

impl<T: AsMut<[u8]>> Ipv6Header<T> {
    #[inline]
    pub fn header_slice_mut(&mut self) -> &mut [u8] {
        &mut self.buf.as_mut()[0..IPV6_HEADER_LEN]
    }

    /// Reset version to 6 and clear the traffic class and flow label.
    #[inline]
    pub fn init_version_traffic_class_flow(&mut self) {
        ver_tc_flow_mut(self.buf.as_mut()).copy_from_slice(&[0x60, 0, 0, 0]);
    }

    #[inline]
    pub fn set_traffic_class(&mut self, value: u8) {
        let data = ver_tc_flow_mut(self.buf.as_mut());
        data[0] = (data[0] & 0xf0) | (value >> 4);
        data[1] = (data[1] & 0x0f) | (value << 4);
    }

    #[inline]
    pub fn set_dscp(&mut self, value: u8) {
        assert!(value <= 0x3f);
        let tc = (self.read_traffic_class() & 0x03) | (value << 2);
        self.set_traffic_class(tc);
    }

    #[inline]
    pub fn set_ecn(&mut self, value: u8) {
        assert!(value <= 0x03);
        let tc = (self.read_traffic_class() & 0xfc) | value;
        self.set_traffic_class(tc);
    }

    #[inline]
    pub fn set_flow_label(&mut self, value: u32) {
        assert!(value <= 0xfffff);
        let data = ver_tc_flow_mut(self.buf.as_mut());
        let raw = NetworkEndian::read_u32(data);
        NetworkEndian::write_u32(data, (raw & 0xfff0_0000) | value);
    }

    #[inline]
    pub fn set_payload_len(&mut self, value: u16) {
        NetworkEndian::write_u16(payload_len_mut(self.buf.as_mut()), value);
    }

    #[inline]
    pub fn set_next_header(&mut self, value: IpProtocol) {
        *next_header_mut(self.buf.as_mut()) = value.into();
    }

    #[inline]
    pub fn set_hop_limit(&mut self, value: u8) {
        *hop_limit_mut(self.buf.as_mut()) = value;
    }

    #[inline]
    pub fn set_src_addr(&mut self, value: &Ipv6Addr) {
        src_addr_mut(self.buf.as_mut()).copy_from_slice(&value.octets());
    }

    #[inline]
    pub fn set_dst_addr(&mut self, value: &Ipv6Addr) {
        dst_addr_mut(self.buf.as_mut()).copy_from_slice(&value.octets());
    }

    fn read_traffic_class(&mut self) -> u8 {
        let data = ver_tc_flow_mut(self.buf.as_mut());
        (data[0] << 4) | (data[1] >> 4)
    }
}

impl Ipv6Header<[u8; IPV6_HEADER_LEN]> {
    /// Read the header at the start of `message`.
    ///
    /// Fails with `Parse` unless the version is 6 and the payload length
    /// accounts for exactly the bytes following the header.
    pub fn parse_from_message(message: &Message<'_>) -> Result<Self> {
        let header = Self::parse_unchecked(message.read_array::<IPV6_HEADER_LEN>(0)?);
        if !header.is_version6()
            || IPV6_HEADER_LEN + header.payload_len() as usize != message.length()
        {
            return Error::Parse.to_err();
        }
        Ok(header)
    }
}
