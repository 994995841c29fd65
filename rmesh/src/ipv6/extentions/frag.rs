#![allow(missing_docs)]

use byteorder::{ByteOrder, NetworkEndian};

use crate::ipv6::IpProtocol;

header_field_val_accessors! {
    (next_header, next_header_mut, 0),
}

header_field_range_accessors! {
    (frag_off, frag_off_mut, 2..4),
    (ident, ident_mut, 4..8),
}

pub const FRAG_HEADER_LEN: usize = 8;

/// A fragment header with offset zero and the More flag clear.
pub const FRAG_HEADER_TEMPLATE: FragHeader<[u8; FRAG_HEADER_LEN]> = FragHeader {
    buf: [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
};

/// RFC 8200 - Sec. 4.5
#[derive(Clone, Copy, Debug)]
pub struct FragHeader<T> {
    buf: T,
}

impl<T: AsRef<[u8]>> FragHeader<T> {
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
    pub fn parse(buf: T) -> Result<Self, T> {
        if buf.as_ref().len() < FRAG_HEADER_LEN {
            return Err(buf);
        }
        Ok(Self { buf })
    }

    #[inline]
    pub fn header_slice(&self) -> &[u8] {
        &self.buf.as_ref()[0..FRAG_HEADER_LEN]
    }

    #[inline]
    pub fn next_header(&self) -> IpProtocol {
        (*next_header(self.buf.as_ref())).into()
    }

    /// Fragment offset in 8-byte units.
    #[inline]
    pub fn frag_off(&self) -> u16 {
        NetworkEndian::read_u16(frag_off(self.buf.as_ref())) >> 3
    }

    /// Fragment offset in bytes.
    #[inline]
    pub fn frag_off_bytes(&self) -> usize {
        self.frag_off() as usize * 8
    }

    /// true: more frags
    /// false: last frag
    #[inline]
    pub fn m_flag(&self) -> bool {
        (NetworkEndian::read_u16(frag_off(self.buf.as_ref())) & 1) == 1
    }

    #[inline]
    pub fn ident(&self) -> u32 {
        NetworkEndian::read_u32(ident(self.buf.as_ref()))
    }
}

impl<T: AsMut<[u8]>> FragHeader<T> {
    #[inline]
    pub fn set_next_header(&mut self, value: IpProtocol) {
        *next_header_mut(self.buf.as_mut()) = value.into();
    }

    #[inline]
    pub fn set_frag_off(&mut self, value: u16) {
        assert!(value <= 0x1fff);
        let data = frag_off_mut(self.buf.as_mut());
        let m_flag = NetworkEndian::read_u16(data) & 1;
        NetworkEndian::write_u16(data, value << 3 | m_flag);
    }

    #[inline]
    pub fn set_m_flag(&mut self, value: bool) {
        let data = frag_off_mut(self.buf.as_mut());
        let raw = NetworkEndian::read_u16(data) & !1;
        NetworkEndian::write_u16(data, raw | value as u16);
    }

    #[inline]
    pub fn set_ident(&mut self, value: u32) {
        NetworkEndian::write_u32(ident_mut(self.buf.as_mut()), value);
    }
}

/// Largest multiple of eight not above `len`.
#[inline]
pub fn divisible_by_eight(len: usize) -> usize {
    len & !7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_and_flag_are_independent() {
        let mut frag = FRAG_HEADER_TEMPLATE;
        frag.set_next_header(IpProtocol::UDP);
        frag.set_m_flag(true);
        frag.set_frag_off(154);
        frag.set_ident(0xdeadbeef);

        assert!(frag.m_flag());
        assert_eq!(frag.frag_off(), 154);
        assert_eq!(frag.frag_off_bytes(), 1232);

        frag.set_m_flag(false);
        assert!(!frag.m_flag());
        assert_eq!(frag.frag_off(), 154);
        assert_eq!(
            frag.release(),
            [17, 0, 0x04, 0xd0, 0xde, 0xad, 0xbe, 0xef]
        );
    }
}
