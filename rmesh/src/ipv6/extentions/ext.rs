#![allow(missing_docs)]

use crate::ipv6::IpProtocol;

header_field_val_accessors! {
    (next_header, next_header_mut, 0),
    (hdr_ext_len, hdr_ext_len_mut, 1),
}

/// Bytes of the next header and length fields.
pub const EXT_HEADER_LEN: usize = 2;

/// An empty Hop-by-Hop header prefix.
pub const HBH_HEADER_TEMPLATE: ExtHeader<[u8; EXT_HEADER_LEN]> = ExtHeader { buf: [0x00, 0x00] };

/// The common prefix of Hop-by-Hop and Destination Options headers.
///
/// The length field counts 8-byte units beyond the first eight bytes.
#[derive(Debug, Clone, Copy)]
pub struct ExtHeader<T> {
    buf: T,
}

impl<T: AsRef<[u8]>> ExtHeader<T> {
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
        if buf.as_ref().len() < EXT_HEADER_LEN {
            return Err(buf);
        }
        Ok(Self { buf })
    }

    #[inline]
    pub fn header_slice(&self) -> &[u8] {
        &self.buf.as_ref()[0..EXT_HEADER_LEN]
    }

    #[inline]
    pub fn next_header(&self) -> IpProtocol {
        (*next_header(self.buf.as_ref())).into()
    }

    /// The raw length field.
    #[inline]
    pub fn len(&self) -> u8 {
        *hdr_ext_len(self.buf.as_ref())
    }

    /// The full size of the header in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        (self.len() as usize + 1) * 8
    }
}

impl<T: AsMut<[u8]>> ExtHeader<T> {
    #[inline]
    pub fn set_next_header(&mut self, value: IpProtocol) {
        *next_header_mut(self.buf.as_mut()) = value.into();
    }

    #[inline]
    pub fn set_len(&mut self, value: u8) {
        *hdr_ext_len_mut(self.buf.as_mut()) = value;
    }
}
