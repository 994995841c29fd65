//! Options carried in Hop-by-Hop and Destination Options headers.

use byteorder::{ByteOrder, NetworkEndian};

use crate::error::{Error, Result};
use crate::message::Message;

/// The single-byte padding option.
pub const PAD1_TYPE: u8 = 0x00;
/// The multi-byte padding option.
pub const PADN_TYPE: u8 = 0x01;
/// The MPL option (RFC 7731).
pub const MPL_TYPE: u8 = 0x6d;

/// What a node does with an option type it does not recognize, encoded in
/// the two high-order bits of the type (RFC 8200 section 4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionAction {
    /// Skip over the option.
    Skip,
    /// Discard the packet.
    Discard,
    /// Discard and always answer with an ICMP Parameter Problem.
    ForceIcmp,
    /// Discard and answer unless the destination is multicast.
    Icmp,
}

/// The type and length of one option found in a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Option {
    option_type: u8,
    data_len: u8,
}

impl Ipv6Option {
    /// Parse the option at `offset`, which must end at or before `end`.
    pub fn parse_from(message: &Message<'_>, offset: usize, end: usize) -> Result<Self> {
        let option_type = message.read_u8(offset)?;
        let option = if option_type == PAD1_TYPE {
            Self {
                option_type,
                data_len: 0,
            }
        } else {
            let [option_type, data_len] = message.read_array::<2>(offset)?;
            Self {
                option_type,
                data_len,
            }
        };

        if offset + option.size() > end {
            return Error::Parse.to_err();
        }
        Ok(option)
    }

    /// The option type.
    #[inline]
    pub fn option_type(&self) -> u8 {
        self.option_type
    }

    /// Length of the option data.
    #[inline]
    pub fn data_len(&self) -> u8 {
        self.data_len
    }

    /// Bytes occupied by the option, including its type and length.
    #[inline]
    pub fn size(&self) -> usize {
        if self.option_type == PAD1_TYPE {
            1
        } else {
            2 + self.data_len as usize
        }
    }

    /// The action for an unrecognized option of this type.
    #[inline]
    pub fn action(&self) -> OptionAction {
        match self.option_type >> 6 {
            0 => OptionAction::Skip,
            1 => OptionAction::Discard,
            2 => OptionAction::ForceIcmp,
            _ => OptionAction::Icmp,
        }
    }
}

/// A Pad1 or PadN option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadOption {
    buf: [u8; 8],
    size: usize,
}

impl PadOption {
    /// Padding of exactly `size` bytes: Pad1 for one byte, PadN otherwise.
    pub fn for_pad_size(size: usize) -> Self {
        assert!((1..=7).contains(&size));
        let mut buf = [0; 8];
        if size > 1 {
            buf[0] = PADN_TYPE;
            buf[1] = (size - 2) as u8;
        }
        Self { buf, size }
    }

    /// Padding that brings a header of `header_size` bytes to a multiple of
    /// eight. Fails with `Already` when no padding is needed.
    pub fn to_pad_header_with_size(header_size: usize) -> Result<Self> {
        let rem = header_size % 8;
        if rem == 0 {
            return Error::Already.to_err();
        }
        Ok(Self::for_pad_size(8 - rem))
    }

    /// The wire bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.size]
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Length of the seed identifier carried by an MPL option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedIdLength {
    /// Seed derived from the IPv6 source address.
    Len0,
    /// 16-bit seed identifier.
    Len2,
    /// 64-bit seed identifier.
    Len8,
    /// 128-bit seed identifier.
    Len16,
}

impl SeedIdLength {
    const MASK: u8 = 0xc0;

    fn from_flags(flags: u8) -> Self {
        match flags & Self::MASK {
            0x00 => SeedIdLength::Len0,
            0x40 => SeedIdLength::Len2,
            0x80 => SeedIdLength::Len8,
            _ => SeedIdLength::Len16,
        }
    }

    fn bits(self) -> u8 {
        match self {
            SeedIdLength::Len0 => 0x00,
            SeedIdLength::Len2 => 0x40,
            SeedIdLength::Len8 => 0x80,
            SeedIdLength::Len16 => 0xc0,
        }
    }

    /// Bytes of seed identifier on the wire.
    pub fn bytes(self) -> usize {
        match self {
            SeedIdLength::Len0 => 0,
            SeedIdLength::Len2 => 2,
            SeedIdLength::Len8 => 8,
            SeedIdLength::Len16 => 16,
        }
    }
}

const MPL_M_FLAG: u8 = 0x20;
const MPL_V_FLAG: u8 = 0x10;

/// Largest MPL option this node emits or accepts.
pub const MPL_OPTION_MAX_LEN: usize = 6;
/// MPL option without a seed identifier.
pub const MPL_OPTION_MIN_LEN: usize = 4;

/// The MPL option: flags, sequence number and an optional seed identifier.
#[derive(Debug, Clone, Copy)]
pub struct MplOption<T> {
    buf: T,
}

#[allow(missing_docs)]
impl<T: AsRef<[u8]>> MplOption<T> {
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

    /// Option type, always [`MPL_TYPE`] for a well-formed option.
    #[inline]
    pub fn option_type(&self) -> u8 {
        self.buf.as_ref()[0]
    }

    /// Length of the option data.
    #[inline]
    pub fn data_len(&self) -> u8 {
        self.buf.as_ref()[1]
    }

    #[inline]
    pub fn seed_id_length(&self) -> SeedIdLength {
        SeedIdLength::from_flags(self.buf.as_ref()[2])
    }

    #[inline]
    pub fn m_flag(&self) -> bool {
        self.buf.as_ref()[2] & MPL_M_FLAG != 0
    }

    #[inline]
    pub fn v_flag(&self) -> bool {
        self.buf.as_ref()[2] & MPL_V_FLAG != 0
    }

    #[inline]
    pub fn sequence(&self) -> u8 {
        self.buf.as_ref()[3]
    }

    /// The 16-bit seed identifier; only meaningful for [`SeedIdLength::Len2`].
    #[inline]
    pub fn seed_id(&self) -> u16 {
        NetworkEndian::read_u16(&self.buf.as_ref()[4..6])
    }

    /// Bytes occupied on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        2 + self.data_len() as usize
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf.as_ref()[..self.size()]
    }
}

#[allow(missing_docs)]
impl<T: AsMut<[u8]>> MplOption<T> {
    /// Write type, length and seed-id-length for a seed of the given size.
    #[inline]
    pub fn init(&mut self, seed_id_length: SeedIdLength) {
        let buf = self.buf.as_mut();
        buf[0] = MPL_TYPE;
        buf[1] = (MPL_OPTION_MIN_LEN - 2 + seed_id_length.bytes()) as u8;
        buf[2] = seed_id_length.bits();
    }

    #[inline]
    pub fn set_m_flag(&mut self, value: bool) {
        let buf = self.buf.as_mut();
        buf[2] = (buf[2] & !MPL_M_FLAG) | if value { MPL_M_FLAG } else { 0 };
    }

    #[inline]
    pub fn set_sequence(&mut self, value: u8) {
        self.buf.as_mut()[3] = value;
    }

    #[inline]
    pub fn set_seed_id(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[4..6], value);
    }
}

impl MplOption<[u8; MPL_OPTION_MAX_LEN]> {
    /// Build an option. A `None` seed elides the seed identifier.
    pub fn new(seed_id: Option<u16>, sequence: u8) -> Self {
        let mut option = Self {
            buf: [0; MPL_OPTION_MAX_LEN],
        };
        match seed_id {
            Some(seed_id) => {
                option.init(SeedIdLength::Len2);
                option.set_seed_id(seed_id);
            }
            None => option.init(SeedIdLength::Len0),
        }
        option.set_sequence(sequence);
        option
    }

    /// Read the MPL option at `offset`, rejecting seed identifiers longer
    /// than 16 bits and lengths that disagree with the seed size.
    pub fn parse_from_message(message: &Message<'_>, offset: usize) -> Result<Self> {
        let mut buf = [0; MPL_OPTION_MAX_LEN];
        message.read_exact(offset, &mut buf[..MPL_OPTION_MIN_LEN])?;
        let option = Self { buf };

        if option.option_type() != MPL_TYPE {
            return Error::Parse.to_err();
        }
        let seed_len = match option.seed_id_length() {
            SeedIdLength::Len0 => 0,
            SeedIdLength::Len2 => 2,
            SeedIdLength::Len8 | SeedIdLength::Len16 => return Error::Parse.to_err(),
        };
        if (option.data_len() as usize) < MPL_OPTION_MIN_LEN - 2 + seed_len {
            return Error::Parse.to_err();
        }

        let mut buf = option.release();
        message.read_exact(
            offset + MPL_OPTION_MIN_LEN,
            &mut buf[MPL_OPTION_MIN_LEN..MPL_OPTION_MIN_LEN + seed_len],
        )?;
        Ok(Self { buf })
    }
}
