//! IPv6 fragmentation and reassembly (RFC 8200 section 4.5).
//!
//! The unfragmentable part of a datagram is the IPv6 header plus the
//! extension headers preceding the Fragment header. Reassembly writes each
//! fragment at its explicit offset and tracks the byte ranges received, so
//! fragments may arrive in any order.

use std::net::Ipv6Addr;

use arrayvec::ArrayVec;

use crate::conf::{Ip6Conf, MAX_REASSEMBLY_ENTRIES};
use crate::error::{Error, Result};
use crate::ipv6::extentions::{divisible_by_eight, ExtHeader, FragHeader, FRAG_HEADER_LEN, FRAG_HEADER_TEMPLATE};
use crate::ipv6::{IpProtocol, Ipv6Header, IPV6_HEADER_LEN, NEXT_HEADER_OFFSET, PAYLOAD_LEN_OFFSET};
use crate::message::{Message, MessageHandle, MessagePool, MessageSettings, MessageType, QueueId};
use crate::rand::Rand;
use crate::time::{Duration, Instant};

const TICK_PERIOD: Duration = Duration::from_secs(1);

// Position of the next header field that names the header found at `end`,
// walking the extension headers from the IPv6 header on.
fn next_header_field(message: &Message<'_>, end: usize) -> Result<usize> {
    let mut field = NEXT_HEADER_OFFSET;
    let mut cur = IPV6_HEADER_LEN;
    while cur < end {
        let ext = ExtHeader::parse_unchecked(message.read_array::<2>(cur)?);
        field = cur;
        cur += ext.size();
    }
    if cur != end {
        return Error::Parse.to_err();
    }
    Ok(field)
}

fn write_payload_len(pool: &mut MessagePool, message: MessageHandle, len: usize) {
    pool.get_mut(message)
        .write(PAYLOAD_LEN_OFFSET, &(len as u16).to_be_bytes());
}

/// Length of the unfragmentable part of an outgoing datagram: the IPv6
/// header and a leading Hop-by-Hop header.
pub fn unfragmentable_len(message: &Message<'_>) -> Result<usize> {
    let header = Ipv6Header::parse_unchecked(message.read_array::<IPV6_HEADER_LEN>(0)?);
    if header.next_header() != IpProtocol::HOPOPT {
        return Ok(IPV6_HEADER_LEN);
    }
    let hbh = ExtHeader::parse_unchecked(message.read_array::<2>(IPV6_HEADER_LEN)?);
    Ok(IPV6_HEADER_LEN + hbh.size())
}

/// Split `message` into fragments no longer than `mtu` and put them on
/// `send_queue` in order.
///
/// Every fragment carries the Fragment header identification as its
/// datagram tag. The original is freed once every fragment is queued. On
/// error it stays with the caller untouched; fragments queued before the
/// failure are not taken back.
pub(crate) fn fragment_datagram(
    pool: &mut MessagePool,
    rand: &mut Rand,
    message: MessageHandle,
    mtu: usize,
    reserve: usize,
    send_queue: QueueId,
) -> Result<usize> {
    let (unfrag_len, total, field, settings, origin, multicast_loop) = {
        let m = pool.get(message);
        let unfrag_len = unfragmentable_len(&m)?;
        (
            unfrag_len,
            m.length(),
            next_header_field(&m, unfrag_len)?,
            MessageSettings::new(m.link_security(), m.priority()),
            m.origin(),
            m.multicast_loop(),
        )
    };
    if mtu < unfrag_len + FRAG_HEADER_LEN + 8 || total < unfrag_len {
        return Error::InvalidArgs.to_err();
    }
    let max_payload = divisible_by_eight(mtu - unfrag_len - FRAG_HEADER_LEN);

    let mut frag_header = FRAG_HEADER_TEMPLATE;
    frag_header.set_next_header(pool.get(message).read_u8(field)?.into());
    frag_header.set_ident(rand.rand_u32());

    let mut payload_left = total - unfrag_len;
    let mut frag_offset = 0;
    let mut count = 0;

    while payload_left > 0 {
        let chunk = payload_left.min(max_payload);
        payload_left -= chunk;
        frag_header.set_frag_off((frag_offset / 8) as u16);
        frag_header.set_m_flag(payload_left > 0);

        let fragment = pool.allocate(MessageType::Ip6, reserve, settings)?;
        if let Err(err) = pool.get_mut(fragment).set_length(unfrag_len + FRAG_HEADER_LEN + chunk) {
            net_warn!("no buffers for fragment {} of a {} byte datagram", count, total);
            pool.free(fragment);
            return Err(err);
        }

        pool.copy_bytes(message, 0, fragment, 0, unfrag_len);
        pool.copy_bytes(
            message,
            unfrag_len + frag_offset,
            fragment,
            unfrag_len + FRAG_HEADER_LEN,
            chunk,
        );
        write_payload_len(pool, fragment, unfrag_len - IPV6_HEADER_LEN + FRAG_HEADER_LEN + chunk);

        let mut f = pool.get_mut(fragment);
        f.write_u8(field, IpProtocol::IPV6_FRAG.into());
        f.write(unfrag_len, frag_header.header_slice());
        f.set_offset(unfrag_len);
        f.set_origin(origin);
        f.set_multicast_loop(multicast_loop);
        f.set_datagram_tag(frag_header.ident());

        pool.enqueue(send_queue, fragment);
        frag_offset += chunk;
        count += 1;
    }

    net_debug!(
        "fragmented {} byte datagram into {} fragments, ident {:08x}",
        total,
        count,
        frag_header.ident()
    );
    pool.free(message);
    Ok(count)
}

/// What became of a received Fragment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reassembly {
    /// A whole datagram in one fragment. The offset now points past the
    /// Fragment header and processing continues.
    Atomic,
    /// Stored; the datagram is still incomplete.
    Pending,
    /// The datagram is complete.
    Complete(MessageHandle),
}

#[derive(Debug)]
struct ReassemblyEntry {
    message: MessageHandle,
    ident: u32,
    src: Ipv6Addr,
    dst: Ipv6Addr,
    unfrag_len: usize,
    total: Option<usize>,
    next_header: u8,
    // Sorted, disjoint, non-adjacent byte ranges of fragmentable payload.
    ranges: Vec<(usize, usize)>,
}

impl ReassemblyEntry {
    fn add_range(&mut self, start: usize, end: usize) {
        let mut start = start;
        let mut end = end;
        self.ranges.retain(|&(s, e)| {
            if e < start || s > end {
                true
            } else {
                start = start.min(s);
                end = end.max(e);
                false
            }
        });
        let pos = self.ranges.iter().position(|&(s, _)| s > start).unwrap_or(self.ranges.len());
        self.ranges.insert(pos, (start, end));
    }

    fn is_complete(&self) -> bool {
        match self.total {
            Some(total) => self.ranges.len() == 1 && self.ranges[0] == (0, total),
            None => false,
        }
    }
}

/// Datagrams under reassembly.
#[derive(Debug)]
pub struct Reassembler {
    entries: ArrayVec<ReassemblyEntry, MAX_REASSEMBLY_ENTRIES>,
    timeout_secs: u8,
    max_len: usize,
    reserve: usize,
    timer: Option<Instant>,
}

impl Reassembler {
    pub(crate) fn new(conf: &Ip6Conf, reserve: usize) -> Self {
        Self {
            entries: ArrayVec::new(),
            timeout_secs: conf.reassembly_timeout_secs,
            max_len: conf.max_assembled_datagram_len,
            reserve,
            timer: None,
        }
    }

    /// Number of datagrams under reassembly.
    #[inline]
    pub fn nb_entries(&self) -> usize {
        self.entries.len()
    }

    /// Handle the Fragment header at the offset of `message`.
    ///
    /// The caller keeps ownership of `message`; its payload has been copied
    /// unless [`Reassembly::Atomic`] is returned.
    pub(crate) fn handle_fragment(
        &mut self,
        pool: &mut MessagePool,
        now: Instant,
        message: MessageHandle,
    ) -> Result<Reassembly> {
        let (header, frag, offset, length) = {
            let m = pool.get(message);
            let header = Ipv6Header::parse_unchecked(m.read_array::<IPV6_HEADER_LEN>(0)?);
            let frag = FragHeader::parse_unchecked(m.read_array::<FRAG_HEADER_LEN>(m.offset())?);
            (header, frag, m.offset(), m.length())
        };

        if frag.frag_off() == 0 && !frag.m_flag() {
            pool.get_mut(message).move_offset(FRAG_HEADER_LEN);
            return Ok(Reassembly::Atomic);
        }

        let key = (frag.ident(), header.src_addr(), header.dst_addr());
        let res = self.add_fragment(pool, now, message, key, &frag, offset, length);
        if let Err(err) = res {
            net_warn!("dropping reassembly of ident {:08x}: {}", key.0, err);
            if let Some(idx) = self.find(key) {
                let entry = self.entries.remove(idx);
                pool.free(entry.message);
            }
            self.stop_timer_if_idle();
        }
        res
    }

    fn find(&self, key: (u32, Ipv6Addr, Ipv6Addr)) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| (e.ident, e.src, e.dst) == key)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_fragment(
        &mut self,
        pool: &mut MessagePool,
        now: Instant,
        message: MessageHandle,
        key: (u32, Ipv6Addr, Ipv6Addr),
        frag: &FragHeader<[u8; FRAG_HEADER_LEN]>,
        offset: usize,
        length: usize,
    ) -> Result<Reassembly> {
        let frag_off = frag.frag_off_bytes();
        let payload = length - offset - FRAG_HEADER_LEN;

        if offset + frag_off + payload > self.max_len {
            return Error::NoBufs.to_err();
        }
        if frag.m_flag() && payload % 8 != 0 {
            return Error::Parse.to_err();
        }

        let idx = match self.find(key) {
            Some(idx) => idx,
            None => self.new_entry(pool, now, message, key, offset)?,
        };
        let entry = &mut self.entries[idx];
        if entry.unfrag_len != offset {
            return Error::Parse.to_err();
        }

        let needed = offset + frag_off + payload;
        if pool.get(entry.message).length() < needed {
            pool.get_mut(entry.message).set_length(needed)?;
        }
        pool.copy_bytes(message, offset + FRAG_HEADER_LEN, entry.message, offset + frag_off, payload);
        entry.add_range(frag_off, frag_off + payload);
        entry.next_header = frag.next_header().into();
        if !frag.m_flag() {
            entry.total = Some(frag_off + payload);
        }
        net_trace!(
            "fragment ident {:08x} offset {} len {} stored",
            entry.ident,
            frag_off,
            payload
        );

        if !entry.is_complete() {
            return Ok(Reassembly::Pending);
        }

        let entry = self.entries.remove(idx);
        self.stop_timer_if_idle();
        self.finish(pool, entry).map(Reassembly::Complete)
    }

    fn new_entry(
        &mut self,
        pool: &mut MessagePool,
        now: Instant,
        message: MessageHandle,
        key: (u32, Ipv6Addr, Ipv6Addr),
        unfrag_len: usize,
    ) -> Result<usize> {
        if self.entries.is_full() {
            net_warn!("reassembly list full, dropping fragment of ident {:08x}", key.0);
            return Error::NoBufs.to_err();
        }

        let (settings, origin) = {
            let m = pool.get(message);
            (MessageSettings::new(m.link_security(), m.priority()), m.origin())
        };
        let assembled = pool.allocate(MessageType::Ip6, self.reserve, settings)?;
        if let Err(err) = pool.get_mut(assembled).set_length(unfrag_len) {
            pool.free(assembled);
            return Err(err);
        }
        pool.copy_bytes(message, 0, assembled, 0, unfrag_len);

        let mut m = pool.get_mut(assembled);
        m.set_timeout(self.timeout_secs);
        m.set_timestamp(now);
        m.set_origin(origin);

        self.entries.push(ReassemblyEntry {
            message: assembled,
            ident: key.0,
            src: key.1,
            dst: key.2,
            unfrag_len,
            total: None,
            next_header: 0,
            ranges: Vec::new(),
        });
        if self.timer.is_none() {
            self.timer = Some(now + TICK_PERIOD);
        }
        Ok(self.entries.len() - 1)
    }

    fn finish(&mut self, pool: &mut MessagePool, entry: ReassemblyEntry) -> Result<MessageHandle> {
        let total = entry.total.unwrap_or(0);
        let message = entry.message;

        let field = match next_header_field(&pool.get(message), entry.unfrag_len) {
            Ok(field) => field,
            Err(err) => {
                pool.free(message);
                return Err(err);
            }
        };
        write_payload_len(pool, message, entry.unfrag_len - IPV6_HEADER_LEN + total);

        let mut m = pool.get_mut(message);
        m.write_u8(field, entry.next_header);
        m.set_offset(0);
        m.set_datagram_tag(entry.ident);

        net_debug!(
            "reassembled ident {:08x}, {} bytes",
            entry.ident,
            entry.unfrag_len + total
        );
        Ok(message)
    }

    fn stop_timer_if_idle(&mut self) {
        if self.entries.is_empty() {
            self.timer = None;
        }
    }

    /// Instant of the next timeout tick.
    pub(crate) fn poll_at(&self) -> Option<Instant> {
        self.timer
    }

    /// Run due timeout ticks and return the datagrams that timed out. They
    /// are no longer tracked; the caller reports and frees them.
    pub(crate) fn poll(
        &mut self,
        pool: &mut MessagePool,
        now: Instant,
    ) -> ArrayVec<MessageHandle, MAX_REASSEMBLY_ENTRIES> {
        let mut expired = ArrayVec::new();

        while let Some(at) = self.timer {
            if at > now {
                break;
            }
            let mut idx = 0;
            while idx < self.entries.len() {
                let handle = self.entries[idx].message;
                pool.get_mut(handle).decrement_timeout();
                if pool.get(handle).timeout() == 0 {
                    let entry = self.entries.remove(idx);
                    net_info!("reassembly of ident {:08x} timed out", entry.ident);
                    expired.push(entry.message);
                } else {
                    idx += 1;
                }
            }
            self.timer = if self.entries.is_empty() {
                None
            } else {
                Some(at + TICK_PERIOD)
            };
        }
        expired
    }
}
