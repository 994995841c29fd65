//! MPL forwarding (RFC 7731).
//!
//! Duplicates are suppressed through a bounded seed set of
//! `(seed id, sequence)` pairs. New datagrams are cloned into a buffered
//! queue and retransmitted on a trickle-like schedule; the per-datagram
//! state travels as a footer appended to the buffered clone, so the queue
//! entry and its bookkeeping can never get out of step.

use std::net::Ipv6Addr;

use arrayvec::ArrayVec;
use byteorder::{ByteOrder, NetworkEndian};

use crate::conf::{Ip6Conf, SEED_SET_ENTRIES};
use crate::error::{Error, Result};
use crate::ipv6::options::{MplOption, SeedIdLength, MPL_OPTION_MAX_LEN};
use crate::ipv6::{Ipv6AddrExt, HOP_LIMIT_OFFSET};
use crate::message::{Message, MessageHandle, MessageMut, MessagePool, Origin, QueueId, QueueKind, SubType};
use crate::rand::Rand;
use crate::time::{Duration, Instant};

const SEED_SET_PERIOD: Duration = Duration::from_secs(1);

const FOOTER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SeedEntry {
    seed_id: u16,
    sequence: u8,
    lifetime: u8,
}

// Layout: seed id (2), sequence (1), transmission count (1), transmission
// time in milliseconds (8), interval offset in milliseconds (4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BufferedMetadata {
    seed_id: u16,
    sequence: u8,
    transmission_count: u8,
    transmission_time: Instant,
    interval_offset: u32,
}

impl BufferedMetadata {
    fn read_from(message: &Message<'_>) -> Result<Self> {
        let len = message.length();
        if len < FOOTER_LEN {
            return Error::Parse.to_err();
        }
        let buf = message.read_array::<FOOTER_LEN>(len - FOOTER_LEN)?;
        Ok(Self {
            seed_id: NetworkEndian::read_u16(&buf[0..2]),
            sequence: buf[2],
            transmission_count: buf[3],
            transmission_time: Instant::from_millis(NetworkEndian::read_i64(&buf[4..12])),
            interval_offset: NetworkEndian::read_u32(&buf[12..16]),
        })
    }

    fn to_bytes(&self) -> [u8; FOOTER_LEN] {
        let mut buf = [0; FOOTER_LEN];
        NetworkEndian::write_u16(&mut buf[0..2], self.seed_id);
        buf[2] = self.sequence;
        buf[3] = self.transmission_count;
        NetworkEndian::write_i64(&mut buf[4..12], self.transmission_time.total_millis());
        NetworkEndian::write_u32(&mut buf[12..16], self.interval_offset);
        buf
    }

    fn append_to(&self, message: &mut MessageMut<'_>) -> Result<()> {
        message.append(&self.to_bytes())
    }

    fn update_in(&self, message: &mut MessageMut<'_>) {
        let offset = message.length() - FOOTER_LEN;
        message.write(offset, &self.to_bytes());
    }

    fn remove_from(message: &mut MessageMut<'_>) -> Result<()> {
        let len = message.length() - FOOTER_LEN;
        message.set_length(len)
    }

    // The next transmission happens at a random point of the next interval.
    fn generate_next_transmission_time(&mut self, rand: &mut Rand, now: Instant, interval: u32) {
        let t = rand.rand_range(0, interval);
        self.transmission_time = now + Duration::from_millis((self.interval_offset + t) as u64);
        self.interval_offset = interval - t;
    }
}

/// The MPL seed set and buffered message set.
#[derive(Debug)]
pub struct Mpl {
    sequence: u8,
    seed_set: ArrayVec<SeedEntry, SEED_SET_ENTRIES>,
    seed_entry_lifetime: u8,
    interval_ms: u32,
    timer_expirations: u8,
    buffered: QueueId,
    seed_set_timer: Option<Instant>,
    retransmission_timer: Option<Instant>,
}

impl Mpl {
    /// Create the engine, allocating its buffered message queue in `pool`.
    pub(crate) fn new(pool: &mut MessagePool, conf: &Ip6Conf) -> Self {
        Self {
            sequence: 0,
            seed_set: ArrayVec::new(),
            seed_entry_lifetime: conf.mpl_seed_entry_lifetime,
            interval_ms: conf.mpl_data_message_interval_ms,
            timer_expirations: 0,
            buffered: pool.new_queue(QueueKind::Fifo),
            seed_set_timer: None,
            retransmission_timer: None,
        }
    }

    /// Sequence number the next locally originated datagram will carry.
    #[inline]
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Number of live seed set entries.
    #[inline]
    pub fn seed_set_len(&self) -> usize {
        self.seed_set.len()
    }

    /// Whether `(seed_id, sequence)` has been seen recently.
    pub fn has_seen(&self, seed_id: u16, sequence: u8) -> bool {
        self.seed_set
            .iter()
            .any(|e| e.seed_id == seed_id && e.sequence == sequence)
    }

    /// The queue holding buffered datagrams awaiting retransmission.
    #[inline]
    pub fn buffered_queue(&self) -> QueueId {
        self.buffered
    }

    /// Transmissions of each buffered datagram.
    #[inline]
    pub fn timer_expirations(&self) -> u8 {
        self.timer_expirations
    }

    pub(crate) fn set_timer_expirations(&mut self, val: u8) {
        self.timer_expirations = val;
    }

    /// Hand `sequence` out again, forgetting options built since it was
    /// current.
    pub(crate) fn rewind_sequence(&mut self, sequence: u8) {
        self.sequence = sequence;
    }

    /// Build the option for a datagram sourced from `src`. The seed id is
    /// elided when the source already names our locator.
    pub(crate) fn init_option(&mut self, src: &Ipv6Addr, rloc16: u16) -> MplOption<[u8; MPL_OPTION_MAX_LEN]> {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        if src.is_locator() && src.locator16() == rloc16 {
            MplOption::new(None, sequence)
        } else {
            MplOption::new(Some(rloc16), sequence)
        }
    }

    /// Process the MPL option at `offset` of `message`.
    ///
    /// Returns whether the datagram may be received locally. Inbound
    /// duplicates fail with `Drop`; outbound duplicates are retransmissions
    /// of our own datagrams and are only kept from local delivery.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn process_option(
        &mut self,
        pool: &mut MessagePool,
        rand: &mut Rand,
        now: Instant,
        message: MessageHandle,
        offset: usize,
        src: &Ipv6Addr,
        is_outbound: bool,
    ) -> Result<bool> {
        let option = MplOption::parse_from_message(&pool.get(message), offset)?;

        if is_outbound && pool.get(message).sub_type() == SubType::MplRetransmission {
            return Ok(false);
        }

        let seed_id = match option.seed_id_length() {
            SeedIdLength::Len0 => {
                if !src.is_locator() {
                    return Error::Drop.to_err();
                }
                src.locator16()
            }
            _ => option.seed_id(),
        };
        let sequence = option.sequence();

        if self.update_seed_set(now, seed_id, sequence).is_err() {
            net_trace!("mpl: duplicate seed {:04x} sequence {}", seed_id, sequence);
            if is_outbound {
                return Ok(false);
            }
            return Error::Drop.to_err();
        }

        if let Err(err) =
            self.add_buffered_message(pool, rand, now, message, seed_id, sequence, is_outbound)
        {
            net_debug!("mpl: not buffering seed {:04x} sequence {}: {}", seed_id, sequence, err);
        }
        Ok(true)
    }

    fn update_seed_set(&mut self, now: Instant, seed_id: u16, sequence: u8) -> Result<()> {
        if self.has_seen(seed_id, sequence) {
            return Error::Already.to_err();
        }

        if self.seed_set.is_full() {
            let oldest = self
                .seed_set
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.lifetime)
                .map(|(idx, _)| idx);
            if let Some(idx) = oldest {
                let evicted = self.seed_set.remove(idx);
                net_debug!(
                    "mpl: seed set full, evicting seed {:04x} sequence {}",
                    evicted.seed_id,
                    evicted.sequence
                );
            }
        }

        self.seed_set.push(SeedEntry {
            seed_id,
            sequence,
            lifetime: self.seed_entry_lifetime,
        });
        if self.seed_set_timer.is_none() {
            self.seed_set_timer = Some(now + SEED_SET_PERIOD);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn add_buffered_message(
        &mut self,
        pool: &mut MessagePool,
        rand: &mut Rand,
        now: Instant,
        message: MessageHandle,
        seed_id: u16,
        sequence: u8,
        is_outbound: bool,
    ) -> Result<()> {
        if self.timer_expirations == 0 {
            return Ok(());
        }

        let copy = pool.clone_full(message)?;
        pool.get_mut(copy).set_origin(Origin::HostTrusted);

        if !is_outbound {
            let hop_limit = pool.get(message).read_u8(HOP_LIMIT_OFFSET)?;
            if hop_limit <= 1 {
                pool.free(copy);
                return Error::Drop.to_err();
            }
            pool.get_mut(copy).write_u8(HOP_LIMIT_OFFSET, hop_limit - 1);
        }

        let interval = rand.rand_range(0, self.interval_ms);
        let metadata = BufferedMetadata {
            seed_id,
            sequence,
            transmission_count: if is_outbound { 1 } else { 0 },
            transmission_time: now + Duration::from_millis(interval as u64),
            interval_offset: interval,
        };
        if let Err(err) = metadata.append_to(&mut pool.get_mut(copy)) {
            pool.free(copy);
            return Err(err);
        }

        pool.enqueue(self.buffered, copy);
        self.retransmission_timer = Some(earliest(self.retransmission_timer, metadata.transmission_time));
        Ok(())
    }

    /// The next instant at which [`poll`](Mpl::poll) has work to do.
    pub(crate) fn poll_at(&self) -> Option<Instant> {
        match (self.seed_set_timer, self.retransmission_timer) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run due timers. Datagrams ready for transmission are put on
    /// `send_queue`; returns whether any were.
    pub(crate) fn poll(
        &mut self,
        pool: &mut MessagePool,
        rand: &mut Rand,
        now: Instant,
        send_queue: QueueId,
    ) -> bool {
        while let Some(at) = self.seed_set_timer {
            if at > now {
                break;
            }
            self.handle_seed_set_timer(at);
        }

        match self.retransmission_timer {
            Some(at) if at <= now => self.handle_retransmission_timer(pool, rand, now, send_queue),
            _ => false,
        }
    }

    fn handle_seed_set_timer(&mut self, at: Instant) {
        for entry in self.seed_set.iter_mut() {
            entry.lifetime = entry.lifetime.saturating_sub(1);
        }
        self.seed_set.retain(|e| e.lifetime > 0);

        self.seed_set_timer = if self.seed_set.is_empty() {
            None
        } else {
            Some(at + SEED_SET_PERIOD)
        };
    }

    fn handle_retransmission_timer(
        &mut self,
        pool: &mut MessagePool,
        rand: &mut Rand,
        now: Instant,
        send_queue: QueueId,
    ) -> bool {
        let mut next: Option<Instant> = None;
        let mut sent = false;

        let mut cur = pool.queue_head(self.buffered);
        while let Some(handle) = cur {
            cur = pool.queue_next(handle);

            let mut metadata = match BufferedMetadata::read_from(&pool.get(handle)) {
                Ok(metadata) => metadata,
                Err(_) => {
                    pool.free(handle);
                    continue;
                }
            };

            if now < metadata.transmission_time {
                next = Some(earliest(next, metadata.transmission_time));
                continue;
            }

            metadata.transmission_count += 1;

            if metadata.transmission_count < self.timer_expirations {
                let len = pool.get(handle).length() - FOOTER_LEN;
                match pool.clone_message(handle, len) {
                    Ok(copy) => {
                        if metadata.transmission_count > 1 {
                            pool.get_mut(copy).set_sub_type(SubType::MplRetransmission);
                        }
                        pool.enqueue(send_queue, copy);
                        sent = true;
                    }
                    Err(err) => net_warn!("mpl: retransmission of seed {:04x} failed: {}", metadata.seed_id, err),
                }

                metadata.generate_next_transmission_time(rand, now, self.interval_ms);
                metadata.update_in(&mut pool.get_mut(handle));
                next = Some(earliest(next, metadata.transmission_time));
            } else {
                pool.dequeue(handle);

                if metadata.transmission_count == self.timer_expirations {
                    if metadata.transmission_count > 1 {
                        pool.get_mut(handle).set_sub_type(SubType::MplRetransmission);
                    }
                    match BufferedMetadata::remove_from(&mut pool.get_mut(handle)) {
                        Ok(()) => {
                            pool.enqueue(send_queue, handle);
                            sent = true;
                        }
                        Err(_) => pool.free(handle),
                    }
                } else {
                    pool.free(handle);
                }
            }
        }

        self.retransmission_timer = next;
        sent
    }
}

fn earliest(current: Option<Instant>, candidate: Instant) -> Instant {
    match current {
        Some(current) => current.min(candidate),
        None => candidate,
    }
}
