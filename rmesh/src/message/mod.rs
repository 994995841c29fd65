//! Messages: packets stored as chains of pool buffers.
//!
//! A [`MessagePool`] owns both the buffers and the metadata of every message.
//! Messages are addressed through copyable [`MessageHandle`]s; reading and
//! writing goes through the short-lived [`Message`] and [`MessageMut`] views
//! returned by [`MessagePool::get`] and [`MessagePool::get_mut`].
//!
//! The byte space of a message is `reserved + length` bytes long. The
//! reserved part sits in front of the data so that lower layers can prepend
//! their headers without moving the payload.

use crate::conf::PoolConf;
use crate::error::{Error, Result};
use crate::time::Instant;

mod cursor;
pub use cursor::MessageCursor;

pub mod pool;
use pool::{BufferId, BufferPool};

mod queue;
pub use queue::{QueueId, QueueIter, QueueKind};

/// Handle of a message inside its [`MessagePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageHandle(u32);

impl MessageHandle {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// A full IPv6 datagram.
    Ip6,
    /// A 6LoWPAN frame.
    SixLowpan,
    /// A supervision frame for a child.
    Supervision,
    /// Anything else.
    Other,
}

/// Protocol-specific tag attached by the layer that created the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubType {
    /// No tag.
    None,
    /// Generic MLE message.
    MleGeneral,
    /// MLE announce.
    MleAnnounce,
    /// MLE discover request.
    MleDiscoverRequest,
    /// MLE discover response.
    MleDiscoverResponse,
    /// MLE child update request.
    MleChildUpdateRequest,
    /// MLE data response.
    MleDataResponse,
    /// A retransmission scheduled by the MPL engine.
    MplRetransmission,
}

/// Message priority, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Bulk traffic.
    Low = 0,
    /// Default priority.
    Normal = 1,
    /// Network control traffic.
    Net = 2,
    /// Latency sensitive traffic.
    High = 3,
}

impl Priority {
    /// Number of priority tiers.
    pub const NUM: usize = 4;

    /// All priorities, lowest first.
    pub const ALL: [Priority; Priority::NUM] = [
        Priority::Low,
        Priority::Normal,
        Priority::Net,
        Priority::High,
    ];

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Where a message entered the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Received from the mesh.
    ThreadNetif,
    /// Created by the stack or a trusted host.
    HostTrusted,
    /// Injected by an untrusted host.
    HostUntrusted,
}

/// Link layer context whose meaning depends on the message sub-type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkInfo {
    /// No link context.
    None,
    /// The PAN identifier a frame is sent on.
    PanId(u16),
    /// The channel an announce or discovery is sent on.
    Channel(u8),
}

/// Settings applied when allocating a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSettings {
    /// Enable link security.
    pub link_security: bool,
    /// Priority of the message.
    pub priority: Priority,
}

impl MessageSettings {
    /// Create settings.
    pub fn new(link_security: bool, priority: Priority) -> Self {
        Self {
            link_security,
            priority,
        }
    }
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            link_security: true,
            priority: Priority::Normal,
        }
    }
}

const RSS_INVALID: i8 = 127;
const AVERAGE_WINDOW: u16 = 8;
const PRECISION_SHIFT: u16 = 3;

/// Running average of received signal strength, in dBm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RssAverager {
    average: u16,
    count: u16,
}

impl RssAverager {
    /// Add a sample; the reserved value 127 is ignored.
    pub fn add(&mut self, rss: i8) {
        if rss == RSS_INVALID || rss > 0 {
            return;
        }
        let sample = (-(rss as i16) as u16) << PRECISION_SHIFT;
        if self.count < AVERAGE_WINDOW {
            self.count += 1;
        }
        self.average = (self.average * (self.count - 1) + sample) / self.count;
    }

    /// The current average, `None` before the first sample.
    pub fn average(&self) -> Option<i8> {
        if self.count == 0 {
            return None;
        }
        let rounded = (self.average + (1 << (PRECISION_SHIFT - 1))) >> PRECISION_SHIFT;
        Some(-(rounded as i16) as i8)
    }
}

/// Running average of link quality indicators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LqiAverager {
    average: u16,
    count: u16,
}

impl LqiAverager {
    /// Add a sample.
    pub fn add(&mut self, lqi: u8) {
        if self.count < AVERAGE_WINDOW {
            self.count += 1;
        }
        self.average = (self.average * (self.count - 1) + lqi as u16) / self.count;
    }

    /// The current average, zero before the first sample.
    pub fn average(&self) -> u8 {
        self.average as u8
    }
}

#[derive(Debug, Clone)]
struct MessageMeta {
    in_use: bool,
    released: bool,
    head: Option<BufferId>,
    nb_buffers: usize,
    reserved: usize,
    length: usize,
    offset: usize,

    msg_type: MessageType,
    sub_type: SubType,
    priority: Priority,
    origin: Origin,
    link_info: LinkInfo,
    mesh_dest: u16,
    child_mask: u64,
    timeout: u8,
    timestamp: Instant,
    link_security: bool,
    multicast_loop: bool,
    rss: RssAverager,
    lqi: LqiAverager,
    datagram_tag: u32,

    queue: Option<QueueId>,
    prev: Option<MessageHandle>,
    next: Option<MessageHandle>,
    enqueue_seq: u64,
}

impl MessageMeta {
    fn vacant() -> Self {
        Self {
            in_use: false,
            released: false,
            head: None,
            nb_buffers: 0,
            reserved: 0,
            length: 0,
            offset: 0,
            msg_type: MessageType::Other,
            sub_type: SubType::None,
            priority: Priority::Normal,
            origin: Origin::HostTrusted,
            link_info: LinkInfo::None,
            mesh_dest: 0,
            child_mask: 0,
            timeout: 0,
            timestamp: Instant::ZERO,
            link_security: false,
            multicast_loop: false,
            rss: RssAverager::default(),
            lqi: LqiAverager::default(),
            datagram_tag: 0,
            queue: None,
            prev: None,
            next: None,
            enqueue_seq: 0,
        }
    }
}

/// Owner of all buffers, message metadata and message queues.
#[derive(Debug)]
pub struct MessagePool {
    buffers: BufferPool,
    slots: Vec<MessageMeta>,
    free_slots: Vec<MessageHandle>,
    queues: Vec<queue::QueueState>,
    evict_on_exhaustion: bool,
    enqueue_seq: u64,
}

impl MessagePool {
    /// Create a pool from its configuration.
    pub fn new(conf: &PoolConf) -> Self {
        Self {
            buffers: BufferPool::new(conf.nb_buffers, conf.buffer_size),
            slots: Vec::new(),
            free_slots: Vec::new(),
            queues: Vec::new(),
            evict_on_exhaustion: conf.evict_on_exhaustion,
            enqueue_seq: 0,
        }
    }

    /// Number of buffers in the free list.
    #[inline]
    pub fn free_buffers(&self) -> usize {
        self.buffers.free_buffers()
    }

    /// Total number of buffers.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffers.capacity()
    }

    /// Data bytes held by one buffer.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffers.buffer_size()
    }

    /// Number of live messages, including those waiting on children.
    pub fn nb_messages(&self) -> usize {
        self.slots.len() - self.free_slots.len()
    }

    /// Allocate a message with `reserve` bytes of header room and no data.
    pub fn allocate(
        &mut self,
        msg_type: MessageType,
        reserve: usize,
        settings: MessageSettings,
    ) -> Result<MessageHandle> {
        let nb_buffers = self.buffers_for(reserve);
        let head = self.alloc_chain(nb_buffers, settings.priority, None)?;

        let mut meta = MessageMeta::vacant();
        meta.in_use = true;
        meta.head = Some(head);
        meta.nb_buffers = nb_buffers;
        meta.reserved = reserve;
        meta.msg_type = msg_type;
        meta.priority = settings.priority;
        meta.link_security = settings.link_security;

        let handle = match self.free_slots.pop() {
            Some(handle) => {
                self.slots[handle.index()] = meta;
                handle
            }
            None => {
                self.slots.push(meta);
                MessageHandle((self.slots.len() - 1) as u32)
            }
        };
        Ok(handle)
    }

    /// Free a message, removing it from its queue first.
    ///
    /// A message still pending for sleepy children is only marked released;
    /// its buffers return to the pool once the last child bit is cleared.
    ///
    /// Freeing a message that is already free or released does nothing.
    pub fn free(&mut self, handle: MessageHandle) {
        let meta = self.meta(handle);
        if !meta.in_use || meta.released {
            net_warn!("message {:?} freed twice", handle);
            return;
        }
        if meta.queue.is_some() {
            self.dequeue(handle);
        }

        let meta = self.meta_mut(handle);
        if meta.child_mask != 0 {
            meta.released = true;
            return;
        }
        self.release(handle);
    }

    /// Mark child `index` as still needing this message.
    pub fn set_child(&mut self, handle: MessageHandle, index: u8) {
        assert!(index < 64);
        self.meta_mut(handle).child_mask |= 1 << index;
    }

    /// Mark child `index` as served. Frees a released message once no child
    /// is pending.
    pub fn clear_child(&mut self, handle: MessageHandle, index: u8) {
        assert!(index < 64);
        let meta = self.meta_mut(handle);
        meta.child_mask &= !(1 << index);
        if meta.child_mask == 0 && meta.released {
            self.release(handle);
        }
    }

    /// A read-only view of a message.
    #[inline]
    pub fn get(&self, handle: MessageHandle) -> Message<'_> {
        assert!(self.slots[handle.index()].in_use, "stale message handle");
        Message { pool: self, handle }
    }

    /// A mutable view of a message.
    #[inline]
    pub fn get_mut(&mut self, handle: MessageHandle) -> MessageMut<'_> {
        assert!(self.slots[handle.index()].in_use, "stale message handle");
        MessageMut { pool: self, handle }
    }

    /// Copy the first `len` bytes of a message into a new message of the same
    /// type, priority, security, origin and offset.
    pub fn clone_message(&mut self, handle: MessageHandle, len: usize) -> Result<MessageHandle> {
        let src = self.meta(handle).clone();
        assert!(len <= src.length);

        let copy = self.allocate(
            src.msg_type,
            src.reserved,
            MessageSettings::new(src.link_security, src.priority),
        )?;
        if let Err(err) = self.get_mut(copy).set_length(len) {
            self.free(copy);
            return Err(err);
        }
        self.copy_bytes(handle, 0, copy, 0, len);

        let meta = self.meta_mut(copy);
        meta.offset = src.offset.min(len);
        meta.sub_type = src.sub_type;
        meta.origin = src.origin;
        meta.link_info = src.link_info;
        meta.mesh_dest = src.mesh_dest;
        meta.timestamp = src.timestamp;
        meta.multicast_loop = src.multicast_loop;
        meta.rss = src.rss;
        meta.lqi = src.lqi;
        meta.datagram_tag = src.datagram_tag;
        Ok(copy)
    }

    /// Clone a whole message.
    pub fn clone_full(&mut self, handle: MessageHandle) -> Result<MessageHandle> {
        let len = self.meta(handle).length;
        self.clone_message(handle, len)
    }

    /// Copy `len` bytes from `src` at `src_off` into `dst` at `dst_off`.
    ///
    /// Both regions must already exist; the destination is never resized.
    pub fn copy_bytes(
        &mut self,
        src: MessageHandle,
        src_off: usize,
        dst: MessageHandle,
        dst_off: usize,
        len: usize,
    ) {
        if len == 0 {
            return;
        }
        let (src_head, src_pos) = self.position(src, src_off, len);
        let (dst_head, dst_pos) = self.position(dst, dst_off, len);

        if src == dst {
            let mut tmp = vec![0; len];
            self.get(src).read(src_off, &mut tmp);
            self.buffers.write_at(dst_head, dst_pos, &tmp);
        } else {
            self.buffers
                .copy_between(src_head, src_pos, dst_head, dst_pos, len);
        }
    }

    fn position(&self, handle: MessageHandle, off: usize, len: usize) -> (BufferId, usize) {
        let meta = self.meta(handle);
        assert!(off + len <= meta.length, "region past message end");
        match meta.head {
            Some(head) => (head, meta.reserved + off),
            None => panic!("message without buffers"),
        }
    }

    #[inline]
    fn meta(&self, handle: MessageHandle) -> &MessageMeta {
        &self.slots[handle.index()]
    }

    #[inline]
    fn meta_mut(&mut self, handle: MessageHandle) -> &mut MessageMeta {
        &mut self.slots[handle.index()]
    }

    fn buffers_for(&self, bytes: usize) -> usize {
        let size = self.buffers.buffer_size();
        ((bytes + size - 1) / size).max(1)
    }

    fn release(&mut self, handle: MessageHandle) {
        let head = self.meta_mut(handle).head.take();
        self.buffers.free_chain(head);
        self.slots[handle.index()] = MessageMeta::vacant();
        self.free_slots.push(handle);
    }

    // Allocate `count` linked buffers, evicting lower priority messages when
    // allowed. Nothing is kept on failure.
    fn alloc_chain(
        &mut self,
        count: usize,
        priority: Priority,
        requester: Option<MessageHandle>,
    ) -> Result<BufferId> {
        let mut head: Option<BufferId> = None;
        let mut tail: Option<BufferId> = None;

        for _ in 0..count {
            let id = loop {
                if let Some(id) = self.buffers.allocate() {
                    break Some(id);
                }
                if !(self.evict_on_exhaustion && self.evict(priority, requester)) {
                    break None;
                }
            };

            match id {
                Some(id) => {
                    match tail {
                        Some(t) => self.buffers.set_next(t, Some(id)),
                        None => head = Some(id),
                    }
                    tail = Some(id);
                }
                None => {
                    self.buffers.free_chain(head);
                    net_warn!("buffer pool exhausted ({} buffers)", self.buffers.capacity());
                    return Error::NoBufs.to_err();
                }
            }
        }

        match head {
            Some(head) => Ok(head),
            None => Error::InvalidArgs.to_err(),
        }
    }

    // Free the oldest queued message of the lowest tier strictly below
    // `priority`. Only priority queues are scanned and messages still pending
    // for children are skipped.
    fn evict(&mut self, priority: Priority, requester: Option<MessageHandle>) -> bool {
        let mut victim: Option<(Priority, u64, MessageHandle)> = None;

        for qid in 0..self.queues.len() {
            let qid = QueueId(qid);
            if self.queue_kind(qid) != QueueKind::Priority {
                continue;
            }
            for handle in self.queue_iter(qid) {
                let meta = self.meta(handle);
                if meta.priority >= priority || meta.child_mask != 0 || Some(handle) == requester
                {
                    continue;
                }
                let key = (meta.priority, meta.enqueue_seq, handle);
                if victim.map_or(true, |v| (key.0, key.1) < (v.0, v.1)) {
                    victim = Some(key);
                }
            }
        }

        match victim {
            Some((victim_priority, _, handle)) => {
                net_debug!(
                    "evicting {:?} message {:?} for a {:?} allocation",
                    victim_priority,
                    handle,
                    priority
                );
                self.free(handle);
                true
            }
            None => false,
        }
    }
}

/// A read-only view of one message.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    pool: &'a MessagePool,
    handle: MessageHandle,
}

impl<'a> Message<'a> {
    #[inline]
    fn meta(&self) -> &'a MessageMeta {
        &self.pool.slots[self.handle.index()]
    }

    /// The handle of the message.
    #[inline]
    pub fn handle(&self) -> MessageHandle {
        self.handle
    }

    /// Number of data bytes.
    #[inline]
    pub fn length(&self) -> usize {
        self.meta().length
    }

    /// The parse offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.meta().offset
    }

    /// Header room left in front of the data.
    #[inline]
    pub fn reserved(&self) -> usize {
        self.meta().reserved
    }

    /// Number of buffers held.
    #[inline]
    pub fn nb_buffers(&self) -> usize {
        self.meta().nb_buffers
    }

    /// The message type.
    #[inline]
    pub fn msg_type(&self) -> MessageType {
        self.meta().msg_type
    }

    /// The sub-type tag.
    #[inline]
    pub fn sub_type(&self) -> SubType {
        self.meta().sub_type
    }

    /// The priority.
    #[inline]
    pub fn priority(&self) -> Priority {
        self.meta().priority
    }

    /// Where the message entered the stack.
    #[inline]
    pub fn origin(&self) -> Origin {
        self.meta().origin
    }

    /// Link layer context.
    #[inline]
    pub fn link_info(&self) -> LinkInfo {
        self.meta().link_info
    }

    /// Mesh destination short address.
    #[inline]
    pub fn mesh_dest(&self) -> u16 {
        self.meta().mesh_dest
    }

    /// Children that still need this message.
    #[inline]
    pub fn child_mask(&self) -> u64 {
        self.meta().child_mask
    }

    /// Whether any child still needs this message.
    #[inline]
    pub fn is_child_pending(&self) -> bool {
        self.meta().child_mask != 0
    }

    /// The timeout counter.
    #[inline]
    pub fn timeout(&self) -> u8 {
        self.meta().timeout
    }

    /// The timestamp.
    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.meta().timestamp
    }

    /// Whether link security is enabled.
    #[inline]
    pub fn link_security(&self) -> bool {
        self.meta().link_security
    }

    /// Whether a multicast copy is looped back to the local host.
    #[inline]
    pub fn multicast_loop(&self) -> bool {
        self.meta().multicast_loop
    }

    /// Received signal strength average.
    #[inline]
    pub fn rss_averager(&self) -> RssAverager {
        self.meta().rss
    }

    /// Link quality average.
    #[inline]
    pub fn lqi_averager(&self) -> LqiAverager {
        self.meta().lqi
    }

    /// Fragmentation correlation tag.
    #[inline]
    pub fn datagram_tag(&self) -> u32 {
        self.meta().datagram_tag
    }

    /// The queue holding the message, if any.
    #[inline]
    pub fn queue(&self) -> Option<QueueId> {
        self.meta().queue
    }

    /// Whether the message sits in a queue.
    #[inline]
    pub fn is_queued(&self) -> bool {
        self.meta().queue.is_some()
    }

    /// Copy bytes starting at `offset` into `buf`, returning how many were
    /// available.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> usize {
        let len = self.length();
        if offset >= len {
            return 0;
        }
        let n = buf.len().min(len - offset);
        let mut cursor = self.cursor_at(offset, n);
        bytes::Buf::copy_to_slice(&mut cursor, &mut buf[..n]);
        n
    }

    /// Fill `buf` from `offset`, failing with `Parse` if the message is too short.
    pub fn read_exact(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        if self.read(offset, buf) != buf.len() {
            return Error::Parse.to_err();
        }
        Ok(())
    }

    /// Read a fixed-size array at `offset`.
    pub fn read_array<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let mut buf = [0; N];
        self.read_exact(offset, &mut buf)?;
        Ok(buf)
    }

    /// Read one byte at `offset`.
    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        Ok(self.read_array::<1>(offset)?[0])
    }

    /// A cursor over the whole message.
    pub fn cursor(&self) -> MessageCursor<'a> {
        self.cursor_at(0, self.length())
    }

    /// A cursor over `len` bytes starting at `offset`.
    pub fn cursor_at(&self, offset: usize, len: usize) -> MessageCursor<'a> {
        let meta = self.meta();
        assert!(offset + len <= meta.length);
        match meta.head {
            Some(head) if len > 0 => {
                MessageCursor::new(&self.pool.buffers, head, meta.reserved + offset, len)
            }
            _ => MessageCursor::empty(&self.pool.buffers),
        }
    }

    /// Gather the message into a vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0; self.length()];
        self.read(0, &mut out);
        out
    }
}

/// A mutable view of one message.
#[derive(Debug)]
pub struct MessageMut<'a> {
    pool: &'a mut MessagePool,
    handle: MessageHandle,
}

impl<'a> MessageMut<'a> {
    #[inline]
    fn meta(&self) -> &MessageMeta {
        &self.pool.slots[self.handle.index()]
    }

    #[inline]
    fn meta_mut(&mut self) -> &mut MessageMeta {
        &mut self.pool.slots[self.handle.index()]
    }

    /// A read-only view of the same message.
    #[inline]
    pub fn as_ref(&self) -> Message<'_> {
        Message {
            pool: self.pool,
            handle: self.handle,
        }
    }

    /// The handle of the message.
    #[inline]
    pub fn handle(&self) -> MessageHandle {
        self.handle
    }

    /// Number of data bytes.
    #[inline]
    pub fn length(&self) -> usize {
        self.meta().length
    }

    /// The parse offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.meta().offset
    }

    /// Grow or shrink the message to `len` bytes.
    ///
    /// Growing allocates every missing buffer before touching the chain, so
    /// on `NoBufs` the message is left exactly as it was.
    pub fn set_length(&mut self, len: usize) -> Result<()> {
        let handle = self.handle;
        let (head, nb_buffers, reserved, priority) = {
            let meta = self.meta();
            (meta.head, meta.nb_buffers, meta.reserved, meta.priority)
        };
        let head = match head {
            Some(head) => head,
            None => return Error::InvalidArgs.to_err(),
        };
        let needed = self.pool.buffers_for(reserved + len);

        if needed > nb_buffers {
            let extra = self
                .pool
                .alloc_chain(needed - nb_buffers, priority, Some(handle))?;
            let tail = self.pool.buffers.nth(head, nb_buffers - 1);
            self.pool.buffers.set_next(tail, Some(extra));
        } else if needed < nb_buffers {
            let last = self.pool.buffers.nth(head, needed - 1);
            let rest = self.pool.buffers.next(last);
            self.pool.buffers.set_next(last, None);
            self.pool.buffers.free_chain(rest);
        }

        let meta = self.meta_mut();
        meta.nb_buffers = needed;
        meta.length = len;
        meta.offset = meta.offset.min(len);
        Ok(())
    }

    /// Append `bytes` at the end of the message.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let old_len = self.length();
        self.set_length(old_len + bytes.len())?;
        self.write(old_len, bytes);
        Ok(())
    }

    /// Append `len` zero bytes.
    pub fn append_zeroed(&mut self, len: usize) -> Result<()> {
        let old_len = self.length();
        self.set_length(old_len + len)?;
        self.zero(old_len, len);
        Ok(())
    }

    /// Put `bytes` in front of the data, using the reserved header room.
    ///
    /// The offset moves with the data it pointed at.
    pub fn prepend(&mut self, bytes: &[u8]) -> Result<()> {
        self.grow_front(bytes.len())?;
        self.write(0, bytes);
        Ok(())
    }

    /// Put `len` zero bytes in front of the data.
    pub fn prepend_zeroed(&mut self, len: usize) -> Result<()> {
        self.grow_front(len)?;
        self.zero(0, len);
        Ok(())
    }

    fn grow_front(&mut self, len: usize) -> Result<()> {
        let meta = self.meta_mut();
        if len > meta.reserved {
            return Error::NoBufs.to_err();
        }
        meta.reserved -= len;
        meta.length += len;
        meta.offset += len;
        Ok(())
    }

    /// Drop `len` bytes from the front of the message, turning them back into
    /// reserved header room.
    pub fn remove_header(&mut self, len: usize) {
        let meta = self.meta_mut();
        assert!(len <= meta.length);
        meta.reserved += len;
        meta.length -= len;
        meta.offset = meta.offset.saturating_sub(len);
    }

    /// Open a gap of `len` zero bytes at `offset`, shifting the first
    /// `offset` bytes towards the front.
    pub fn insert_header(&mut self, offset: usize, len: usize) -> Result<()> {
        assert!(offset <= self.length());
        self.prepend_zeroed(len)?;
        let handle = self.handle;
        self.pool.copy_bytes(handle, len, handle, 0, offset);
        self.zero(offset, len);
        Ok(())
    }

    /// Remove `len` bytes at `offset`, shifting the first `offset` bytes
    /// towards the back.
    pub fn remove_header_at(&mut self, offset: usize, len: usize) {
        assert!(offset + len <= self.length());
        let handle = self.handle;
        self.pool.copy_bytes(handle, 0, handle, len, offset);
        self.remove_header(len);
    }

    /// Overwrite bytes at `offset`. The region must already exist.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let (head, pos) = self.pool.position(self.handle, offset, bytes.len());
        self.pool.buffers.write_at(head, pos, bytes);
    }

    /// Overwrite one byte at `offset`.
    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.write(offset, &[value]);
    }

    fn zero(&mut self, offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        let (head, pos) = self.pool.position(self.handle, offset, len);
        self.pool.buffers.zero_at(head, pos, len);
    }

    /// Set the parse offset.
    pub fn set_offset(&mut self, offset: usize) {
        let meta = self.meta_mut();
        assert!(offset <= meta.length);
        meta.offset = offset;
    }

    /// Move the parse offset forward by `delta` bytes.
    pub fn move_offset(&mut self, delta: usize) {
        let offset = self.offset() + delta;
        self.set_offset(offset);
    }

    /// Change the priority, moving the message to the tail of its new tier
    /// if it sits in a priority queue.
    pub fn set_priority(&mut self, priority: Priority) {
        let handle = self.handle;
        match self.meta().queue {
            Some(qid) if self.pool.queue_kind(qid) == QueueKind::Priority => {
                self.pool.dequeue(handle);
                self.meta_mut().priority = priority;
                self.pool.enqueue(qid, handle);
            }
            _ => self.meta_mut().priority = priority,
        }
    }

    /// Set the message type.
    pub fn set_msg_type(&mut self, msg_type: MessageType) {
        self.meta_mut().msg_type = msg_type;
    }

    /// Set the sub-type tag.
    pub fn set_sub_type(&mut self, sub_type: SubType) {
        self.meta_mut().sub_type = sub_type;
    }

    /// Set where the message entered the stack.
    pub fn set_origin(&mut self, origin: Origin) {
        self.meta_mut().origin = origin;
    }

    /// Set the link layer context.
    pub fn set_link_info(&mut self, link_info: LinkInfo) {
        self.meta_mut().link_info = link_info;
    }

    /// Set the mesh destination.
    pub fn set_mesh_dest(&mut self, mesh_dest: u16) {
        self.meta_mut().mesh_dest = mesh_dest;
    }

    /// Set the timeout counter.
    pub fn set_timeout(&mut self, timeout: u8) {
        self.meta_mut().timeout = timeout;
    }

    /// Decrement the timeout counter, saturating at zero.
    pub fn decrement_timeout(&mut self) {
        let meta = self.meta_mut();
        meta.timeout = meta.timeout.saturating_sub(1);
    }

    /// Set the timestamp.
    pub fn set_timestamp(&mut self, timestamp: Instant) {
        self.meta_mut().timestamp = timestamp;
    }

    /// Enable or disable link security.
    pub fn set_link_security(&mut self, enabled: bool) {
        self.meta_mut().link_security = enabled;
    }

    /// Loop multicast copies back to the local host.
    pub fn set_multicast_loop(&mut self, enabled: bool) {
        self.meta_mut().multicast_loop = enabled;
    }

    /// Feed a received signal strength sample.
    pub fn add_rss(&mut self, rss: i8) {
        self.meta_mut().rss.add(rss);
    }

    /// Feed a link quality sample.
    pub fn add_lqi(&mut self, lqi: u8) {
        self.meta_mut().lqi.add(lqi);
    }

    /// Set the fragmentation correlation tag.
    pub fn set_datagram_tag(&mut self, tag: u32) {
        self.meta_mut().datagram_tag = tag;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(nb_buffers: usize) -> MessagePool {
        let mut conf = PoolConf::new();
        conf.set_nb_buffers(nb_buffers);
        conf.set_buffer_size(32);
        MessagePool::new(&conf)
    }

    #[test]
    fn prepend_needs_reserved_room() {
        let mut pool = pool(8);
        let msg = pool
            .allocate(MessageType::Ip6, 4, MessageSettings::default())
            .unwrap();
        pool.get_mut(msg).append(&[5, 6]).unwrap();
        pool.get_mut(msg).set_offset(1);

        pool.get_mut(msg).prepend(&[1, 2, 3, 4]).unwrap();
        assert_eq!(pool.get(msg).to_vec(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(pool.get(msg).offset(), 5);
        assert_eq!(pool.get_mut(msg).prepend(&[0]), Err(Error::NoBufs));

        pool.get_mut(msg).remove_header(4);
        assert_eq!(pool.get(msg).to_vec(), vec![5, 6]);
        assert_eq!(pool.get(msg).offset(), 1);
    }

    #[test]
    fn insert_and_remove_inner_header() {
        let mut pool = pool(8);
        let msg = pool
            .allocate(MessageType::Ip6, 40, MessageSettings::default())
            .unwrap();
        let data: Vec<u8> = (0..70).collect();
        pool.get_mut(msg).append(&data).unwrap();

        pool.get_mut(msg).insert_header(10, 8).unwrap();
        let bytes = pool.get(msg).to_vec();
        assert_eq!(&bytes[..10], &data[..10]);
        assert_eq!(&bytes[10..18], &[0; 8]);
        assert_eq!(&bytes[18..], &data[10..]);

        pool.get_mut(msg).remove_header_at(10, 8);
        assert_eq!(pool.get(msg).to_vec(), data);
    }

    #[test]
    fn child_pending_defers_free() {
        let mut pool = pool(2);
        let msg = pool
            .allocate(MessageType::Ip6, 0, MessageSettings::default())
            .unwrap();
        pool.set_child(msg, 3);
        pool.free(msg);
        assert_eq!(pool.free_buffers(), 1);
        assert!(pool.get(msg).is_child_pending());

        pool.clear_child(msg, 3);
        assert_eq!(pool.free_buffers(), 2);
        assert_eq!(pool.nb_messages(), 0);
    }

    #[test]
    fn second_free_is_ignored() {
        let mut pool = pool(4);
        let first = pool
            .allocate(MessageType::Ip6, 0, MessageSettings::default())
            .unwrap();
        pool.free(first);
        pool.free(first);
        assert_eq!(pool.free_buffers(), 4);

        let a = pool
            .allocate(MessageType::Ip6, 0, MessageSettings::default())
            .unwrap();
        let b = pool
            .allocate(MessageType::Ip6, 0, MessageSettings::default())
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.nb_messages(), 2);

        let c = pool
            .allocate(MessageType::Ip6, 0, MessageSettings::default())
            .unwrap();
        pool.set_child(c, 1);
        pool.free(c);
        pool.free(c);
        pool.clear_child(c, 1);
        assert_eq!(pool.nb_messages(), 2);
        assert_eq!(pool.free_buffers(), 2);
    }

    #[test]
    fn rss_average_converges() {
        let mut avg = RssAverager::default();
        assert_eq!(avg.average(), None);
        avg.add(-40);
        assert_eq!(avg.average(), Some(-40));
        avg.add(127);
        avg.add(-60);
        assert_eq!(avg.average(), Some(-50));
    }
}
