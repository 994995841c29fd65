//! The fixed-capacity pool of fixed-size buffers backing every message.

use std::ops::Range;

/// Index of a buffer inside a [`BufferPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u32);

impl BufferId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A pool of `nb_buffers` buffers holding `buffer_size` bytes each.
///
/// Buffers of one message are singly linked through [`BufferPool::next`].
/// The pool never grows: once the free list is empty `allocate` returns
/// `None`.
#[derive(Debug)]
pub struct BufferPool {
    data: Vec<u8>,
    next: Vec<Option<BufferId>>,
    allocated: Vec<bool>,
    free_list: Vec<BufferId>,
    buffer_size: usize,
}

impl BufferPool {
    /// Create a pool.
    pub fn new(nb_buffers: usize, buffer_size: usize) -> Self {
        assert!(buffer_size > 0 && nb_buffers <= u32::MAX as usize);

        // Hand out low indexes first.
        let free_list = (0..nb_buffers as u32).rev().map(BufferId).collect();

        Self {
            data: vec![0; nb_buffers * buffer_size],
            next: vec![None; nb_buffers],
            allocated: vec![false; nb_buffers],
            free_list,
            buffer_size,
        }
    }

    /// Take a buffer out of the pool.
    #[inline]
    pub fn allocate(&mut self) -> Option<BufferId> {
        let id = self.free_list.pop()?;
        self.allocated[id.index()] = true;
        self.next[id.index()] = None;
        Some(id)
    }

    /// Return a buffer to the pool.
    #[inline]
    pub fn free(&mut self, id: BufferId) {
        assert!(self.allocated[id.index()], "buffer freed twice");
        self.allocated[id.index()] = false;
        self.next[id.index()] = None;
        self.free_list.push(id);
    }

    /// Return a whole chain to the pool, returning the number of buffers freed.
    pub fn free_chain(&mut self, head: Option<BufferId>) -> usize {
        let mut cur = head;
        let mut count = 0;
        while let Some(id) = cur {
            cur = self.next[id.index()];
            self.free(id);
            count += 1;
        }
        count
    }

    /// Number of buffers currently in the free list.
    #[inline]
    pub fn free_buffers(&self) -> usize {
        self.free_list.len()
    }

    /// Total number of buffers.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.next.len()
    }

    /// Data bytes held by one buffer.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// The buffer following `id` in its chain.
    #[inline]
    pub fn next(&self, id: BufferId) -> Option<BufferId> {
        self.next[id.index()]
    }

    #[inline]
    pub(crate) fn set_next(&mut self, id: BufferId, next: Option<BufferId>) {
        self.next[id.index()] = next;
    }

    /// The data area of a buffer.
    #[inline]
    pub fn data(&self, id: BufferId) -> &[u8] {
        &self.data[self.range(id)]
    }

    /// The mutable data area of a buffer.
    #[inline]
    pub fn data_mut(&mut self, id: BufferId) -> &mut [u8] {
        let range = self.range(id);
        &mut self.data[range]
    }

    #[inline]
    fn range(&self, id: BufferId) -> Range<usize> {
        let start = id.index() * self.buffer_size;
        start..start + self.buffer_size
    }

    /// The `n`-th buffer of the chain starting at `head`.
    pub(crate) fn nth(&self, head: BufferId, n: usize) -> BufferId {
        let mut id = head;
        for _ in 0..n {
            match self.next(id) {
                Some(next) => id = next,
                None => panic!("buffer chain is shorter than {}", n + 1),
            }
        }
        id
    }

    /// Resolve byte position `pos` of a chain into a buffer and an offset in it.
    #[inline]
    pub(crate) fn locate(&self, head: BufferId, pos: usize) -> (BufferId, usize) {
        (
            self.nth(head, pos / self.buffer_size),
            pos % self.buffer_size,
        )
    }

    /// Copy `bytes` into the chain starting at byte position `pos`.
    pub(crate) fn write_at(&mut self, head: BufferId, pos: usize, mut bytes: &[u8]) {
        let (mut id, mut off) = self.locate(head, pos);
        loop {
            let n = bytes.len().min(self.buffer_size - off);
            let start = id.index() * self.buffer_size + off;
            self.data[start..start + n].copy_from_slice(&bytes[..n]);
            bytes = &bytes[n..];
            if bytes.is_empty() {
                break;
            }
            off = 0;
            id = match self.next(id) {
                Some(next) => next,
                None => panic!("write past the end of a buffer chain"),
            };
        }
    }

    /// Fill `len` bytes of the chain with zero starting at `pos`.
    pub(crate) fn zero_at(&mut self, head: BufferId, pos: usize, mut len: usize) {
        if len == 0 {
            return;
        }
        let (mut id, mut off) = self.locate(head, pos);
        loop {
            let n = len.min(self.buffer_size - off);
            let start = id.index() * self.buffer_size + off;
            self.data[start..start + n].fill(0);
            len -= n;
            if len == 0 {
                break;
            }
            off = 0;
            id = match self.next(id) {
                Some(next) => next,
                None => panic!("write past the end of a buffer chain"),
            };
        }
    }

    /// Copy `len` bytes between two non-overlapping chain regions, one
    /// contiguous span at a time.
    pub(crate) fn copy_between(
        &mut self,
        src_head: BufferId,
        src_pos: usize,
        dst_head: BufferId,
        dst_pos: usize,
        mut len: usize,
    ) {
        if len == 0 {
            return;
        }
        let (mut src, mut src_off) = self.locate(src_head, src_pos);
        let (mut dst, mut dst_off) = self.locate(dst_head, dst_pos);
        loop {
            let n = len
                .min(self.buffer_size - src_off)
                .min(self.buffer_size - dst_off);
            let from = src.index() * self.buffer_size + src_off;
            let to = dst.index() * self.buffer_size + dst_off;
            self.data.copy_within(from..from + n, to);

            len -= n;
            if len == 0 {
                break;
            }
            src_off += n;
            dst_off += n;
            if src_off == self.buffer_size {
                src_off = 0;
                src = self.nth(src, 1);
            }
            if dst_off == self.buffer_size {
                dst_off = 0;
                dst = self.nth(dst, 1);
            }
        }
    }
}
