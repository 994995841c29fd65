use bytes::Buf;

use super::pool::{BufferId, BufferPool};

/// A read cursor over the bytes of one message.
///
/// Each [`chunk`](Buf::chunk) is the contiguous part of the message that
/// lives in a single buffer, so checksums and copies walk the chain without
/// gathering it first.
#[derive(Debug, Clone)]
pub struct MessageCursor<'a> {
    pool: &'a BufferPool,
    buffer: Option<BufferId>,
    buffer_off: usize,
    remaining: usize,
}

impl<'a> MessageCursor<'a> {
    pub(crate) fn new(pool: &'a BufferPool, head: BufferId, pos: usize, len: usize) -> Self {
        let (buffer, buffer_off) = pool.locate(head, pos);
        Self {
            pool,
            buffer: Some(buffer),
            buffer_off,
            remaining: len,
        }
    }

    pub(crate) fn empty(pool: &'a BufferPool) -> Self {
        Self {
            pool,
            buffer: None,
            buffer_off: 0,
            remaining: 0,
        }
    }
}

impl<'a> Buf for MessageCursor<'a> {
    #[inline]
    fn remaining(&self) -> usize {
        self.remaining
    }

    #[inline]
    fn chunk(&self) -> &[u8] {
        match self.buffer {
            Some(id) if self.remaining > 0 => {
                let end = self
                    .pool
                    .buffer_size()
                    .min(self.buffer_off + self.remaining);
                &self.pool.data(id)[self.buffer_off..end]
            }
            _ => &[],
        }
    }

    fn advance(&mut self, cnt: usize) {
        assert!(cnt <= self.remaining);
        self.remaining -= cnt;
        self.buffer_off += cnt;

        let size = self.pool.buffer_size();
        while self.buffer_off >= size && self.remaining > 0 {
            self.buffer_off -= size;
            self.buffer = self.buffer.and_then(|id| self.pool.next(id));
        }
    }
}
