//! Intrusive message queues.
//!
//! The links of a queue live in the metadata of its messages, and every
//! message records which queue holds it. Removing a message from its queue
//! is therefore O(1) given only its handle.

use super::{MessageHandle, MessagePool, Priority};

/// Identifier of a queue created by [`MessagePool::new_queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub(super) usize);

/// Ordering discipline of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// First in, first out.
    Fifo,
    /// Strict priority between tiers, first in first out within a tier.
    Priority,
}

#[derive(Debug, Clone)]
pub(super) struct QueueState {
    kind: QueueKind,
    head: Option<MessageHandle>,
    tail: Option<MessageHandle>,
    // Last message of each priority tier, indexed by `Priority::index`.
    tier_tails: [Option<MessageHandle>; Priority::NUM],
    len: usize,
}

impl MessagePool {
    /// Create an empty queue.
    pub fn new_queue(&mut self, kind: QueueKind) -> QueueId {
        self.queues.push(QueueState {
            kind,
            head: None,
            tail: None,
            tier_tails: [None; Priority::NUM],
            len: 0,
        });
        QueueId(self.queues.len() - 1)
    }

    /// The ordering discipline of a queue.
    pub fn queue_kind(&self, qid: QueueId) -> QueueKind {
        self.queues[qid.0].kind
    }

    /// Number of messages in a queue.
    pub fn queue_len(&self, qid: QueueId) -> usize {
        self.queues[qid.0].len
    }

    /// The first message of a queue.
    pub fn queue_head(&self, qid: QueueId) -> Option<MessageHandle> {
        self.queues[qid.0].head
    }

    /// The message following `handle` in its queue.
    pub fn queue_next(&self, handle: MessageHandle) -> Option<MessageHandle> {
        self.meta(handle).next
    }

    /// Iterate over the handles of a queue, head first.
    pub fn queue_iter(&self, qid: QueueId) -> QueueIter<'_> {
        QueueIter {
            pool: self,
            cur: self.queues[qid.0].head,
        }
    }

    /// Add a message at the tail of a queue, or at the tail of its tier for
    /// a priority queue.
    pub fn enqueue(&mut self, qid: QueueId, handle: MessageHandle) {
        self.prepare_enqueue(qid, handle);

        let after = match self.queues[qid.0].kind {
            QueueKind::Fifo => self.queues[qid.0].tail,
            QueueKind::Priority => {
                let tier = self.meta(handle).priority.index();
                self.tier_tail_from(qid, tier)
            }
        };
        self.link_after(qid, after, handle);
    }

    /// Add a message at the head of a queue, or at the head of its tier for
    /// a priority queue.
    pub fn enqueue_at_head(&mut self, qid: QueueId, handle: MessageHandle) {
        self.prepare_enqueue(qid, handle);

        let after = match self.queues[qid.0].kind {
            QueueKind::Fifo => None,
            QueueKind::Priority => {
                let tier = self.meta(handle).priority.index();
                self.tier_tail_from(qid, tier + 1)
            }
        };
        self.link_after(qid, after, handle);
    }

    /// Remove a message from whatever queue holds it.
    pub fn dequeue(&mut self, handle: MessageHandle) {
        let (qid, prev, next, priority) = {
            let meta = self.meta(handle);
            match meta.queue {
                Some(qid) => (qid, meta.prev, meta.next, meta.priority),
                None => panic!("message is not queued"),
            }
        };

        let tier = priority.index();
        if self.queues[qid.0].tier_tails[tier] == Some(handle) {
            let new_tail = prev.filter(|p| self.meta(*p).priority == priority);
            self.queues[qid.0].tier_tails[tier] = new_tail;
        }

        match prev {
            Some(p) => self.meta_mut(p).next = next,
            None => self.queues[qid.0].head = next,
        }
        match next {
            Some(n) => self.meta_mut(n).prev = prev,
            None => self.queues[qid.0].tail = prev,
        }
        self.queues[qid.0].len -= 1;

        let meta = self.meta_mut(handle);
        meta.queue = None;
        meta.prev = None;
        meta.next = None;
    }

    fn prepare_enqueue(&mut self, qid: QueueId, handle: MessageHandle) {
        assert!(self.meta(handle).queue.is_none(), "message already queued");
        self.enqueue_seq += 1;
        let seq = self.enqueue_seq;
        let meta = self.meta_mut(handle);
        meta.queue = Some(qid);
        meta.enqueue_seq = seq;
    }

    // The last message of the lowest non-empty tier at or above `tier`.
    fn tier_tail_from(&self, qid: QueueId, tier: usize) -> Option<MessageHandle> {
        let tails = &self.queues[qid.0].tier_tails;
        (tier..Priority::NUM).find_map(|t| tails[t])
    }

    fn link_after(&mut self, qid: QueueId, after: Option<MessageHandle>, handle: MessageHandle) {
        let next = match after {
            Some(a) => self.meta(a).next,
            None => self.queues[qid.0].head,
        };

        {
            let meta = self.meta_mut(handle);
            meta.prev = after;
            meta.next = next;
        }
        match after {
            Some(a) => self.meta_mut(a).next = Some(handle),
            None => self.queues[qid.0].head = Some(handle),
        }
        match next {
            Some(n) => self.meta_mut(n).prev = Some(handle),
            None => self.queues[qid.0].tail = Some(handle),
        }

        let tier = self.meta(handle).priority.index();
        let queue = &mut self.queues[qid.0];
        queue.len += 1;
        if queue.kind == QueueKind::Priority
            && (queue.tier_tails[tier].is_none() || queue.tier_tails[tier] == after)
        {
            queue.tier_tails[tier] = Some(handle);
        }
    }
}

/// Iterator over the handles of a queue.
#[derive(Debug)]
pub struct QueueIter<'a> {
    pool: &'a MessagePool,
    cur: Option<MessageHandle>,
}

impl<'a> Iterator for QueueIter<'a> {
    type Item = MessageHandle;

    fn next(&mut self) -> Option<MessageHandle> {
        let cur = self.cur?;
        self.cur = self.pool.meta(cur).next;
        Some(cur)
    }
}
