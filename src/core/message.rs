//! # Message Pool
//!
//! Fixed-capacity message buffers kept in a pre-allocated arena and addressed
//! by generational [`MessageId`] handles.
//!
//! Messages are linked into FIFO [`MessageQueue`]s through index links stored
//! in the pool slots, so a message moves between queues without copying or
//! allocating. A message belongs to at most one queue at a time.
//!
//! ## Lifecycle
//! ```text
//! free ──alloc──▶ owned by caller ──push──▶ queued ──pop──▶ owned ──free──▶ free
//! ```
//! Freeing bumps the slot generation, so stale handles are rejected instead of
//! aliasing a recycled buffer.

use crate::error::{ProtocolError, Result};
use crate::transport::peer::PeerId;

/// Default number of pooled messages
pub const DEFAULT_POOL_SIZE: usize = 1024;

/// Default per-message payload capacity (64 KiB)
pub const DEFAULT_MESSAGE_CAPACITY: usize = 64 * 1024;

const NIL: u32 = u32::MAX;

/// Handle to a pooled message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId {
    index: u32,
    generation: u32,
}

impl MessageId {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// A fixed-capacity message buffer
#[derive(Debug)]
pub struct Message {
    buf: Box<[u8]>,
    size: usize,
    remote: Option<PeerId>,
    generation: u32,
    in_use: bool,
    queued: bool,
    prev: u32,
    next: u32,
}

impl Message {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            size: 0,
            remote: None,
            generation: 0,
            in_use: false,
            queued: false,
            prev: NIL,
            next: NIL,
        }
    }

    /// Committed payload
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.size]
    }

    /// Committed payload size
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Peer the message came from (inbound) or is addressed to (outbound)
    pub fn remote(&self) -> Option<PeerId> {
        self.remote
    }

    pub fn is_queued(&self) -> bool {
        self.queued
    }
}

/// Arena of fixed-capacity messages
#[derive(Debug)]
pub struct MessagePool {
    slots: Vec<Message>,
    free: Vec<u32>,
    capacity: usize,
}

impl MessagePool {
    /// Pre-allocate `count` messages of `capacity` bytes each
    pub fn new(count: usize, capacity: usize) -> Self {
        let slots = (0..count).map(|_| Message::new(capacity)).collect();
        // Reverse so low indices are handed out first
        let free = (0..count as u32).rev().collect();
        Self {
            slots,
            free,
            capacity,
        }
    }

    /// Take a free message. Returns `None` when the pool is exhausted.
    pub fn alloc(&mut self) -> Option<MessageId> {
        let index = self.free.pop()?;
        let slot = &mut self.slots[index as usize];
        slot.in_use = true;
        slot.size = 0;
        slot.remote = None;
        Some(MessageId {
            index,
            generation: slot.generation,
        })
    }

    /// Return a message to the pool. Fails for stale handles and for
    /// messages still linked into a queue.
    pub fn free(&mut self, id: MessageId) -> bool {
        match self.slot_mut(id) {
            Some(slot) if !slot.queued => {
                slot.in_use = false;
                slot.size = 0;
                slot.remote = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        let slot = self.slots.get(id.index as usize)?;
        (slot.in_use && slot.generation == id.generation).then_some(slot)
    }

    fn slot_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        let slot = self.slots.get_mut(id.index as usize)?;
        (slot.in_use && slot.generation == id.generation).then_some(slot)
    }

    /// Whole writable buffer of a message, up to its capacity
    pub fn buffer_mut(&mut self, id: MessageId) -> Option<&mut [u8]> {
        self.slot_mut(id).map(|slot| &mut slot.buf[..])
    }

    /// Set the committed size of a message
    ///
    /// # Errors
    /// `InvalidHandle` for a stale id, `OversizedFrame` if `size` exceeds the capacity.
    pub fn commit(&mut self, id: MessageId, size: usize) -> Result<()> {
        let slot = self.slot_mut(id).ok_or(ProtocolError::InvalidHandle)?;
        if size > slot.buf.len() {
            return Err(ProtocolError::OversizedFrame(size));
        }
        slot.size = size;
        Ok(())
    }

    /// Copy `data` into a message and commit it
    pub fn write(&mut self, id: MessageId, data: &[u8]) -> Result<()> {
        let slot = self.slot_mut(id).ok_or(ProtocolError::InvalidHandle)?;
        if data.len() > slot.buf.len() {
            return Err(ProtocolError::OversizedFrame(data.len()));
        }
        slot.buf[..data.len()].copy_from_slice(data);
        slot.size = data.len();
        Ok(())
    }

    pub fn set_remote(&mut self, id: MessageId, remote: Option<PeerId>) -> bool {
        match self.slot_mut(id) {
            Some(slot) => {
                slot.remote = remote;
                true
            }
            None => false,
        }
    }

    /// Per-message payload capacity
    pub fn message_capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of messages in the pool
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of messages available for `alloc`
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn id_at(&self, index: u32) -> MessageId {
        MessageId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }
}

/// FIFO of pooled messages linked through the pool slots
#[derive(Debug, Clone, Copy)]
pub struct MessageQueue {
    head: u32,
    tail: u32,
    len: usize,
}

impl MessageQueue {
    pub const fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a message. Fails for stale handles and already-queued messages.
    pub fn push_back(&mut self, pool: &mut MessagePool, id: MessageId) -> bool {
        let tail = self.tail;
        match pool.slot_mut(id) {
            Some(slot) if !slot.queued => {
                slot.queued = true;
                slot.prev = tail;
                slot.next = NIL;
            }
            _ => return false,
        }
        if tail == NIL {
            self.head = id.index;
        } else {
            pool.slots[tail as usize].next = id.index;
        }
        self.tail = id.index;
        self.len += 1;
        true
    }

    pub fn front(&self, pool: &MessagePool) -> Option<MessageId> {
        (self.head != NIL).then(|| pool.id_at(self.head))
    }

    /// Unlink and return the oldest message; ownership passes to the caller.
    pub fn pop_front(&mut self, pool: &mut MessagePool) -> Option<MessageId> {
        if self.head == NIL {
            return None;
        }
        let index = self.head;
        let slot = &mut pool.slots[index as usize];
        let next = slot.next;
        slot.queued = false;
        slot.prev = NIL;
        slot.next = NIL;

        self.head = next;
        if next == NIL {
            self.tail = NIL;
        } else {
            pool.slots[next as usize].prev = NIL;
        }
        self.len -= 1;
        Some(pool.id_at(index))
    }

    /// Return every queued message to the pool
    pub fn release_all(&mut self, pool: &mut MessagePool) -> usize {
        let mut released = 0;
        while let Some(id) = self.pop_front(pool) {
            if pool.free(id) {
                released += 1;
            }
        }
        released
    }

    /// Ids in queue order
    pub fn ids(&self, pool: &MessagePool) -> Vec<MessageId> {
        let mut out = Vec::with_capacity(self.len);
        let mut cur = self.head;
        while cur != NIL {
            out.push(pool.id_at(cur));
            cur = pool.slots[cur as usize].next;
        }
        out
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}
