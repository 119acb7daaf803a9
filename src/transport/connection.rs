//! Pooled connection slots.
//!
//! All `max_open` slots are created when the engine opens. A slot is always
//! in exactly one of three lists:
//!
//! - **free**: no socket, ready to be handed out
//! - **securing**: socket live, identity handshake in progress
//! - **open**: handshake complete, carrying application traffic
//!
//! Each slot remembers its position in its list so moves are O(1)
//! (`swap_remove` plus a position fix-up for the moved element).

use std::net::SocketAddr;
use std::time::Instant;

use mio::net::TcpStream;

use crate::core::frame::{FrameReader, FrameWriter};
use crate::core::message::{MessagePool, MessageQueue};
use crate::protocol::handshake::{HandshakeEvent, Status};
use crate::transport::peer::PeerId;

/// Index of a connection slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub(crate) usize);

impl ConnId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Which pool list a slot is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Free,
    Securing,
    Open,
}

/// One pooled socket and its per-connection protocol state
#[derive(Debug)]
pub struct Connection {
    pub(crate) stream: Option<TcpStream>,
    pub(crate) last_io: Instant,
    pub(crate) status: Status,
    pub(crate) peer_addr: Option<SocketAddr>,
    /// Bound peer once the handshake completed
    pub(crate) address: Option<PeerId>,
    /// Peer being dialed (connect side) or identified (accept side)
    pub(crate) target: Option<PeerId>,
    pub(crate) outbound: MessageQueue,
    pub(crate) reader: FrameReader,
    pub(crate) writer: FrameWriter,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    membership: Membership,
    position: usize,
}

impl Connection {
    fn vacant(position: usize) -> Self {
        Self {
            stream: None,
            last_io: Instant::now(),
            status: Status::accept(),
            peer_addr: None,
            address: None,
            target: None,
            outbound: MessageQueue::new(),
            reader: FrameReader::new(),
            writer: FrameWriter::new(),
            readable: false,
            writable: false,
            membership: Membership::Free,
            position,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn membership(&self) -> Membership {
        self.membership
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn address(&self) -> Option<PeerId> {
        self.address
    }

    pub fn pending_messages(&self) -> usize {
        self.outbound.len()
    }

    /// Feed an event to the status machine. An illegal event closes the
    /// connection and is reported back as an error.
    pub(crate) fn advance(&mut self, event: HandshakeEvent) -> crate::error::Result<()> {
        match self.status.apply(event) {
            Ok(next) => {
                self.status = next;
                Ok(())
            }
            Err(e) => {
                self.fault();
                Err(e)
            }
        }
    }

    /// Mark the connection for reaping
    pub(crate) fn fault(&mut self) {
        if let Ok(closed) = self.status.apply(HandshakeEvent::Fault) {
            self.status = closed;
        }
    }

    /// Read and write interest derived from the status
    pub fn interest(&self) -> (bool, bool) {
        (
            self.status.wants_read(),
            self.status.wants_write(!self.outbound.is_empty()),
        )
    }

    pub(crate) fn touch(&mut self) {
        self.last_io = Instant::now();
    }
}

/// Counts of the connection pool lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub max_open: usize,
    pub free: usize,
    pub securing: usize,
    pub open: usize,
}

/// Fixed set of connection slots partitioned into free/securing/open
#[derive(Debug)]
pub struct ConnectionPool {
    slots: Vec<Connection>,
    free: Vec<usize>,
    securing: Vec<usize>,
    open: Vec<usize>,
}

impl ConnectionPool {
    pub fn new(max_open: usize) -> Self {
        // Reverse so low indices are handed out first
        let free: Vec<usize> = (0..max_open).rev().collect();
        let slots = (0..max_open)
            .map(|index| Connection::vacant(max_open - 1 - index))
            .collect();
        Self {
            slots,
            free,
            securing: Vec::with_capacity(max_open),
            open: Vec::with_capacity(max_open),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, id: ConnId) -> Option<&Connection> {
        self.slots.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.slots.get_mut(id.0)
    }

    /// Move a free slot to the securing list, installing `stream`.
    /// Returns the stream back when the pool is exhausted.
    pub(crate) fn acquire(
        &mut self,
        stream: TcpStream,
        status: Status,
    ) -> std::result::Result<ConnId, TcpStream> {
        let Some(&index) = self.free.last() else {
            return Err(stream);
        };
        self.move_to(index, Membership::Securing);
        let conn = &mut self.slots[index];
        conn.stream = Some(stream);
        conn.status = status;
        conn.last_io = Instant::now();
        Ok(ConnId(index))
    }

    /// Securing → open
    pub(crate) fn promote(&mut self, id: ConnId) -> bool {
        match self.slots.get(id.0).map(|c| c.membership) {
            Some(Membership::Securing) => {
                self.move_to(id.0, Membership::Open);
                true
            }
            _ => false,
        }
    }

    /// Return a slot to the free list, resetting its state and handing back
    /// the socket for deregistration. Queued and partially read messages are
    /// released to `messages`.
    pub(crate) fn release(&mut self, id: ConnId, messages: &mut MessagePool) -> Option<TcpStream> {
        let membership = self.slots.get(id.0)?.membership;
        if membership == Membership::Free {
            return None;
        }
        self.move_to(id.0, Membership::Free);

        let conn = &mut self.slots[id.0];
        conn.outbound.release_all(messages);
        conn.reader.discard(messages);
        conn.writer.reset();
        conn.peer_addr = None;
        conn.address = None;
        conn.target = None;
        conn.readable = false;
        conn.writable = false;
        conn.status = Status::accept();
        conn.stream.take()
    }

    fn list_mut(&mut self, membership: Membership) -> &mut Vec<usize> {
        match membership {
            Membership::Free => &mut self.free,
            Membership::Securing => &mut self.securing,
            Membership::Open => &mut self.open,
        }
    }

    fn move_to(&mut self, index: usize, to: Membership) {
        let from = self.slots[index].membership;
        let position = self.slots[index].position;

        let list = self.list_mut(from);
        list.swap_remove(position);
        if let Some(&moved) = list.get(position) {
            self.slots[moved].position = position;
        }

        let list = self.list_mut(to);
        list.push(index);
        let new_position = list.len() - 1;
        let conn = &mut self.slots[index];
        conn.membership = to;
        conn.position = new_position;
    }

    pub fn securing(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.securing.iter().map(|&i| ConnId(i))
    }

    pub fn open(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.open.iter().map(|&i| ConnId(i))
    }

    /// Copy every live slot id into `out`
    pub(crate) fn collect_active(&self, out: &mut Vec<ConnId>) {
        out.clear();
        out.extend(self.securing.iter().chain(self.open.iter()).map(|&i| ConnId(i)));
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_open: self.slots.len(),
            free: self.free.len(),
            securing: self.securing.len(),
            open: self.open.len(),
        }
    }

    /// Verify that every slot is on exactly the list it claims, at the
    /// position it claims, and that live slots hold a socket.
    pub fn check_invariants(&self) -> bool {
        let lists = [
            (Membership::Free, &self.free),
            (Membership::Securing, &self.securing),
            (Membership::Open, &self.open),
        ];
        let total: usize = lists.iter().map(|(_, l)| l.len()).sum();
        if total != self.slots.len() {
            return false;
        }
        for (membership, list) in lists {
            for (position, &index) in list.iter().enumerate() {
                let Some(conn) = self.slots.get(index) else {
                    return false;
                };
                if conn.membership != membership || conn.position != position {
                    return false;
                }
                if (membership == Membership::Free) == conn.stream.is_some() {
                    return false;
                }
            }
        }
        true
    }
}
