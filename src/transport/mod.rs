//! # Transport Layer
//!
//! The connection engine and the capability trait it implements.
//!
//! ## Components
//! - **TCP**: readiness-driven engine over mio ([`tcp::TcpSocket`])
//! - **Connection**: pooled per-socket state and the free/securing/open lists
//! - **Peer**: engine-owned table of known remote peers
//!
//! ## Model
//! Single-threaded and cooperative. The caller drives the engine by calling
//! [`Transport::process`] in a loop; the readiness poll inside it is the only
//! point that may block, bounded by the configured poll timeout.

pub mod connection;
pub mod peer;
pub mod tcp;

use crate::core::identity::SockId;
use crate::core::message::{Message, MessageId};
use crate::error::Result;
use peer::PeerId;

/// Peer lists filled by one [`Transport::process`] tick.
///
/// Every list is cleared at the start of the tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Every peer with an open connection after the tick
    pub open_connections: Vec<PeerId>,
    /// Peers whose open (or closing) connection was closed this tick
    pub closed_connections: Vec<PeerId>,
    /// Peers whose handshake completed this tick.
    ///
    /// An inbound handshake from an identity with no peer creates one. The
    /// engine never reclaims those peers or their registry entries; call
    /// `remove_peer` and `forget_endpoint` for identities you do not keep.
    pub new_connections: Vec<PeerId>,
    /// Peers whose outbound connection failed before completing
    pub failed_connections: Vec<PeerId>,
    /// Reserved for peer exchange; always empty
    pub pex_connections: Vec<PeerId>,
}

impl ProcessOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.open_connections.clear();
        self.closed_connections.clear();
        self.new_connections.clear();
        self.failed_connections.clear();
        self.pex_connections.clear();
    }
}

/// Socket engine capability
pub trait Transport {
    /// Bind and listen on `port`, sizing the connection pool to `max_open`.
    fn open(&mut self, port: u16, name: &str, sockid: SockId, max_open: usize) -> Result<()>;

    /// Release every socket and all pooled connection state.
    fn close(&mut self);

    /// Run one non-blocking tick.
    ///
    /// Only a poll failure is returned; per-connection failures close that
    /// connection and are reported through `out`.
    fn process(&mut self, out: &mut ProcessOutput) -> Result<()>;

    /// Queue an outbound connect to `peer`. Acted on by the next `process`.
    fn connect(&mut self, peer: PeerId) -> bool;

    /// Queue a disconnect of `peer`. Acted on by the next `process`.
    fn disconnect(&mut self, peer: PeerId) -> bool;

    fn alloc_msg(&mut self) -> Option<MessageId>;

    fn commit_msg(&mut self, id: MessageId, size: usize) -> Result<()>;

    fn free_msg(&mut self, id: MessageId) -> bool;

    fn message(&self, id: MessageId) -> Option<&Message>;

    fn message_buffer(&mut self, id: MessageId) -> Option<&mut [u8]>;

    /// Queue `id` on the open connection of `to`. Returns false, leaving the
    /// message with the caller, unless `to` is connected.
    fn send_msg(&mut self, id: MessageId, to: PeerId) -> bool;

    /// Pop the oldest received message and the peer it came from.
    fn recv_msg(&mut self) -> Option<(MessageId, PeerId)>;
}
