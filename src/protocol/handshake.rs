//! Identity handshake and connection status machine.
//!
//! Every new connection exchanges exactly one identity message in each
//! direction before it carries application traffic. The message is a regular
//! frame whose payload is:
//!
//! ```text
//! [SockId(32)] [NetIp(20)]
//! ```
//!
//! The connecting side speaks first; the accepting side answers once it has
//! validated the caller. Connection progress is tracked by [`Status`], an
//! explicit role + phase pair, and advanced only through [`Status::apply`].

use bytes::BufMut;

use crate::core::identity::{SockId, SOCKID_SIZE};
use crate::core::netip::{NetIp, NETIP_SERIALIZED_SIZE};
use crate::error::{constants, ProtocolError, Result};

use tracing::{instrument, warn};

/// Exact size of the identity handshake payload
pub const HANDSHAKE_PAYLOAD_SIZE: usize = SOCKID_SIZE + NETIP_SERIALIZED_SIZE;

/// Which side opened the TCP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Accept,
    Connect,
}

/// Progress of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Non-blocking connect issued, not yet writable
    Connecting,
    /// Waiting for the peer's identity
    SecureRecv,
    /// Our identity is queued and being flushed
    SecureSend,
    /// Handshake complete; application traffic flows
    Connected,
    /// Disconnect requested; flushing the outbound queue
    Closing,
    /// Terminal; the connection is reaped at the end of the tick
    Closed,
}

/// Input to the status machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// The outbound TCP connect completed
    Connected,
    /// A valid identity message arrived
    IdentityReceived,
    /// The outbound queue became empty
    QueueDrained,
    /// Local disconnect request
    Disconnect,
    /// Socket error, hang-up, protocol violation or timeout
    Fault,
}

/// Role and phase of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    role: Role,
    phase: Phase,
}

impl Status {
    /// Freshly accepted connection: wait for the caller's identity
    pub const fn accept() -> Self {
        Self {
            role: Role::Accept,
            phase: Phase::SecureRecv,
        }
    }

    /// Outbound connection with the connect still in flight
    pub const fn connect() -> Self {
        Self {
            role: Role::Connect,
            phase: Phase::Connecting,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Still exchanging identities
    pub fn is_securing(&self) -> bool {
        matches!(
            self.phase,
            Phase::Connecting | Phase::SecureRecv | Phase::SecureSend
        )
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Whether the socket should be read this tick
    pub fn wants_read(&self) -> bool {
        matches!(self.phase, Phase::SecureRecv | Phase::Connected)
    }

    /// Whether the socket should be written this tick
    pub fn wants_write(&self, queue_pending: bool) -> bool {
        match self.phase {
            Phase::Connecting | Phase::SecureSend => true,
            Phase::Connected | Phase::Closing => queue_pending,
            Phase::SecureRecv | Phase::Closed => false,
        }
    }

    /// Advance the machine.
    ///
    /// # Errors
    /// `UnexpectedMessage` for any event the current phase does not accept.
    pub fn apply(self, event: HandshakeEvent) -> Result<Status> {
        use HandshakeEvent as E;
        use Phase as P;
        use Role as R;

        let phase = match (self.role, self.phase, event) {
            (_, _, E::Fault) => P::Closed,

            (R::Connect, P::Connecting, E::Connected) => P::SecureSend,
            (R::Connect, P::SecureSend, E::QueueDrained) => P::SecureRecv,
            (R::Connect, P::SecureRecv, E::IdentityReceived) => P::Connected,

            (R::Accept, P::SecureRecv, E::IdentityReceived) => P::SecureSend,
            (R::Accept, P::SecureSend, E::QueueDrained) => P::Connected,

            (_, P::Connected, E::Disconnect) => P::Closing,
            (_, P::Connecting | P::SecureRecv | P::SecureSend, E::Disconnect) => P::Closed,
            (_, P::Closing, E::QueueDrained) => P::Closed,

            _ => return Err(ProtocolError::UnexpectedMessage),
        };

        Ok(Status {
            role: self.role,
            phase,
        })
    }
}

/// Build the identity payload announcing `sockid` reachable at `netip`
pub fn encode_identity(sockid: &SockId, netip: &NetIp) -> [u8; HANDSHAKE_PAYLOAD_SIZE] {
    let mut out = [0u8; HANDSHAKE_PAYLOAD_SIZE];
    let mut cursor = &mut out[..];
    cursor.put_slice(sockid.as_bytes());
    netip.write_to(&mut cursor);
    out
}

/// Parse an identity payload
///
/// # Errors
/// `HandshakeError` unless the payload is exactly [`HANDSHAKE_PAYLOAD_SIZE`]
/// bytes, `InvalidNetIp` for an unknown address family.
pub fn decode_identity(payload: &[u8]) -> Result<(SockId, NetIp)> {
    if payload.len() != HANDSHAKE_PAYLOAD_SIZE {
        return Err(ProtocolError::HandshakeError(format!(
            "{} ({} bytes)",
            constants::ERR_HANDSHAKE_SIZE,
            payload.len()
        )));
    }
    let (id_bytes, mut rest) = payload.split_at(SOCKID_SIZE);
    let sockid = SockId::from_slice(id_bytes).ok_or_else(|| {
        ProtocolError::HandshakeError(constants::ERR_HANDSHAKE_SIZE.into())
    })?;
    let netip = NetIp::read_from(&mut rest)?;
    Ok((sockid, netip))
}

/// Check an announced identity against our own and, for outbound
/// connections, against the identity we dialed.
///
/// An `expected` identity of [`SockId::UNSPECIFIED`] accepts any peer.
///
/// # Errors
/// `HandshakeError` for a self-connection, `IdentityMismatch` when the peer
/// is not who we dialed.
#[instrument(level = "debug", skip_all, fields(received = ?received))]
pub fn verify_identity(own: &SockId, expected: Option<&SockId>, received: &SockId) -> Result<()> {
    if received == own {
        warn!("Peer announced our own identity");
        return Err(ProtocolError::HandshakeError(
            constants::ERR_SELF_CONNECTION.into(),
        ));
    }
    if let Some(expected) = expected {
        if !expected.is_unspecified() && expected != received {
            warn!(expected = ?expected, "Peer identity mismatch");
            return Err(ProtocolError::IdentityMismatch {
                expected: expected.to_string(),
                received: received.to_string(),
            });
        }
    }
    Ok(())
}
