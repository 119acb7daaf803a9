//! Readiness-driven TCP connection engine.
//!
//! [`TcpSocket`] owns a listener, a fixed pool of connection slots, a message
//! pool and the peer tables, and advances every connection one step per
//! [`Transport::process`] call:
//!
//! 1. drain disconnect and connect intents
//! 2. poll for readiness (the only blocking point)
//! 3. accept at most one inbound connection
//! 4. read and write every live connection, driving the identity handshake
//! 5. close connections that stayed unopened past the handshake timeout
//! 6. reap closed connections and report peer changes
//!
//! Sockets are registered once for both directions. mio readiness is
//! edge-triggered, so each connection keeps sticky readable/writable flags
//! that are set by events and cleared only when the socket reports
//! `WouldBlock`; the connection status decides whether a ready direction is
//! serviced.

use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{EngineConfig, NetworkConfig};
use crate::core::frame::{ReadProgress, WriteProgress};
use crate::core::identity::SockId;
use crate::core::message::{Message, MessageId, MessagePool, MessageQueue};
use crate::core::netip::NetIp;
use crate::core::registry::{AddressRegistry, Endpoint};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::{
    decode_identity, encode_identity, verify_identity, HandshakeEvent, Phase, Role, Status,
};
use crate::transport::connection::{ConnId, Connection, ConnectionPool, Membership, PoolStats};
use crate::transport::peer::{Address, PeerId, PeerTable};
use crate::transport::{ProcessOutput, Transport};
use crate::utils::metrics::{global_metrics, Timer};

const LISTENER: Token = Token(0);

#[inline]
fn conn_token(id: ConnId) -> Token {
    Token(id.index() + 1)
}

/// Sockets and pools that only exist while the engine is open
#[derive(Debug)]
struct IoState {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    listener_ready: bool,
    local_addr: SocketAddr,
    local_netip: NetIp,
    name: String,
    connections: ConnectionPool,
    active: Vec<ConnId>,
}

/// State that outlives open/close cycles
#[derive(Debug)]
struct EngineCore {
    sockid: SockId,
    messages: MessagePool,
    inbound: MessageQueue,
    peers: PeerTable,
    registry: AddressRegistry,
    connect_intents: Vec<PeerId>,
    disconnect_intents: Vec<PeerId>,
}

/// Non-blocking TCP engine for identity-tagged peer connections
#[derive(Debug)]
pub struct TcpSocket {
    config: EngineConfig,
    io: Option<IoState>,
    core: EngineCore,
}

impl TcpSocket {
    /// Build a closed engine. Message pool and registry are allocated here.
    ///
    /// # Errors
    /// `ConfigError` for an invalid registry bucket count, or a message
    /// capacity that cannot hold an identity or a 32-bit frame length.
    pub fn new(config: EngineConfig) -> Result<Self> {
        if let Some(problem) = config.message_capacity_problem() {
            return Err(ProtocolError::ConfigError(problem));
        }
        let registry = AddressRegistry::with_buckets(config.registry_buckets)?;
        let messages = MessagePool::new(config.message_pool_size, config.message_capacity);
        Ok(Self {
            config,
            io: None,
            core: EngineCore {
                sockid: SockId::UNSPECIFIED,
                messages,
                inbound: MessageQueue::new(),
                peers: PeerTable::new(),
                registry,
                connect_intents: Vec::new(),
                disconnect_intents: Vec::new(),
            },
        })
    }

    /// Validate `config` strictly and build a closed engine from it
    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        config.validate_strict()?;
        Self::new(config.engine.clone())
    }

    /// Open using the configured port, name and pool size
    pub fn open_configured(&mut self, sockid: SockId) -> Result<()> {
        let port = self.config.listen_port;
        let name = self.config.socket_name.clone();
        let max_open = self.config.max_open;
        self.open(port, &name, sockid, max_open)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    /// Our identity (unspecified until opened)
    pub fn sockid(&self) -> &SockId {
        &self.core.sockid
    }

    /// Bound listener address
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.io.as_ref().map(|io| io.local_addr)
    }

    /// Endpoint announced to peers during the handshake
    pub fn local_netip(&self) -> Option<NetIp> {
        self.io.as_ref().map(|io| io.local_netip)
    }

    /// Register a peer. A known identity returns the existing handle with
    /// its endpoint updated; [`SockId::UNSPECIFIED`] registers a peer whose
    /// identity is learned from its handshake.
    pub fn add_peer(&mut self, sockid: SockId, netip: NetIp) -> PeerId {
        self.core.peers.insert(sockid, netip)
    }

    /// Resolve `host:port` and register a peer with an unknown identity
    pub fn add_peer_addr(&mut self, host: &str, port: u16) -> Result<PeerId> {
        let netip = NetIp::resolve(host, port)?;
        Ok(self.add_peer(SockId::UNSPECIFIED, netip))
    }

    /// Forget a peer. Its live connection, if any, is closed without being
    /// reported and pending intents are dropped. The registry entry for its
    /// identity is kept; see [`TcpSocket::forget_endpoint`].
    pub fn remove_peer(&mut self, peer: PeerId) -> Option<Address> {
        let conn = self.core.peers.get(peer).and_then(|a| a.conn);
        if let (Some(cid), Some(io)) = (conn, self.io.as_mut()) {
            if let Some(conn) = io.connections.get_mut(cid) {
                conn.address = None;
                conn.target = None;
                conn.fault();
            }
        }
        self.core.connect_intents.retain(|p| *p != peer);
        self.core.disconnect_intents.retain(|p| *p != peer);
        self.core.peers.remove(peer)
    }

    pub fn peer(&self, peer: PeerId) -> Option<&Address> {
        self.core.peers.get(peer)
    }

    pub fn find_peer(&self, sockid: &SockId) -> Option<PeerId> {
        self.core.peers.find(sockid)
    }

    pub fn peers(&self) -> impl Iterator<Item = (PeerId, &Address)> + '_ {
        self.core.peers.iter()
    }

    /// Identities and endpoints learned from handshakes
    pub fn registry(&self) -> &AddressRegistry {
        &self.core.registry
    }

    /// Drop the registry entry learned for `sockid`
    pub fn forget_endpoint(&mut self, sockid: &SockId) -> bool {
        self.core.registry.remove(sockid)
    }

    /// Status of the connection bound to `peer`
    pub fn connection_status(&self, peer: PeerId) -> Option<Status> {
        let cid = self.core.peers.get(peer)?.conn?;
        let io = self.io.as_ref()?;
        io.connections.get(cid).map(|c| c.status())
    }

    /// Copy `data` into a message and commit its size
    pub fn write_msg(&mut self, id: MessageId, data: &[u8]) -> Result<()> {
        self.core.messages.write(id, data)
    }

    /// Connection pool counts, `None` while closed
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.io.as_ref().map(|io| io.connections.stats())
    }

    /// Messages currently available for `alloc_msg`
    pub fn messages_available(&self) -> usize {
        self.core.messages.available()
    }

    /// Received messages waiting for `recv_msg`
    pub fn pending_inbound(&self) -> usize {
        self.core.inbound.len()
    }
}

impl Transport for TcpSocket {
    #[instrument(skip(self, sockid))]
    fn open(&mut self, port: u16, name: &str, sockid: SockId, max_open: usize) -> Result<()> {
        if self.io.is_some() {
            return Err(ProtocolError::AlreadyOpen(constants::ERR_ALREADY_OPEN));
        }
        let _timer = Timer::start("open");

        let bind = NetIp::resolve(&self.config.bind_address, port)?;
        let addr = bind.to_socket_addr().ok_or_else(|| {
            ProtocolError::AddressResolution(constants::ERR_NO_ENDPOINT.into())
        })?;

        let mut listener = TcpListener::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;

        self.core.sockid = if sockid.is_unspecified() {
            SockId::derive(name)
        } else {
            sockid
        };

        self.io = Some(IoState {
            poll,
            events: Events::with_capacity(self.config.poll_capacity),
            listener,
            listener_ready: false,
            local_addr,
            local_netip: NetIp::from(local_addr),
            name: name.to_string(),
            connections: ConnectionPool::new(max_open),
            active: Vec::with_capacity(max_open),
        });

        info!(%local_addr, sockid = %self.core.sockid, max_open, "Socket engine open");
        Ok(())
    }

    fn close(&mut self) {
        let Some(mut io) = self.io.take() else {
            return;
        };
        let _timer = Timer::start("close");

        io.connections.collect_active(&mut io.active);
        for &cid in &io.active {
            if let Some(mut stream) = io.connections.release(cid, &mut self.core.messages) {
                let _ = io.poll.registry().deregister(&mut stream);
            }
            global_metrics().connection_closed();
        }
        let _ = io.poll.registry().deregister(&mut io.listener);

        self.core.inbound.release_all(&mut self.core.messages);
        self.core.peers.unbind_all();
        self.core.connect_intents.clear();
        self.core.disconnect_intents.clear();

        info!(name = %io.name, released = io.active.len(), "Socket engine closed");
    }

    #[instrument(level = "trace", skip_all)]
    fn process(&mut self, out: &mut ProcessOutput) -> Result<()> {
        out.clear();
        let Some(io) = self.io.as_mut() else {
            return Err(ProtocolError::NotOpen(constants::ERR_NOT_OPEN));
        };
        let core = &mut self.core;

        core.drain_disconnects(io);
        core.drain_connects(io, out);

        match io.poll.poll(&mut io.events, Some(self.config.poll_timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
        io.absorb_events();
        core.accept_one(io);

        io.connections.collect_active(&mut io.active);
        let local_netip = io.local_netip;
        for i in 0..io.active.len() {
            let cid = io.active[i];
            let Some(conn) = io.connections.get_mut(cid) else {
                continue;
            };
            if core.service(conn, cid, local_netip) {
                let peer = conn.address;
                io.connections.promote(cid);
                global_metrics().handshake_completed();
                if let Some(peer) = peer {
                    info!(conn = cid.index(), peer = ?peer, "Connection open");
                    out.new_connections.push(peer);
                }
            }
        }

        io.sweep(self.config.handshake_timeout);
        core.reap(io, out);

        out.open_connections.extend(
            io.connections
                .open()
                .filter_map(|cid| io.connections.get(cid).and_then(|c| c.address)),
        );
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    fn connect(&mut self, peer: PeerId) -> bool {
        if self.io.is_none() {
            return false;
        }
        match self.core.peers.get(peer) {
            Some(address) if !address.has_connection() => {}
            _ => return false,
        }
        if self.core.connect_intents.contains(&peer) {
            return false;
        }
        self.core.connect_intents.push(peer);
        true
    }

    #[instrument(level = "debug", skip(self))]
    fn disconnect(&mut self, peer: PeerId) -> bool {
        if self.io.is_none() || self.core.peers.get(peer).is_none() {
            return false;
        }
        if self.core.disconnect_intents.contains(&peer) {
            return false;
        }
        self.core.disconnect_intents.push(peer);
        true
    }

    fn alloc_msg(&mut self) -> Option<MessageId> {
        self.core.messages.alloc()
    }

    fn commit_msg(&mut self, id: MessageId, size: usize) -> Result<()> {
        self.core.messages.commit(id, size)
    }

    fn free_msg(&mut self, id: MessageId) -> bool {
        self.core.messages.free(id)
    }

    fn message(&self, id: MessageId) -> Option<&Message> {
        self.core.messages.get(id)
    }

    fn message_buffer(&mut self, id: MessageId) -> Option<&mut [u8]> {
        self.core.messages.buffer_mut(id)
    }

    fn send_msg(&mut self, id: MessageId, to: PeerId) -> bool {
        let Some(io) = self.io.as_mut() else {
            return false;
        };
        let Some(cid) = self.core.peers.get(to).and_then(|a| a.conn) else {
            return false;
        };
        let Some(conn) = io.connections.get_mut(cid) else {
            return false;
        };
        if !conn.status.is_connected() || conn.address != Some(to) {
            return false;
        }
        if self
            .core
            .messages
            .get(id)
            .map_or(true, |m| m.is_queued())
        {
            return false;
        }
        self.core.messages.set_remote(id, Some(to));
        conn.outbound.push_back(&mut self.core.messages, id)
    }

    fn recv_msg(&mut self) -> Option<(MessageId, PeerId)> {
        let id = self.core.inbound.pop_front(&mut self.core.messages)?;
        match self.core.messages.get(id).and_then(|m| m.remote()) {
            Some(from) => Some((id, from)),
            None => {
                self.core.messages.free(id);
                None
            }
        }
    }
}

impl Drop for TcpSocket {
    fn drop(&mut self) {
        self.close();
    }
}

impl IoState {
    /// Fold poll events into the sticky readiness flags
    fn absorb_events(&mut self) {
        for event in self.events.iter() {
            let token = event.token();
            if token == LISTENER {
                self.listener_ready = true;
                continue;
            }
            let cid = ConnId(token.0 - 1);
            let Some(conn) = self.connections.get_mut(cid) else {
                continue;
            };
            if conn.membership() == Membership::Free {
                continue;
            }
            if event.is_error() {
                trace!(conn = cid.index(), "Socket error event");
                global_metrics().connection_error();
                conn.fault();
                continue;
            }
            if event.is_readable() || event.is_read_closed() {
                conn.readable = true;
            }
            if event.is_writable() || event.is_write_closed() {
                conn.writable = true;
            }
        }
    }

    /// Close connections that are not open and have been idle too long
    fn sweep(&mut self, timeout: Duration) {
        let now = Instant::now();
        for &cid in &self.active {
            let Some(conn) = self.connections.get_mut(cid) else {
                continue;
            };
            if conn.status.is_connected() || conn.status.is_closed() {
                continue;
            }
            if now.duration_since(conn.last_io) > timeout {
                debug!(
                    conn = cid.index(),
                    phase = ?conn.status.phase(),
                    "Connection idle past handshake timeout"
                );
                global_metrics().handshake_timed_out();
                conn.fault();
            }
        }
    }
}

impl EngineCore {
    fn drain_disconnects(&mut self, io: &mut IoState) {
        let mut intents = std::mem::take(&mut self.disconnect_intents);
        for peer in intents.drain(..) {
            if let Some(pos) = self.connect_intents.iter().position(|p| *p == peer) {
                self.connect_intents.remove(pos);
                debug!(peer = ?peer, "Cancelled pending connect");
                continue;
            }
            let Some(cid) = self.peers.get(peer).and_then(|a| a.conn) else {
                continue;
            };
            let Some(conn) = io.connections.get_mut(cid) else {
                continue;
            };
            if matches!(conn.status.phase(), Phase::Closing | Phase::Closed) {
                continue;
            }
            if conn.advance(HandshakeEvent::Disconnect).is_ok()
                && conn.status.phase() == Phase::Closing
                && conn.outbound.is_empty()
            {
                let _ = conn.advance(HandshakeEvent::QueueDrained);
            }
            debug!(peer = ?peer, conn = cid.index(), phase = ?conn.status.phase(), "Disconnecting");
        }
        self.disconnect_intents = intents;
    }

    fn drain_connects(&mut self, io: &mut IoState, out: &mut ProcessOutput) {
        let mut intents = std::mem::take(&mut self.connect_intents);
        for peer in intents.drain(..) {
            if let Err(e) = self.start_connect(io, peer) {
                debug!(peer = ?peer, error = %e, "Connect failed");
                global_metrics().connect_failed();
                out.failed_connections.push(peer);
            }
        }
        self.connect_intents = intents;
    }

    fn start_connect(&mut self, io: &mut IoState, peer: PeerId) -> Result<()> {
        let Some(address) = self.peers.get(peer) else {
            // Removed since the intent was queued
            return Ok(());
        };
        if address.has_connection() {
            return Ok(());
        }
        let target = address.netip().to_socket_addr().ok_or_else(|| {
            ProtocolError::AddressResolution(constants::ERR_NO_ENDPOINT.into())
        })?;
        if io.connections.stats().free == 0 {
            return Err(ProtocolError::Custom("Connection pool exhausted".into()));
        }

        let stream = TcpStream::connect(target)?;
        let cid = io
            .connections
            .acquire(stream, Status::connect())
            .map_err(|_| ProtocolError::Custom("Connection pool exhausted".into()))?;
        let registered = match io.connections.get_mut(cid) {
            Some(conn) => register(&io.poll, conn, cid),
            None => Err(io::Error::from(ErrorKind::NotFound)),
        };
        if let Err(e) = registered {
            io.connections.release(cid, &mut self.messages);
            return Err(e.into());
        }

        if let Some(conn) = io.connections.get_mut(cid) {
            conn.target = Some(peer);
            conn.peer_addr = Some(target);
        }
        if let Some(address) = self.peers.get_mut(peer) {
            address.conn = Some(cid);
        }
        global_metrics().connection_initiated();
        debug!(peer = ?peer, %target, conn = cid.index(), "Connecting");
        Ok(())
    }

    fn accept_one(&mut self, io: &mut IoState) {
        if !io.listener_ready {
            return;
        }
        let (stream, addr) = match io.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                io.listener_ready = false;
                return;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => return,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                return;
            }
        };

        let cid = match io.connections.acquire(stream, Status::accept()) {
            Ok(cid) => cid,
            Err(_dropped) => {
                debug!(%addr, "Connection pool exhausted, dropping inbound connection");
                global_metrics().accept_dropped();
                return;
            }
        };
        let registered = match io.connections.get_mut(cid) {
            Some(conn) => {
                conn.peer_addr = Some(addr);
                register(&io.poll, conn, cid)
            }
            None => Err(io::Error::from(ErrorKind::NotFound)),
        };
        if let Err(e) = registered {
            warn!(%addr, error = %e, "Failed to register accepted connection");
            io.connections.release(cid, &mut self.messages);
            return;
        }

        global_metrics().connection_accepted();
        debug!(%addr, conn = cid.index(), "Accepted connection");
    }

    /// Service one live connection. Returns true when its handshake completed.
    fn service(&mut self, conn: &mut Connection, cid: ConnId, local_netip: NetIp) -> bool {
        if conn.status.is_closed() {
            return false;
        }
        let mut completed = false;

        let (want_read, _) = conn.interest();
        if want_read && conn.readable {
            completed |= self.read_ready(conn, cid, local_netip);
        }
        if conn.status.is_closed() {
            return false;
        }

        let (_, want_write) = conn.interest();
        if want_write && conn.writable {
            completed |= self.write_ready(conn, cid, local_netip);
        }
        completed && !conn.status.is_closed()
    }

    fn read_ready(&mut self, conn: &mut Connection, cid: ConnId, local_netip: NetIp) -> bool {
        let mut completed = false;
        loop {
            let Some(stream) = conn.stream.as_mut() else {
                conn.fault();
                break;
            };
            match conn.reader.read(stream, &mut self.messages) {
                Ok(ReadProgress::Received(mid)) => {
                    conn.touch();
                    match self.classify(conn, cid, mid, local_netip) {
                        Ok(done) => completed |= done,
                        Err(e) => {
                            drop_on_error(conn, cid, &e);
                            break;
                        }
                    }
                    if !conn.status.wants_read() {
                        break;
                    }
                }
                Ok(ReadProgress::WouldBlock) => {
                    conn.readable = false;
                    break;
                }
                Ok(ReadProgress::Starved) => {
                    trace!(conn = cid.index(), "Message pool exhausted, deferring read");
                    break;
                }
                Err(e) => {
                    drop_on_error(conn, cid, &e);
                    break;
                }
            }
        }
        completed
    }

    fn write_ready(&mut self, conn: &mut Connection, cid: ConnId, local_netip: NetIp) -> bool {
        if conn.status.phase() == Phase::Connecting {
            match finish_connect(conn) {
                Ok(true) => {}
                Ok(false) => {
                    conn.writable = false;
                    return false;
                }
                Err(e) => {
                    drop_on_error(conn, cid, &e);
                    return false;
                }
            }
            let queued = conn
                .advance(HandshakeEvent::Connected)
                .and_then(|()| self.queue_identity(conn, local_netip));
            if let Err(e) = queued {
                drop_on_error(conn, cid, &e);
                return false;
            }
            trace!(conn = cid.index(), "Connect completed, sending identity");
        }

        loop {
            let Some(stream) = conn.stream.as_mut() else {
                conn.fault();
                return false;
            };
            let counted = matches!(conn.status.phase(), Phase::Connected | Phase::Closing);
            match conn.writer.write(stream, &mut self.messages, &mut conn.outbound) {
                Ok(WriteProgress::Sent(mid)) => {
                    conn.touch();
                    if counted {
                        let size = self.messages.get(mid).map_or(0, |m| m.size());
                        global_metrics().message_sent(size as u64);
                    }
                    self.messages.free(mid);
                }
                Ok(WriteProgress::Blocked) => {
                    conn.writable = false;
                    break;
                }
                Ok(WriteProgress::Drained) => break,
                Err(e) => {
                    drop_on_error(conn, cid, &e);
                    return false;
                }
            }
        }

        if !conn.outbound.is_empty()
            || !matches!(conn.status.phase(), Phase::SecureSend | Phase::Closing)
        {
            return false;
        }
        if conn.advance(HandshakeEvent::QueueDrained).is_err() {
            return false;
        }
        match conn.status.phase() {
            Phase::Connected => {
                // Accept side: our identity is out, the peer is ours
                conn.address = conn.target;
                true
            }
            Phase::Closed => {
                debug!(conn = cid.index(), "Outbound queue flushed, closing");
                false
            }
            _ => false,
        }
    }

    /// Route a received message by connection phase. Returns true when it
    /// completed the handshake.
    fn classify(
        &mut self,
        conn: &mut Connection,
        cid: ConnId,
        mid: MessageId,
        local_netip: NetIp,
    ) -> Result<bool> {
        match conn.status.phase() {
            Phase::Connected => {
                let size = self.messages.get(mid).map_or(0, |m| m.size());
                self.messages.set_remote(mid, conn.address);
                if !self.inbound.push_back(&mut self.messages, mid) {
                    self.messages.free(mid);
                }
                global_metrics().message_received(size as u64);
                Ok(false)
            }
            Phase::SecureRecv => {
                let decoded = self
                    .messages
                    .get(mid)
                    .ok_or(ProtocolError::InvalidHandle)
                    .and_then(|m| decode_identity(m.payload()));
                self.messages.free(mid);
                let (sockid, netip) = decoded?;
                self.on_identity(conn, cid, sockid, netip, local_netip)
            }
            _ => {
                self.messages.free(mid);
                Err(ProtocolError::UnexpectedMessage)
            }
        }
    }

    fn on_identity(
        &mut self,
        conn: &mut Connection,
        cid: ConnId,
        sockid: SockId,
        mut netip: NetIp,
        local_netip: NetIp,
    ) -> Result<bool> {
        // A wildcard listener address is reachable at the socket's peer IP
        if !netip.is_none() && netip.is_unspecified() {
            if let Some(addr) = conn.peer_addr {
                netip = NetIp::from(SocketAddr::new(addr.ip(), netip.port()));
            }
        }

        match conn.status.role() {
            Role::Accept => {
                verify_identity(&self.sockid, None, &sockid)?;
                let peer = match self.peers.find(&sockid) {
                    Some(peer) => {
                        let busy = self
                            .peers
                            .get(peer)
                            .and_then(|a| a.conn)
                            .is_some_and(|other| other != cid);
                        if busy {
                            return Err(ProtocolError::HandshakeError(
                                constants::ERR_DUPLICATE_PEER.into(),
                            ));
                        }
                        if !netip.is_none() {
                            self.peers.set_netip(peer, netip);
                        }
                        peer
                    }
                    None => self.peers.insert(sockid, netip),
                };
                if let Some(address) = self.peers.get_mut(peer) {
                    address.conn = Some(cid);
                }
                conn.target = Some(peer);
                self.record_endpoint(&sockid, &netip);

                conn.advance(HandshakeEvent::IdentityReceived)?;
                self.queue_identity(conn, local_netip)?;
                debug!(conn = cid.index(), peer = ?sockid, "Identity received, replying");
                Ok(false)
            }
            Role::Connect => {
                let target = conn.target.ok_or(ProtocolError::UnexpectedMessage)?;
                let expected = self
                    .peers
                    .get(target)
                    .map(|a| *a.sockid())
                    .ok_or(ProtocolError::InvalidHandle)?;
                verify_identity(&self.sockid, Some(&expected), &sockid)?;
                conn.advance(HandshakeEvent::IdentityReceived)?;

                let peer = if expected.is_unspecified() {
                    self.bind_dialed_identity(target, cid, sockid)?
                } else {
                    target
                };
                self.record_endpoint(&sockid, &netip);
                conn.address = Some(peer);
                debug!(conn = cid.index(), peer = ?sockid, "Identity confirmed");
                Ok(true)
            }
        }
    }

    /// Attach the identity announced on a connection dialed by address.
    ///
    /// A fresh identity is adopted by the dialed peer. An identity the table
    /// already knows keeps its handle: the connection moves to that peer,
    /// which also takes the dialed endpoint. Only an identity held by
    /// another connection is refused.
    fn bind_dialed_identity(
        &mut self,
        target: PeerId,
        cid: ConnId,
        sockid: SockId,
    ) -> Result<PeerId> {
        let duplicate = || ProtocolError::HandshakeError(constants::ERR_DUPLICATE_PEER.into());
        let Some(known) = self.peers.find(&sockid) else {
            return if self.peers.adopt_sockid(target, sockid) {
                Ok(target)
            } else {
                Err(duplicate())
            };
        };

        let busy = self
            .peers
            .get(known)
            .and_then(|a| a.conn)
            .is_some_and(|other| other != cid);
        if busy {
            return Err(duplicate());
        }
        if let Some(netip) = self.peers.get(target).map(|a| *a.netip()) {
            self.peers.set_netip(known, netip);
        }
        self.peers.unbind(target, cid);
        if let Some(address) = self.peers.get_mut(known) {
            address.conn = Some(cid);
        }
        debug!(
            conn = cid.index(),
            dialed = ?target,
            peer = ?known,
            "Dialed address belongs to a known peer"
        );
        Ok(known)
    }

    /// Store the advertised endpoint, replacing a stale one
    fn record_endpoint(&mut self, sockid: &SockId, netip: &NetIp) {
        let endpoint = Endpoint::from(*netip);
        match self.registry.get(sockid) {
            Some(existing) if existing == endpoint => {}
            Some(_) => {
                self.registry.remove(sockid);
                self.registry.add(sockid, &endpoint);
            }
            None => {
                self.registry.add(sockid, &endpoint);
            }
        }
    }

    fn queue_identity(&mut self, conn: &mut Connection, local_netip: NetIp) -> Result<()> {
        let payload = encode_identity(&self.sockid, &local_netip);
        let mid = self.messages.alloc().ok_or_else(|| {
            ProtocolError::HandshakeError(constants::ERR_NO_IDENTITY_SLOT.into())
        })?;
        if let Err(e) = self.messages.write(mid, &payload) {
            self.messages.free(mid);
            return Err(e);
        }
        conn.outbound.push_back(&mut self.messages, mid);
        Ok(())
    }

    /// Release closed connections and report their peers
    fn reap(&mut self, io: &mut IoState, out: &mut ProcessOutput) {
        for i in 0..io.active.len() {
            let cid = io.active[i];
            let Some(conn) = io.connections.get(cid) else {
                continue;
            };
            if !conn.status.is_closed() {
                continue;
            }
            let role = conn.status.role();
            let address = conn.address;
            let target = conn.target;

            if let Some(mut stream) = io.connections.release(cid, &mut self.messages) {
                let _ = io.poll.registry().deregister(&mut stream);
            }
            for peer in [address, target].into_iter().flatten() {
                self.peers.unbind(peer, cid);
            }
            global_metrics().connection_closed();

            match (address, role, target) {
                (Some(peer), _, _) => {
                    info!(conn = cid.index(), peer = ?peer, "Connection closed");
                    out.closed_connections.push(peer);
                }
                (None, Role::Connect, Some(peer)) => {
                    debug!(
                        conn = cid.index(),
                        peer = ?peer,
                        reason = constants::ERR_CONNECT_INCOMPLETE,
                        "Outbound connection failed"
                    );
                    global_metrics().connect_failed();
                    out.failed_connections.push(peer);
                }
                _ => trace!(conn = cid.index(), "Dropped unidentified connection"),
            }
        }
    }
}

fn register(poll: &Poll, conn: &mut Connection, cid: ConnId) -> io::Result<()> {
    match conn.stream.as_mut() {
        Some(stream) => poll.registry().register(
            stream,
            conn_token(cid),
            Interest::READABLE | Interest::WRITABLE,
        ),
        None => Err(io::Error::from(ErrorKind::NotConnected)),
    }
}

/// Check whether a non-blocking connect finished. `Ok(false)` while pending.
fn finish_connect(conn: &mut Connection) -> Result<bool> {
    let Some(stream) = conn.stream.as_ref() else {
        return Err(ProtocolError::ConnectionClosed);
    };
    if let Some(e) = stream.take_error()? {
        return Err(e.into());
    }
    match stream.peer_addr() {
        Ok(addr) => {
            conn.peer_addr = Some(addr);
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotConnected => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Log and count a per-connection failure, then mark it for reaping
fn drop_on_error(conn: &mut Connection, cid: ConnId, err: &ProtocolError) {
    let securing = conn.status.is_securing();
    if err.is_protocol_violation() {
        warn!(conn = cid.index(), error = %err, "Protocol violation, closing connection");
        global_metrics().protocol_error();
        if securing {
            global_metrics().handshake_failed();
        }
    } else if matches!(err, ProtocolError::ConnectionClosed) {
        debug!(conn = cid.index(), "Peer closed connection");
    } else {
        debug!(conn = cid.index(), error = %err, "Connection error");
        global_metrics().connection_error();
    }
    conn.fault();
}
