//! Shared helpers for driving engines over loopback

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use peerlink::{EngineConfig, NetIp, PeerId, ProcessOutput, SockId, TcpSocket, Transport};
use std::net::SocketAddr;
use std::time::Duration;

pub const MAX_TICKS: usize = 5000;

pub fn test_config() -> EngineConfig {
    EngineConfig {
        bind_address: "127.0.0.1".into(),
        listen_port: 0,
        max_open: 8,
        message_pool_size: 64,
        message_capacity: 4096,
        ..EngineConfig::default()
    }
}

/// An engine plus everything it reported so far
pub struct Node {
    pub engine: TcpSocket,
    pub out: ProcessOutput,
    pub new: Vec<PeerId>,
    pub closed: Vec<PeerId>,
    pub failed: Vec<PeerId>,
    pub received: Vec<(Vec<u8>, PeerId)>,
}

impl Node {
    pub fn open(name: &str) -> Self {
        Self::open_with(name, test_config())
    }

    pub fn open_with(name: &str, config: EngineConfig) -> Self {
        let max_open = config.max_open;
        let mut engine = TcpSocket::new(config).expect("engine");
        engine
            .open(0, name, SockId::derive(name), max_open)
            .expect("open");
        Self {
            engine,
            out: ProcessOutput::new(),
            new: Vec::new(),
            closed: Vec::new(),
            failed: Vec::new(),
            received: Vec::new(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.engine.local_addr().expect("open engine")
    }

    pub fn netip(&self) -> NetIp {
        NetIp::from(self.addr())
    }

    pub fn sockid(&self) -> SockId {
        *self.engine.sockid()
    }

    /// One process tick; collects reports and drains received messages
    pub fn tick(&mut self) {
        self.engine.process(&mut self.out).expect("process");
        self.new.extend(&self.out.new_connections);
        self.closed.extend(&self.out.closed_connections);
        self.failed.extend(&self.out.failed_connections);
        assert!(self.out.pex_connections.is_empty());
        while let Some((msg, from)) = self.engine.recv_msg() {
            let payload = self
                .engine
                .message(msg)
                .map(|m| m.payload().to_vec())
                .expect("received message is live");
            self.received.push((payload, from));
            assert!(self.engine.free_msg(msg));
        }
    }

    /// Queue `payload` to `to`; returns what `send_msg` said
    pub fn send(&mut self, to: PeerId, payload: &[u8]) -> bool {
        let msg = self.engine.alloc_msg().expect("message pool");
        self.engine.write_msg(msg, payload).expect("fits");
        let queued = self.engine.send_msg(msg, to);
        if !queued {
            assert!(self.engine.free_msg(msg));
        }
        queued
    }
}

/// Tick both nodes until `done` holds or the tick budget runs out
pub fn drive(a: &mut Node, b: &mut Node, mut done: impl FnMut(&Node, &Node) -> bool) -> bool {
    for _ in 0..MAX_TICKS {
        a.tick();
        b.tick();
        if done(a, b) {
            return true;
        }
    }
    false
}

/// Tick one node until `done` holds or the tick budget runs out
pub fn drive_one(node: &mut Node, mut done: impl FnMut(&mut Node) -> bool) -> bool {
    for _ in 0..MAX_TICKS {
        node.tick();
        if done(node) {
            return true;
        }
    }
    false
}

/// Connect `dialer` to `listener`, returning the peer handles on each side
pub fn handshake(dialer: &mut Node, listener: &mut Node) -> (PeerId, PeerId) {
    let target = dialer
        .engine
        .add_peer(SockId::UNSPECIFIED, listener.netip());
    assert!(dialer.engine.connect(target));
    assert!(
        drive(dialer, listener, |d, l| !d.new.is_empty() && !l.new.is_empty()),
        "handshake did not complete"
    );
    let remote = listener.new[0];
    (target, remote)
}

/// Sleep-free wait helper for raw sockets
pub fn short_pause() {
    std::thread::sleep(Duration::from_millis(1));
}
