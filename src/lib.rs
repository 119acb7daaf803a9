//! # peerlink
//!
//! Identity-tagged, non-blocking TCP connection engine.
//!
//! Connections announce a persistent 32-byte peer identity through a short
//! handshake before they carry application traffic. Messages are
//! length-prefixed frames backed by a fixed pool of buffers, so the steady
//! state does not allocate.
//!
//! ## Layers
//! - [`core`]: identities, endpoints, the address registry, message pool and framing
//! - [`protocol`]: the identity handshake and the connection status machine
//! - [`transport`]: the mio-driven engine ([`TcpSocket`]) behind the [`Transport`] trait
//! - [`config`], [`runtime`], [`utils`]: configuration, process startup, logging and metrics
//!
//! ## Example
//! ```rust,no_run
//! use peerlink::{EngineConfig, NetIp, ProcessOutput, SockId, TcpSocket, Transport};
//!
//! # fn main() -> peerlink::Result<()> {
//! let mut engine = TcpSocket::new(EngineConfig::default())?;
//! engine.open(3823, "node-a", SockId::random(), 64)?;
//!
//! let peer = engine.add_peer(SockId::UNSPECIFIED, NetIp::v4([127, 0, 0, 1], 3824));
//! engine.connect(peer);
//!
//! let mut out = ProcessOutput::new();
//! loop {
//!     engine.process(&mut out)?;
//!     for &peer in &out.new_connections {
//!         if let Some(msg) = engine.alloc_msg() {
//!             engine.write_msg(msg, b"ping")?;
//!             if !engine.send_msg(msg, peer) {
//!                 engine.free_msg(msg);
//!             }
//!         }
//!     }
//!     while let Some((msg, from)) = engine.recv_msg() {
//!         // handle engine.message(msg) from `from`
//!         engine.free_msg(msg);
//!     }
//! }
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod runtime;
pub mod transport;
pub mod utils;

pub use crate::config::{EngineConfig, LoggingConfig, NetworkConfig};
pub use crate::core::identity::SockId;
pub use crate::core::message::{Message, MessageId};
pub use crate::core::netip::{NetIp, NetIpKind};
pub use crate::core::registry::{AddressRegistry, Endpoint};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::handshake::{Phase, Role, Status};
pub use crate::transport::connection::PoolStats;
pub use crate::transport::peer::{Address, PeerId};
pub use crate::transport::tcp::TcpSocket;
pub use crate::transport::{ProcessOutput, Transport};
