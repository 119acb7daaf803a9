//! # Error Types
//!
//! Error handling for the connection engine.
//!
//! Every failure in this crate is scoped: either to a single `open` call or to
//! a single connection. Nothing here is process-fatal. The multiplexer turns
//! per-connection errors into a close of that connection and keeps polling.
//!
//! ## Error Categories
//! - **I/O Errors**: socket failures, bind/listen failures
//! - **Resolution Errors**: host names that do not resolve to a usable endpoint
//! - **Protocol Errors**: oversized frames, malformed or unexpected handshake messages
//! - **Lifecycle Errors**: operations on an engine that is not open, stale handles
//! - **Configuration Errors**: invalid settings
//!
//! ## Example Usage
//! ```rust
//! use peerlink::error::{ProtocolError, Result};
//!
//! fn check_frame(len: usize, capacity: usize) -> Result<()> {
//!     if len > capacity {
//!         return Err(ProtocolError::OversizedFrame(len));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_frame(16, 8).is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Lifecycle errors
    pub const ERR_NOT_OPEN: &str = "Socket engine is not open";
    pub const ERR_ALREADY_OPEN: &str = "Socket engine is already open";

    /// Handshake-specific errors
    pub const ERR_HANDSHAKE_SIZE: &str = "Handshake payload has an invalid size";
    pub const ERR_SELF_CONNECTION: &str = "Peer announced our own identity";
    pub const ERR_DUPLICATE_PEER: &str = "Peer identity already has a live connection";
    pub const ERR_NO_IDENTITY_SLOT: &str = "No message available for the identity handshake";

    /// Connection errors
    pub const ERR_CONNECT_INCOMPLETE: &str = "Connection attempt did not complete";

    /// Resolution errors
    pub const ERR_NO_ENDPOINT: &str = "Peer has no network endpoint";
    pub const ERR_UNRESOLVED: &str = "Host did not resolve to any address";

    /// Registry errors
    pub const ERR_BUCKETS_POWER_OF_TWO: &str = "Registry bucket count must be a power of two";
}

// ProtocolError is the primary error type for all engine operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Address resolution failed: {0}")]
    AddressResolution(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Invalid netip type: {0}")]
    InvalidNetIp(u16),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Peer identity mismatch: expected {expected}, received {received}")]
    IdentityMismatch { expected: String, received: String },

    #[error("Unexpected message type")]
    UnexpectedMessage,

    #[error("{0}")]
    #[serde(skip_serializing, skip_deserializing)]
    NotOpen(&'static str),

    #[error("{0}")]
    #[serde(skip_serializing, skip_deserializing)]
    AlreadyOpen(&'static str),

    #[error("Stale or unknown handle")]
    InvalidHandle,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// True for errors caused by the remote peer misbehaving, as opposed to
    /// the socket or the local host failing.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::OversizedFrame(_)
                | ProtocolError::InvalidNetIp(_)
                | ProtocolError::HandshakeError(_)
                | ProtocolError::IdentityMismatch { .. }
                | ProtocolError::UnexpectedMessage
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
