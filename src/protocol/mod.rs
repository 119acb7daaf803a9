//! # Protocol Layer
//!
//! The identity handshake exchanged on every new connection and the status
//! machine that tracks each connection from connect/accept to close.
//!
//! ## Handshake Flow
//! ```text
//! connector                         acceptor
//!   Connecting ──tcp connect──────▶ SecureRecv
//!   SecureSend ──[SockId|NetIp]───▶ SecureRecv  (validate)
//!   SecureRecv ◀──[SockId|NetIp]─── SecureSend
//!   Connected                       Connected
//! ```
//!
//! ## Validation
//! - Payload must be exactly 52 bytes
//! - A peer announcing our own identity is rejected
//! - A peer that already has a live connection is rejected
//! - An outbound connection must reach the identity it dialed, if one was given

pub mod handshake;

#[cfg(test)]
mod tests;
