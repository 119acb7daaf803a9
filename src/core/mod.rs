//! # Core Components
//!
//! Identity, addressing, message storage and framing.
//!
//! ## Components
//! - **Identity**: 32-byte peer identity ([`SockId`](identity::SockId))
//! - **NetIp**: tagged endpoint with a fixed 20-byte wire form
//! - **Registry**: identity → endpoint table with fixed buckets
//! - **Message**: pooled fixed-capacity buffers and index-linked queues
//! - **Frame**: length-prefixed framing over non-blocking streams
//!
//! ## Wire Format
//! ```text
//! [Length(4, big-endian)] [Payload(Length)]
//! ```
//!
//! ## Limits
//! - Frame payloads are bounded by the pooled message capacity
//! - Lengths are validated before any payload byte is read

pub mod frame;
pub mod identity;
pub mod message;
pub mod netip;
pub mod registry;
