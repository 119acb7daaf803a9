//! Persistent peer identity.
//!
//! A [`SockId`] is a 32-byte value that names a peer independently of the
//! endpoint it is currently reachable on. It is exchanged during the handshake
//! and is the key of the [`AddressRegistry`](crate::core::registry::AddressRegistry).

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

/// Size of a peer identity in bytes
pub const SOCKID_SIZE: usize = 32;

/// 32-byte peer identity.
///
/// Ordering is lexicographic over the raw bytes, which is what the registry
/// uses to keep its bucket chains sorted.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SockId([u8; SOCKID_SIZE]);

impl SockId {
    /// The all-zero identity, used for peers whose identity is not known yet.
    pub const UNSPECIFIED: SockId = SockId([0u8; SOCKID_SIZE]);

    pub const fn from_bytes(bytes: [u8; SOCKID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build an identity from a slice, `None` unless it is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; SOCKID_SIZE] = bytes.try_into().ok()?;
        Some(Self(raw))
    }

    /// Generate a fresh random identity
    pub fn random() -> Self {
        let mut raw = [0u8; SOCKID_SIZE];
        rand::rng().fill_bytes(&mut raw);
        Self(raw)
    }

    /// Derive a stable identity from a socket name
    /// (e.g. `"node-a/10.0.0.1:3823"`).
    pub fn derive(name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"peerlink-sockid");
        hasher.update(name.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; SOCKID_SIZE] {
        &self.0
    }

    pub fn is_unspecified(&self) -> bool {
        self.0 == [0u8; SOCKID_SIZE]
    }

    /// Bucket selector: the little-endian u32 stored at bytes 8..12.
    #[inline]
    pub(crate) fn bucket_bits(&self) -> u32 {
        u32::from_le_bytes([self.0[8], self.0[9], self.0[10], self.0[11]])
    }
}

impl fmt::Display for SockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for SockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        write!(f, "SockId(")?;
        for byte in &self.0[..6] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

impl From<[u8; SOCKID_SIZE]> for SockId {
    fn from(bytes: [u8; SOCKID_SIZE]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_stable() {
        let a = SockId::derive("node-a");
        assert_eq!(a, SockId::derive("node-a"));
        assert_ne!(a, SockId::derive("node-b"));
        assert!(!a.is_unspecified());
    }

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(SockId::random(), SockId::random());
    }

    #[test]
    fn test_from_slice_requires_exact_size() {
        assert!(SockId::from_slice(&[1u8; 31]).is_none());
        assert!(SockId::from_slice(&[1u8; 33]).is_none());
        assert_eq!(SockId::from_slice(&[7u8; 32]), Some(SockId::from_bytes([7u8; 32])));
    }

    #[test]
    fn test_bucket_bits_little_endian() {
        let mut raw = [0u8; 32];
        raw[8] = 0x01;
        raw[9] = 0x02;
        raw[10] = 0x03;
        raw[11] = 0x04;
        assert_eq!(SockId::from_bytes(raw).bucket_bits(), 0x0403_0201);
    }

    #[test]
    fn test_display_is_full_hex() {
        let id = SockId::from_bytes([0xab; 32]);
        assert_eq!(id.to_string(), "ab".repeat(32));
    }
}
