//! # Address Registry
//!
//! Fixed-bucket hash table mapping a peer identity ([`SockId`]) to a 32-byte
//! endpoint descriptor ([`Endpoint`]).
//!
//! - The bucket index is the little-endian `u32` at bytes 8..12 of the
//!   identity, masked to the bucket count. Identities are already uniformly
//!   distributed (random or hashed), so no further hashing is done.
//! - The bucket count is a power of two fixed at construction; the table
//!   never resizes.
//! - Collisions chain through an index-linked entry arena. Each chain is kept
//!   in ascending identity order so a miss stops at the first larger entry.

use std::fmt;

use crate::core::identity::SockId;
use crate::core::netip::{NetIp, NETIP_SERIALIZED_SIZE};
use crate::error::{constants, ProtocolError, Result};

/// Default number of buckets
pub const DEFAULT_BUCKET_COUNT: usize = 4096;

/// Size of an endpoint descriptor in bytes
pub const ENDPOINT_SIZE: usize = 32;

const NIL: u32 = u32::MAX;

/// Opaque 32-byte endpoint descriptor.
///
/// The engine stores a serialized [`NetIp`] in the first 20 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Endpoint([u8; ENDPOINT_SIZE]);

impl Endpoint {
    pub const fn from_bytes(bytes: [u8; ENDPOINT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ENDPOINT_SIZE] {
        &self.0
    }

    /// Decode the netip stored by `From<NetIp>`
    pub fn to_netip(&self) -> Result<NetIp> {
        NetIp::read_from(&mut &self.0[..NETIP_SERIALIZED_SIZE])
    }
}

impl From<NetIp> for Endpoint {
    fn from(ip: NetIp) -> Self {
        let mut raw = [0u8; ENDPOINT_SIZE];
        let mut cursor = &mut raw[..];
        ip.write_to(&mut cursor);
        Self(raw)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_netip() {
            Ok(ip) => write!(f, "Endpoint({ip})"),
            Err(_) => write!(f, "Endpoint({:02x?})", &self.0[..8]),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    id: SockId,
    endpoint: Endpoint,
    next: u32,
}

/// Identity → endpoint table with fixed bucket count
#[derive(Debug, Clone)]
pub struct AddressRegistry {
    buckets: Box<[u32]>,
    mask: u32,
    entries: Vec<Entry>,
    free: Vec<u32>,
    count: usize,
}

impl AddressRegistry {
    /// Registry with [`DEFAULT_BUCKET_COUNT`] buckets
    pub fn new() -> Self {
        Self::build(DEFAULT_BUCKET_COUNT)
    }

    /// Registry with a custom bucket count
    ///
    /// # Errors
    /// `ConfigError` unless `buckets` is a non-zero power of two that fits in a `u32`.
    pub fn with_buckets(buckets: usize) -> Result<Self> {
        if !buckets.is_power_of_two() || buckets > u32::MAX as usize {
            return Err(ProtocolError::ConfigError(format!(
                "{} (got {buckets})",
                constants::ERR_BUCKETS_POWER_OF_TWO
            )));
        }
        Ok(Self::build(buckets))
    }

    fn build(buckets: usize) -> Self {
        Self {
            buckets: vec![NIL; buckets].into_boxed_slice(),
            mask: (buckets - 1) as u32,
            entries: Vec::new(),
            free: Vec::new(),
            count: 0,
        }
    }

    #[inline]
    fn bucket_of(&self, id: &SockId) -> usize {
        (id.bucket_bits() & self.mask) as usize
    }

    /// Insert `id → endpoint` if `id` is absent. Returns whether it was inserted;
    /// an existing entry is left untouched.
    pub fn add(&mut self, id: &SockId, endpoint: &Endpoint) -> bool {
        let bucket = self.bucket_of(id);

        // Find the link to splice into: stop at the first entry >= id
        let mut prev = NIL;
        let mut cur = self.buckets[bucket];
        while cur != NIL {
            let entry = &self.entries[cur as usize];
            if entry.id == *id {
                return false;
            }
            if entry.id > *id {
                break;
            }
            prev = cur;
            cur = entry.next;
        }

        let entry = Entry {
            id: *id,
            endpoint: *endpoint,
            next: cur,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.entries[slot as usize] = entry;
                slot
            }
            None => {
                self.entries.push(entry);
                (self.entries.len() - 1) as u32
            }
        };

        if prev == NIL {
            self.buckets[bucket] = slot;
        } else {
            self.entries[prev as usize].next = slot;
        }
        self.count += 1;
        true
    }

    /// Look up the endpoint registered for `id`
    pub fn get(&self, id: &SockId) -> Option<Endpoint> {
        self.find(id).map(|slot| self.entries[slot as usize].endpoint)
    }

    pub fn contains(&self, id: &SockId) -> bool {
        self.find(id).is_some()
    }

    /// Remove `id`. Returns false when it was not registered.
    pub fn remove(&mut self, id: &SockId) -> bool {
        let bucket = self.bucket_of(id);
        let mut prev = NIL;
        let mut cur = self.buckets[bucket];
        while cur != NIL {
            let entry = &self.entries[cur as usize];
            if entry.id > *id {
                return false;
            }
            if entry.id == *id {
                let next = entry.next;
                if prev == NIL {
                    self.buckets[bucket] = next;
                } else {
                    self.entries[prev as usize].next = next;
                }
                self.entries[cur as usize].next = NIL;
                self.free.push(cur);
                self.count -= 1;
                return true;
            }
            prev = cur;
            cur = entry.next;
        }
        false
    }

    /// Replace the endpoint of `id`, inserting it when absent
    pub fn upsert(&mut self, id: &SockId, endpoint: &Endpoint) {
        match self.find(id) {
            Some(slot) => self.entries[slot as usize].endpoint = *endpoint,
            None => {
                self.add(id, endpoint);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop every entry, keeping the bucket array
    pub fn clear(&mut self) {
        self.buckets.fill(NIL);
        self.entries.clear();
        self.free.clear();
        self.count = 0;
    }

    /// Iterate all entries, bucket by bucket, each chain in ascending order
    pub fn iter(&self) -> impl Iterator<Item = (&SockId, &Endpoint)> + '_ {
        self.buckets.iter().flat_map(move |&head| {
            let mut cur = head;
            std::iter::from_fn(move || {
                if cur == NIL {
                    return None;
                }
                let entry = &self.entries[cur as usize];
                cur = entry.next;
                Some((&entry.id, &entry.endpoint))
            })
        })
    }

    fn find(&self, id: &SockId) -> Option<u32> {
        let mut cur = self.buckets[self.bucket_of(id)];
        while cur != NIL {
            let entry = &self.entries[cur as usize];
            if entry.id == *id {
                return Some(cur);
            }
            if entry.id > *id {
                return None;
            }
            cur = entry.next;
        }
        None
    }

    #[cfg(test)]
    fn chain(&self, bucket: usize) -> Vec<SockId> {
        let mut out = Vec::new();
        let mut cur = self.buckets[bucket];
        while cur != NIL {
            out.push(self.entries[cur as usize].id);
            cur = self.entries[cur as usize].next;
        }
        out
    }
}

impl Default for AddressRegistry {
    fn default() -> Self {
        Self::new()
    }
}
