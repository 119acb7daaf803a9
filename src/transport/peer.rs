//! Known remote peers.
//!
//! Peers are owned by the engine and referenced by generational [`PeerId`]
//! handles, so a handle kept after `remove_peer` never resolves to a
//! different peer that reused the slot.

use std::collections::HashMap;

use crate::core::identity::SockId;
use crate::core::netip::NetIp;
use crate::transport::connection::ConnId;

/// Handle to a peer in the engine's peer table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId {
    index: u32,
    generation: u32,
}

/// A remote peer: its identity, where to reach it, and its live connection
#[derive(Debug, Clone)]
pub struct Address {
    sockid: SockId,
    netip: NetIp,
    pub(crate) conn: Option<ConnId>,
}

impl Address {
    pub fn sockid(&self) -> &SockId {
        &self.sockid
    }

    pub fn netip(&self) -> &NetIp {
        &self.netip
    }

    /// True while a connection (securing or open) is bound to this peer
    pub fn has_connection(&self) -> bool {
        self.conn.is_some()
    }
}

#[derive(Debug)]
struct PeerSlot {
    generation: u32,
    address: Option<Address>,
}

/// Generational arena of peers with an identity index
#[derive(Debug, Default)]
pub struct PeerTable {
    slots: Vec<PeerSlot>,
    free: Vec<u32>,
    by_sockid: HashMap<SockId, PeerId>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer, or return the existing one with the same identity after
    /// updating its endpoint. Unspecified identities are never merged.
    pub fn insert(&mut self, sockid: SockId, netip: NetIp) -> PeerId {
        if let Some(existing) = self.find(&sockid) {
            if let Some(address) = self.get_mut(existing) {
                address.netip = netip;
            }
            return existing;
        }

        let address = Address {
            sockid,
            netip,
            conn: None,
        };
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.address = Some(address);
                PeerId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(PeerSlot {
                    generation: 0,
                    address: Some(address),
                });
                PeerId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        if !sockid.is_unspecified() {
            self.by_sockid.insert(sockid, id);
        }
        id
    }

    pub fn remove(&mut self, id: PeerId) -> Option<Address> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let address = slot.address.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        if self.by_sockid.get(&address.sockid) == Some(&id) {
            self.by_sockid.remove(&address.sockid);
        }
        Some(address)
    }

    pub fn get(&self, id: PeerId) -> Option<&Address> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.address.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: PeerId) -> Option<&mut Address> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.address.as_mut()
    }

    pub fn find(&self, sockid: &SockId) -> Option<PeerId> {
        if sockid.is_unspecified() {
            return None;
        }
        self.by_sockid.get(sockid).copied()
    }

    /// Give a peer registered without an identity the one it announced.
    /// Returns false if the peer already has an identity or another peer owns it.
    pub(crate) fn adopt_sockid(&mut self, id: PeerId, sockid: SockId) -> bool {
        if sockid.is_unspecified() || self.by_sockid.contains_key(&sockid) {
            return false;
        }
        match self.get_mut(id) {
            Some(address) if address.sockid.is_unspecified() => {
                address.sockid = sockid;
                self.by_sockid.insert(sockid, id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_netip(&mut self, id: PeerId, netip: NetIp) {
        if let Some(address) = self.get_mut(id) {
            address.netip = netip;
        }
    }

    /// Detach `conn` from the peer if it is the one bound to it
    pub(crate) fn unbind(&mut self, id: PeerId, conn: ConnId) {
        if let Some(address) = self.get_mut(id) {
            if address.conn == Some(conn) {
                address.conn = None;
            }
        }
    }

    pub(crate) fn unbind_all(&mut self) {
        for slot in &mut self.slots {
            if let Some(address) = slot.address.as_mut() {
                address.conn = None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerId, &Address)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.address.as_ref().map(|address| {
                (
                    PeerId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    address,
                )
            })
        })
    }
}
