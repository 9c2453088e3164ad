use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::core::protocol::Channel;
use crate::utils::{Result, SwarmError};

pub type PeerId = usize;
pub type ChunkId = u32;

/// Slot 0 is the topology root. It never takes part in accounting.
pub const ROOT_PEER: PeerId = 0;

/// A peer's parent in the static path topology, if it has a valid one.
///
/// Peer `i` asks peer `i - 1`; a parent index must be greater than zero.
pub fn parent_of(peer: PeerId) -> Option<PeerId> {
    peer.checked_sub(1).filter(|parent| *parent > ROOT_PEER)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub ip: Ipv4Addr,
    pub data_port: u16,
    pub signal_port: u16,
}

impl PeerAddress {
    pub fn new(ip: Ipv4Addr, data_port: u16, signal_port: u16) -> Self {
        Self {
            ip,
            data_port,
            signal_port,
        }
    }

    /// The address an evicted slot is reset to.
    pub fn placeholder() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, 0, 0)
    }

    pub fn is_placeholder(&self) -> bool {
        *self == Self::placeholder()
    }

    pub fn endpoint(&self, channel: Channel) -> SocketAddr {
        let port = match channel {
            Channel::Signal => self.signal_port,
            Channel::Bulk => self.data_port,
        };
        SocketAddr::V4(SocketAddrV4::new(self.ip, port))
    }
}

impl Default for PeerAddress {
    fn default() -> Self {
        Self::placeholder()
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (data {}, signal {})",
            self.ip, self.data_port, self.signal_port
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub address: PeerAddress,
    owned_chunks: Vec<bool>,
    pub(crate) uploaded_bytes: u64,
    pub(crate) downloaded_bytes: u64,
    pub(crate) integrity_failures: u64,
    pub(crate) pending_requests: u32,
}

impl PeerRecord {
    pub fn new(address: PeerAddress, chunk_count: usize) -> Self {
        Self {
            address,
            owned_chunks: vec![false; chunk_count],
            uploaded_bytes: 0,
            downloaded_bytes: 0,
            integrity_failures: 0,
            pending_requests: 0,
        }
    }

    pub fn owns(&self, chunk: ChunkId) -> bool {
        self.owned_chunks
            .get(chunk as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Returns true if the chunk was not owned before.
    pub(crate) fn mark_owned(&mut self, chunk: ChunkId) -> bool {
        match self.owned_chunks.get_mut(chunk as usize) {
            Some(owned) if !*owned => {
                *owned = true;
                true
            }
            _ => false,
        }
    }

    pub fn owned_count(&self) -> usize {
        self.owned_chunks.iter().filter(|owned| **owned).count()
    }

    pub fn missing_chunks(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.owned_chunks
            .iter()
            .enumerate()
            .filter(|(_, owned)| !**owned)
            .map(|(index, _)| index as ChunkId)
    }

    pub fn is_complete(&self) -> bool {
        self.owned_chunks.iter().all(|owned| *owned)
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes
    }

    pub fn integrity_failures(&self) -> u64 {
        self.integrity_failures
    }

    pub fn pending_requests(&self) -> u32 {
        self.pending_requests
    }
}

/// Owns every peer slot, indexed by peer id. Slot 0 is the root.
#[derive(Debug, Clone)]
pub struct PeerStore {
    records: Vec<PeerRecord>,
    chunk_count: usize,
}

impl PeerStore {
    /// Create slots `0..=peer_count`, all with the placeholder address.
    pub fn new(peer_count: usize, chunk_count: usize) -> Self {
        let records = (0..=peer_count)
            .map(|_| PeerRecord::new(PeerAddress::placeholder(), chunk_count))
            .collect();
        Self {
            records,
            chunk_count,
        }
    }

    /// Reset a slot to defaults with the given address.
    ///
    /// # Panics
    ///
    /// Panics if `peer` is not a slot of this store.
    pub fn initialize(&mut self, peer: PeerId, address: PeerAddress) {
        assert!(
            peer < self.records.len(),
            "peer {} out of range (store holds 0..={})",
            peer,
            self.peer_count()
        );
        self.records[peer] = PeerRecord::new(address, self.chunk_count);
    }

    /// Number of non-root peers.
    pub fn peer_count(&self) -> usize {
        self.records.len() - 1
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn get(&self, peer: PeerId) -> Option<&PeerRecord> {
        self.records.get(peer)
    }

    pub fn record(&self, peer: PeerId) -> Result<&PeerRecord> {
        self.records.get(peer).ok_or(SwarmError::UnknownPeer(peer))
    }

    pub(crate) fn record_mut(&mut self, peer: PeerId) -> Result<&mut PeerRecord> {
        self.records
            .get_mut(peer)
            .ok_or(SwarmError::UnknownPeer(peer))
    }

    /// Non-root peers in id order.
    pub fn peers(&self) -> impl Iterator<Item = (PeerId, &PeerRecord)> {
        self.records.iter().enumerate().skip(1)
    }

    pub fn check_chunk(&self, chunk: ChunkId) -> Result<()> {
        if (chunk as usize) < self.chunk_count {
            Ok(())
        } else {
            Err(SwarmError::ChunkOutOfRange {
                chunk,
                chunk_count: self.chunk_count,
            })
        }
    }

    /// Give a peer every chunk, making it a source for its children.
    pub fn seed(&mut self, peer: PeerId) -> Result<()> {
        let record = self.record_mut(peer)?;
        record.owned_chunks.fill(true);
        Ok(())
    }
}
