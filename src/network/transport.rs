use std::net::{Ipv4Addr, SocketAddr};

use crate::core::peer::{PeerAddress, PeerId};
use crate::utils::Result;

/// Delivers encoded frames between peers.
///
/// Implementations may drop, delay or reorder frames; the protocol copes.
pub trait Transport: Send + Sync {
    fn send(&self, from: PeerId, to: SocketAddr, frame: Vec<u8>) -> Result<()>;
}

/// The registry peers are announced in. Eviction removes a peer from it.
pub trait PeerDirectory: Send + Sync {
    fn deregister(&self, address: &PeerAddress);
}

/// Hands out each peer's address at startup.
pub trait AddressProvider {
    fn address_for(&self, peer: PeerId) -> PeerAddress;
}

pub const DEFAULT_SIGNAL_PORT_BASE: u16 = 5000;
pub const DEFAULT_DATA_PORT_BASE: u16 = 6000;

/// `<base>.<peer>` with signal port `signal_base + peer` and data port
/// `data_base + peer`.
#[derive(Debug, Clone, Copy)]
pub struct SequentialAddresses {
    pub network: [u8; 3],
    pub signal_base: u16,
    pub data_base: u16,
}

impl Default for SequentialAddresses {
    fn default() -> Self {
        Self {
            network: [192, 168, 1],
            signal_base: DEFAULT_SIGNAL_PORT_BASE,
            data_base: DEFAULT_DATA_PORT_BASE,
        }
    }
}

impl AddressProvider for SequentialAddresses {
    fn address_for(&self, peer: PeerId) -> PeerAddress {
        let [a, b, c] = self.network;
        // Host octets wrap past 255; ports keep the peers apart as long as
        // the peer count stays within `MAX_PEER_COUNT`.
        let ip = Ipv4Addr::new(a, b, c, (peer % 256) as u8);
        PeerAddress::new(
            ip,
            self.data_base.wrapping_add(peer as u16),
            self.signal_base.wrapping_add(peer as u16),
        )
    }
}
