//! In-process collaborators backed by tokio channels.

use log::debug;
use std::net::SocketAddr;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::core::peer::{PeerAddress, PeerId};
use crate::network::{PeerDirectory, Transport};
use crate::utils::{Result, SwarmError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: PeerId,
    pub to: SocketAddr,
    pub frame: Vec<u8>,
}

/// Queues every frame on an unbounded channel for an event loop to deliver.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: UnboundedSender<Envelope>,
}

impl ChannelTransport {
    pub fn new() -> (Self, UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, from: PeerId, to: SocketAddr, frame: Vec<u8>) -> Result<()> {
        debug!("Peer {} -> {} ({} bytes)", from, to, frame.len());
        self.tx
            .send(Envelope { from, to, frame })
            .map_err(|_| SwarmError::TransportError("network channel closed".to_string()))
    }
}

/// Forwards deregistrations to whoever owns the address registry.
#[derive(Debug, Clone)]
pub struct ChannelDirectory {
    tx: UnboundedSender<PeerAddress>,
}

impl ChannelDirectory {
    pub fn new() -> (Self, UnboundedReceiver<PeerAddress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PeerDirectory for ChannelDirectory {
    fn deregister(&self, address: &PeerAddress) {
        // A closed registry has nothing left to remove the address from.
        let _ = self.tx.send(*address);
    }
}
