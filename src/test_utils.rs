//! Recording fakes for the swarm's collaborators.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::peer::{PeerAddress, PeerId};
use crate::core::protocol::{Message, MessageCodec};
use crate::network::{PeerDirectory, Transport};
use crate::utils::{Result, SwarmError};

#[derive(Debug, Clone)]
pub struct SentFrame {
    pub from: PeerId,
    pub to: SocketAddr,
    pub frame: Vec<u8>,
}

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentFrame>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        }
    }

    /// Take the link down or bring it back up.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<(PeerId, SocketAddr, Message)> {
        let codec = MessageCodec::default();
        self.sent()
            .into_iter()
            .map(|s| (s.from, s.to, codec.decode(&s.frame).unwrap()))
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, from: PeerId, to: SocketAddr, frame: Vec<u8>) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SwarmError::TransportError("link down".to_string()));
        }
        self.sent.lock().unwrap().push(SentFrame { from, to, frame });
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDirectory {
    removed: Mutex<Vec<PeerAddress>>,
}

impl RecordingDirectory {
    pub fn removed(&self) -> Vec<PeerAddress> {
        self.removed.lock().unwrap().clone()
    }
}

impl PeerDirectory for RecordingDirectory {
    fn deregister(&self, address: &PeerAddress) {
        self.removed.lock().unwrap().push(*address);
    }
}
