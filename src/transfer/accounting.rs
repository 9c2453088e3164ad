//! Upload/download bookkeeping and the reputation ratio.

use serde::Serialize;

use crate::core::peer::{PeerId, PeerRecord, PeerStore};
use crate::utils::Result;

impl PeerRecord {
    pub fn record_transfer(&mut self, uploaded: u64, downloaded: u64, integrity_failed: bool) {
        self.uploaded_bytes = self.uploaded_bytes.saturating_add(uploaded);
        self.downloaded_bytes = self.downloaded_bytes.saturating_add(downloaded);
        if integrity_failed {
            self.integrity_failures = self.integrity_failures.saturating_add(1);
        }
    }

    /// Uploaded over downloaded bytes, or 0.0 before anything was downloaded.
    pub fn ratio(&self) -> f64 {
        if self.downloaded_bytes > 0 {
            self.uploaded_bytes as f64 / self.downloaded_bytes as f64
        } else {
            0.0
        }
    }

    pub fn stats(&self) -> TransferStats {
        TransferStats {
            uploaded_bytes: self.uploaded_bytes,
            downloaded_bytes: self.downloaded_bytes,
            integrity_failures: self.integrity_failures,
            pending_requests: self.pending_requests,
            ratio: self.ratio(),
        }
    }
}

impl PeerStore {
    pub fn record_transfer(
        &mut self,
        peer: PeerId,
        uploaded: u64,
        downloaded: u64,
        integrity_failed: bool,
    ) -> Result<()> {
        self.record_mut(peer)?
            .record_transfer(uploaded, downloaded, integrity_failed);
        Ok(())
    }

    pub fn ratio(&self, peer: PeerId) -> Result<f64> {
        Ok(self.record(peer)?.ratio())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransferStats {
    pub uploaded_bytes: u64,
    pub downloaded_bytes: u64,
    pub integrity_failures: u64,
    pub pending_requests: u32,
    pub ratio: f64,
}
