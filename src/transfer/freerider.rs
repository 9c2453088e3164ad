//! Reputation policy: find peers that take more than they give and evict them.

use log::warn;
use serde::Serialize;
use std::fmt;

use crate::core::config::Config;
use crate::core::peer::{PeerAddress, PeerId, PeerRecord, PeerStore};
use crate::network::PeerDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EvictionReason {
    LowRatio { ratio: f64 },
    ExcessRequests { pending: u32 },
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionReason::LowRatio { ratio } => write!(f, "upload ratio {:.3}", ratio),
            EvictionReason::ExcessRequests { pending } => {
                write!(f, "{} unanswered requests", pending)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Eviction {
    pub peer: PeerId,
    pub address: PeerAddress,
    pub reason: EvictionReason,
}

#[derive(Debug, Clone, Copy)]
pub struct FreeriderDetector {
    ratio_threshold: f64,
    pending_request_threshold: u32,
    ratio_grace_bytes: u64,
}

impl FreeriderDetector {
    pub fn new(config: &Config) -> Self {
        Self {
            ratio_threshold: config.ratio_threshold,
            pending_request_threshold: config.pending_request_threshold,
            ratio_grace_bytes: config.ratio_grace_bytes,
        }
    }

    /// Why `record` breaches the policy, if it does.
    pub fn assess(&self, record: &PeerRecord) -> Option<EvictionReason> {
        let ratio = record.ratio();
        if record.downloaded_bytes() > self.ratio_grace_bytes && ratio < self.ratio_threshold {
            return Some(EvictionReason::LowRatio { ratio });
        }
        if record.pending_requests() > self.pending_request_threshold {
            return Some(EvictionReason::ExcessRequests {
                pending: record.pending_requests(),
            });
        }
        None
    }

    /// Evict every non-root peer that breaches the policy.
    ///
    /// Each evicted peer is deregistered from `directory` and its slot is reset
    /// to the placeholder address.
    pub fn sweep(&self, store: &mut PeerStore, directory: &dyn PeerDirectory) -> Vec<Eviction> {
        let evictions: Vec<Eviction> = store
            .peers()
            .filter_map(|(peer, record)| {
                self.assess(record).map(|reason| Eviction {
                    peer,
                    address: record.address,
                    reason,
                })
            })
            .collect();

        for eviction in &evictions {
            warn!(
                "Evicting freerider peer {} at {}: {}",
                eviction.peer, eviction.address, eviction.reason
            );
            directory.deregister(&eviction.address);
            store.initialize(eviction.peer, PeerAddress::placeholder());
        }

        evictions
    }
}
