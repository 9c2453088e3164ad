use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::config::RetryPolicy;
use crate::core::peer::{ChunkId, PeerId, PeerStore};

/// Lifecycle of one chunk on one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChunkState {
    Missing,
    Requested,
    Verified,
}

/// Result of handling a verdict or delivery for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The chunk is owned now.
    Verified,
    /// Verification failed and the chunk was requested again.
    Rerequested { target: PeerId, retries: u32 },
}

#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub peer: PeerId,
    pub chunk: ChunkId,
    pub target: PeerId,
    pub requested_at: Instant,
    pub retries: u32,
}

/// Tracks in-flight chunk requests and their retry budget.
pub struct ChunkScheduler {
    in_progress: HashMap<(PeerId, ChunkId), ChunkRequest>,
    retry_policy: RetryPolicy,
    request_timeout: Duration,
}

impl ChunkScheduler {
    pub fn new(retry_policy: RetryPolicy, request_timeout: Duration) -> Self {
        Self {
            in_progress: HashMap::new(),
            retry_policy,
            request_timeout,
        }
    }

    pub fn state(&self, store: &PeerStore, peer: PeerId, chunk: ChunkId) -> ChunkState {
        if store.get(peer).is_some_and(|record| record.owns(chunk)) {
            ChunkState::Verified
        } else if self.in_progress.contains_key(&(peer, chunk)) {
            ChunkState::Requested
        } else {
            ChunkState::Missing
        }
    }

    pub fn is_requested(&self, peer: PeerId, chunk: ChunkId) -> bool {
        self.in_progress.contains_key(&(peer, chunk))
    }

    /// Record a request as sent. A re-request keeps the retry count it already has.
    pub fn mark_requested(&mut self, peer: PeerId, chunk: ChunkId, target: PeerId) {
        let now = Instant::now();
        self.in_progress
            .entry((peer, chunk))
            .and_modify(|request| {
                request.target = target;
                request.requested_at = now;
            })
            .or_insert(ChunkRequest {
                peer,
                chunk,
                target,
                requested_at: now,
                retries: 0,
            });
        debug!("Chunk {} requested by peer {} from {}", chunk, peer, target);
    }

    /// Spend one retry and point the request at `target`. Returns the new
    /// retry count, or `None` once the budget is exhausted, in which case the
    /// chunk drops back to Missing.
    pub fn begin_retry(&mut self, peer: PeerId, chunk: ChunkId, target: PeerId) -> Option<u32> {
        let retries = self
            .in_progress
            .get(&(peer, chunk))
            .map_or(1, |request| request.retries + 1);

        if !self.retry_policy.allows(retries) {
            self.in_progress.remove(&(peer, chunk));
            debug!(
                "Chunk {} on peer {} out of retries after {}",
                chunk,
                peer,
                retries - 1
            );
            return None;
        }

        self.in_progress.insert(
            (peer, chunk),
            ChunkRequest {
                peer,
                chunk,
                target,
                requested_at: Instant::now(),
                retries,
            },
        );
        Some(retries)
    }

    pub fn mark_completed(&mut self, peer: PeerId, chunk: ChunkId) -> Option<ChunkRequest> {
        let request = self.in_progress.remove(&(peer, chunk));
        if request.is_some() {
            debug!("Chunk {} completed on peer {}", chunk, peer);
        }
        request
    }

    /// Drop every request made by `peer`.
    pub fn forget_peer(&mut self, peer: PeerId) {
        self.in_progress.retain(|(requester, _), _| *requester != peer);
    }

    /// Requests that have waited longer than the request timeout.
    pub fn stale_requests(&self, now: Instant) -> Vec<ChunkRequest> {
        let mut stale: Vec<ChunkRequest> = self
            .in_progress
            .values()
            .filter(|request| now.duration_since(request.requested_at) >= self.request_timeout)
            .cloned()
            .collect();
        stale.sort_by_key(|request| (request.peer, request.chunk));
        stale
    }

    pub fn retry_limit(&self) -> Option<u32> {
        self.retry_policy.max_retries
    }

    pub fn in_flight(&self) -> usize {
        self.in_progress.len()
    }
}
