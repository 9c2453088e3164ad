use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;

use crate::core::config::{Config, RequestCounting};
use crate::core::peer::{ChunkId, PeerAddress, PeerId, PeerStore, ROOT_PEER, parent_of};
use crate::core::protocol::{Channel, Message, MessageCodec, SenderType, Verdict};
use crate::network::{
    AddressProvider, DispatchOutcome, MessageDispatcher, MessageProcessor, PeerDirectory,
    Transport,
};
use crate::transfer::{ChunkOutcome, ChunkScheduler, ChunkState, Eviction, FreeriderDetector};
use crate::utils::{Result, SwarmError, SwarmMetrics};

/// The chunk protocol for every peer in one swarm.
///
/// All operations run to completion on the caller's task. Each event that
/// changes accounting is followed by a freerider sweep.
pub struct Swarm {
    config: Config,
    store: PeerStore,
    scheduler: ChunkScheduler,
    detector: FreeriderDetector,
    dispatcher: MessageDispatcher,
    codec: MessageCodec,
    transport: Arc<dyn Transport>,
    directory: Arc<dyn PeerDirectory>,
    metrics: SwarmMetrics,
    evictions: Vec<Eviction>,
}

impl Swarm {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn PeerDirectory>,
    ) -> Result<Self> {
        config.validate()?;

        let codec = MessageCodec::new(config.payload_size);
        Ok(Self {
            store: PeerStore::new(config.peer_count, config.chunk_count),
            scheduler: ChunkScheduler::new(config.retry, config.request_timeout()),
            detector: FreeriderDetector::new(&config),
            dispatcher: MessageDispatcher::new(codec),
            codec,
            transport,
            directory,
            metrics: SwarmMetrics::default(),
            evictions: Vec::new(),
            config,
        })
    }

    /// Give every slot, the root included, its provisioned address.
    pub fn bootstrap(&mut self, addresses: &dyn AddressProvider) {
        for peer in 0..=self.store.peer_count() {
            self.initialize(peer, addresses.address_for(peer));
        }
        info!(
            "Swarm of {} peers ready to share {} chunks",
            self.store.peer_count(),
            self.store.chunk_count()
        );
    }

    /// Reset a slot, dropping any requests it had in flight.
    ///
    /// # Panics
    ///
    /// Panics if `peer` is not a slot of this swarm.
    pub fn initialize(&mut self, peer: PeerId, address: PeerAddress) {
        self.store.initialize(peer, address);
        self.scheduler.forget_peer(peer);
    }

    /// Request `chunk` for `peer` unless it already owns it.
    ///
    /// Every call for a chunk that is not owned sends a request and counts
    /// against the peer's pending requests, even while one is in flight.
    pub fn ensure_chunk(&mut self, peer: PeerId, chunk: ChunkId) -> Result<ChunkState> {
        self.store.record(peer)?;
        self.store.check_chunk(chunk)?;

        if self.store.record(peer)?.owns(chunk) {
            return Ok(ChunkState::Verified);
        }
        self.issue_request(peer, chunk)?;
        Ok(ChunkState::Requested)
    }

    /// Ask the parent of `peer` for `chunk`.
    pub fn issue_request(&mut self, peer: PeerId, chunk: ChunkId) -> Result<()> {
        let Some(parent) = parent_of(peer) else {
            warn!("Peer {} has no valid parent for chunk {}", peer, chunk);
            return Err(SwarmError::NoValidParent { peer, chunk });
        };
        self.send_request(peer, chunk, parent)
    }

    fn check_target(&self, peer: PeerId, chunk: ChunkId, target: PeerId) -> Result<()> {
        if target > ROOT_PEER && target <= self.store.peer_count() {
            Ok(())
        } else {
            warn!(
                "Peer {} cannot request chunk {} from peer {}",
                peer, chunk, target
            );
            Err(SwarmError::NoValidParent { peer, chunk })
        }
    }

    fn send_request(&mut self, peer: PeerId, chunk: ChunkId, target: PeerId) -> Result<()> {
        self.check_target(peer, chunk, target)?;

        let endpoint = self.store.record(target)?.address.endpoint(Channel::Signal);
        let frame = self.codec.encode(&Message::ChunkRequest { chunk })?;
        self.transport.send(peer, endpoint, frame)?;

        let record = self.store.record_mut(peer)?;
        record.pending_requests = record.pending_requests.saturating_add(1);
        self.scheduler.mark_requested(peer, chunk, target);
        self.metrics.record_request_sent();
        Ok(())
    }

    /// A request of `peer` for `chunk` got its answer. A completed request
    /// leaves the scheduler; a failed one stays to keep its retry count.
    fn settle_request(&mut self, peer: PeerId, chunk: ChunkId, completed: bool) -> Result<()> {
        let answered = if completed {
            self.scheduler.mark_completed(peer, chunk).is_some()
        } else {
            self.scheduler.is_requested(peer, chunk)
        };
        if answered && self.config.request_counting == RequestCounting::Outstanding {
            let record = self.store.record_mut(peer)?;
            record.pending_requests = record.pending_requests.saturating_sub(1);
        }
        Ok(())
    }

    /// Apply a parent's verdict on `chunk`. A failed verdict re-requests the
    /// chunk from `parent`.
    pub fn handle_integrity_result(
        &mut self,
        peer: PeerId,
        chunk: ChunkId,
        verdict: Verdict,
        parent: PeerId,
    ) -> Result<ChunkOutcome> {
        self.store.record(peer)?;
        self.store.check_chunk(chunk)?;

        let valid = verdict.is_valid();
        self.store.record_transfer(peer, 0, 0, !valid)?;
        self.metrics.record_integrity_result(valid);
        self.settle_request(peer, chunk, valid)?;

        let outcome = if valid {
            self.store.record_mut(peer)?.mark_owned(chunk);
            debug!("Peer {} verified chunk {}", peer, chunk);
            Ok(ChunkOutcome::Verified)
        } else {
            self.retry_failed(peer, chunk, parent)
        };

        self.sweep();
        outcome
    }

    fn retry_failed(&mut self, peer: PeerId, chunk: ChunkId, parent: PeerId) -> Result<ChunkOutcome> {
        warn!("Chunk {} failed verification on peer {}", chunk, peer);
        if let Err(e) = self.check_target(peer, chunk, parent) {
            self.scheduler.mark_completed(peer, chunk);
            return Err(e);
        }
        let retries = self.begin_retry(peer, chunk, parent)?;
        self.resend_request(peer, chunk, parent)?;
        Ok(ChunkOutcome::Rerequested {
            target: parent,
            retries,
        })
    }

    /// Send a retry. A retry that never left drops the chunk back to Missing.
    fn resend_request(&mut self, peer: PeerId, chunk: ChunkId, target: PeerId) -> Result<()> {
        let sent = self.send_request(peer, chunk, target);
        if sent.is_err() {
            self.scheduler.mark_completed(peer, chunk);
        }
        sent
    }

    fn begin_retry(&mut self, peer: PeerId, chunk: ChunkId, target: PeerId) -> Result<u32> {
        match self.scheduler.begin_retry(peer, chunk, target) {
            Some(retries) => Ok(retries),
            None => {
                let limit = self.scheduler.retry_limit().unwrap_or(u32::MAX);
                warn!(
                    "Peer {} gave up on chunk {} after {} retries",
                    peer, chunk, limit
                );
                self.metrics.record_retries_exhausted();
                Err(SwarmError::RetryLimitExceeded { peer, chunk, limit })
            }
        }
    }

    /// Accept a chunk delivered over the trusted path, unverified.
    pub fn handle_data_delivery(&mut self, peer: PeerId, chunk: ChunkId) -> Result<ChunkOutcome> {
        self.store.record(peer)?;
        self.store.check_chunk(chunk)?;

        self.settle_request(peer, chunk, true)?;
        self.store.record_mut(peer)?.mark_owned(chunk);
        self.metrics.record_trusted_delivery();
        debug!("Peer {} accepted delivery of chunk {}", peer, chunk);

        self.sweep();
        Ok(ChunkOutcome::Verified)
    }

    pub fn handle_unknown_tag(&mut self, peer: PeerId, tag: u8) {
        warn!("Peer {} received a message with unknown tag {}", peer, tag);
        self.metrics.record_unknown_tag();
    }

    /// Evict every peer that breaches the reputation policy.
    pub fn sweep(&mut self) -> Vec<Eviction> {
        let evictions = self.detector.sweep(&mut self.store, self.directory.as_ref());
        for eviction in &evictions {
            self.scheduler.forget_peer(eviction.peer);
        }
        self.metrics.record_evictions(evictions.len());
        self.evictions.extend(evictions.iter().cloned());
        evictions
    }

    /// Account bytes moved by `peer`, then sweep.
    pub fn record_transfer(
        &mut self,
        peer: PeerId,
        uploaded: u64,
        downloaded: u64,
        integrity_failed: bool,
    ) -> Result<Vec<Eviction>> {
        self.store
            .record_transfer(peer, uploaded, downloaded, integrity_failed)?;
        Ok(self.sweep())
    }

    /// Re-issue every request that has waited past the request timeout.
    ///
    /// Returns how many were sent again. Requests out of retries fall back to
    /// Missing. Under outstanding counting an expired request stops counting.
    pub fn expire_stale_requests(&mut self) -> usize {
        let mut reissued = 0;
        for request in self.scheduler.stale_requests(Instant::now()) {
            let (peer, chunk, target) = (request.peer, request.chunk, request.target);
            debug!("Request for chunk {} by peer {} timed out", chunk, peer);
            let result = self
                .settle_request(peer, chunk, false)
                .and_then(|()| self.begin_retry(peer, chunk, target))
                .and_then(|_| self.resend_request(peer, chunk, target));
            match result {
                Ok(()) => reissued += 1,
                Err(SwarmError::RetryLimitExceeded { .. }) => {}
                Err(e) => warn!("Could not re-request chunk {} for peer {}: {}", chunk, peer, e),
            }
        }
        reissued
    }

    /// Decode one inbound frame for `peer` and act on it.
    pub fn dispatch(&mut self, peer: PeerId, frame: &[u8]) -> Result<DispatchOutcome> {
        let dispatcher = self.dispatcher;
        dispatcher.dispatch(self, peer, frame)
    }

    pub fn chunk_state(&self, peer: PeerId, chunk: ChunkId) -> ChunkState {
        self.scheduler.state(&self.store, peer, chunk)
    }

    pub fn store(&self) -> &PeerStore {
        &self.store
    }

    /// Mark every chunk owned by `peer`.
    pub fn seed(&mut self, peer: PeerId) -> Result<()> {
        self.store.seed(peer)?;
        info!("Peer {} seeded with all {} chunks", peer, self.store.chunk_count());
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn codec(&self) -> MessageCodec {
        self.codec
    }

    pub fn metrics(&self) -> &SwarmMetrics {
        &self.metrics
    }

    /// Every eviction so far, oldest first.
    pub fn evictions(&self) -> &[Eviction] {
        &self.evictions
    }

    pub fn in_flight(&self) -> usize {
        self.scheduler.in_flight()
    }
}

impl MessageProcessor for Swarm {
    fn on_integrity_result(
        &mut self,
        peer: PeerId,
        chunk: ChunkId,
        verdict: Verdict,
    ) -> Result<ChunkOutcome> {
        let parent = parent_of(peer).unwrap_or(ROOT_PEER);
        self.handle_integrity_result(peer, chunk, verdict, parent)
    }

    fn on_data_delivery(&mut self, peer: PeerId, chunk: ChunkId) -> Result<ChunkOutcome> {
        self.handle_data_delivery(peer, chunk)
    }

    fn on_unknown_tag(&mut self, peer: PeerId, tag: u8) {
        self.handle_unknown_tag(peer, tag);
    }

    fn on_unsupported(&mut self, peer: PeerId, kind: SenderType, chunk: ChunkId) {
        debug!("Peer {} leaves {:?} for chunk {} to its host", peer, kind, chunk);
        self.metrics.record_unsupported();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RetryPolicy;
    use crate::network::SequentialAddresses;
    use crate::test_utils::{RecordingDirectory, RecordingTransport};
    use crate::transfer::EvictionReason;
    use std::time::Duration;

    struct Harness {
        swarm: Swarm,
        transport: Arc<RecordingTransport>,
        directory: Arc<RecordingDirectory>,
    }

    fn harness(config: Config) -> Harness {
        let transport = Arc::new(RecordingTransport::default());
        let directory = Arc::new(RecordingDirectory::default());
        let mut swarm = Swarm::new(config, transport.clone(), directory.clone()).unwrap();
        swarm.bootstrap(&SequentialAddresses::default());
        Harness {
            swarm,
            transport,
            directory,
        }
    }

    fn default_harness() -> Harness {
        harness(Config::default())
    }

    fn request_frame(chunk: ChunkId) -> Message {
        Message::ChunkRequest { chunk }
    }

    #[test]
    fn test_ratio_breach_evicts() {
        let mut h = default_harness();
        let address = h.swarm.store().get(3).unwrap().address;

        let evictions = h.swarm.record_transfer(3, 10, 200, false).unwrap();

        assert_eq!(evictions.len(), 1);
        assert_eq!(evictions[0].peer, 3);
        assert!(matches!(evictions[0].reason, EvictionReason::LowRatio { .. }));
        assert_eq!(h.directory.removed(), vec![address]);
        assert!(h.swarm.store().get(3).unwrap().address.is_placeholder());
        assert_eq!(h.swarm.metrics().evictions, 1);
    }

    #[test]
    fn test_unanswered_requests_evict() {
        let mut h = default_harness();
        for chunk in 0..6 {
            h.swarm.issue_request(4, chunk).unwrap();
        }
        assert_eq!(h.swarm.store().get(4).unwrap().pending_requests(), 6);

        let evictions = h.swarm.sweep();
        assert_eq!(evictions.len(), 1);
        assert_eq!(evictions[0].reason, EvictionReason::ExcessRequests { pending: 6 });
        assert_eq!(h.swarm.in_flight(), 0);
    }

    #[test]
    fn test_invalid_result_rerequests_from_parent() {
        let mut h = default_harness();

        let outcome = h
            .swarm
            .handle_integrity_result(2, 42, Verdict::Invalid, 1)
            .unwrap();

        assert_eq!(
            outcome,
            ChunkOutcome::Rerequested {
                target: 1,
                retries: 1
            }
        );
        let record = h.swarm.store().get(2).unwrap();
        assert_eq!(record.integrity_failures(), 1);
        assert!(!record.owns(42));

        let sent = h.transport.sent_messages();
        let parent_signal = SequentialAddresses::default()
            .address_for(1)
            .endpoint(Channel::Signal);
        assert_eq!(sent, vec![(2, parent_signal, request_frame(42))]);
        assert_eq!(h.swarm.chunk_state(2, 42), ChunkState::Requested);
    }

    #[test]
    fn test_valid_result_marks_owned() {
        let mut h = default_harness();

        let outcome = h
            .swarm
            .handle_integrity_result(2, 7, Verdict::Valid, 1)
            .unwrap();

        assert_eq!(outcome, ChunkOutcome::Verified);
        let record = h.swarm.store().get(2).unwrap();
        assert!(record.owns(7));
        assert_eq!(record.integrity_failures(), 0);
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.swarm.chunk_state(2, 7), ChunkState::Verified);
    }

    #[test]
    fn test_root_has_no_parent() {
        let mut h = default_harness();
        let before = h.swarm.store().get(0).unwrap().clone();

        let result = h.swarm.ensure_chunk(0, 5);

        assert!(matches!(
            result,
            Err(SwarmError::NoValidParent { peer: 0, chunk: 5 })
        ));
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.swarm.store().get(0).unwrap(), &before);
        assert_eq!(h.swarm.chunk_state(0, 5), ChunkState::Missing);
    }

    #[test]
    fn test_seed_peer_has_no_parent() {
        let mut h = default_harness();
        assert!(matches!(
            h.swarm.ensure_chunk(1, 0),
            Err(SwarmError::NoValidParent { peer: 1, .. })
        ));
        assert_eq!(h.swarm.store().get(1).unwrap().pending_requests(), 0);
    }

    #[test]
    fn test_ensure_chunk_lifecycle() {
        let mut h = default_harness();

        assert_eq!(h.swarm.ensure_chunk(3, 11).unwrap(), ChunkState::Requested);
        assert_eq!(h.swarm.ensure_chunk(3, 11).unwrap(), ChunkState::Requested);
        assert_eq!(h.transport.sent().len(), 2);
        assert_eq!(h.swarm.store().get(3).unwrap().pending_requests(), 2);

        h.swarm
            .handle_integrity_result(3, 11, Verdict::Valid, 2)
            .unwrap();
        assert_eq!(h.swarm.ensure_chunk(3, 11).unwrap(), ChunkState::Verified);
        assert_eq!(h.transport.sent().len(), 2);
    }

    #[test]
    fn test_repeated_ensure_counts_every_request() {
        let mut h = default_harness();
        for _ in 0..6 {
            assert_eq!(h.swarm.ensure_chunk(4, 0).unwrap(), ChunkState::Requested);
        }
        assert_eq!(h.transport.sent().len(), 6);
        assert_eq!(h.swarm.store().get(4).unwrap().pending_requests(), 6);

        let evictions = h.swarm.sweep();
        assert_eq!(evictions.len(), 1);
        assert_eq!(evictions[0].peer, 4);
        assert_eq!(evictions[0].reason, EvictionReason::ExcessRequests { pending: 6 });
    }

    #[test]
    fn test_ensure_chunk_rejects_bad_ids() {
        let mut h = default_harness();
        assert!(matches!(
            h.swarm.ensure_chunk(3, 100),
            Err(SwarmError::ChunkOutOfRange { chunk: 100, .. })
        ));
        assert!(matches!(
            h.swarm.ensure_chunk(42, 0),
            Err(SwarmError::UnknownPeer(42))
        ));
        assert!(h.transport.sent().is_empty());
    }

    #[test]
    fn test_requests_use_big_endian_chunk_index() {
        let mut h = harness(Config {
            request_counting: RequestCounting::Outstanding,
            ..Config::default()
        });
        for chunk in 0..100 {
            h.swarm.issue_request(2, chunk).unwrap();
            h.swarm
                .handle_integrity_result(2, chunk, Verdict::Valid, 1)
                .unwrap();
        }

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 100);
        for (chunk, frame) in sent.iter().enumerate() {
            assert_eq!(frame.frame.len(), 1029);
            assert_eq!(frame.frame[0], 3);
            assert_eq!(&frame.frame[1..5], &(chunk as u32).to_be_bytes());
        }
        assert!(h.swarm.store().get(2).unwrap().is_complete());
    }

    #[test]
    fn test_delivery_marks_owned_without_verification() {
        let mut h = default_harness();
        h.swarm.ensure_chunk(5, 3).unwrap();

        let outcome = h.swarm.handle_data_delivery(5, 3).unwrap();
        assert_eq!(outcome, ChunkOutcome::Verified);
        assert!(h.swarm.store().get(5).unwrap().owns(3));
        assert_eq!(h.swarm.metrics().trusted_deliveries, 1);
        // Cumulative counting keeps the request on the books.
        assert_eq!(h.swarm.store().get(5).unwrap().pending_requests(), 1);
    }

    #[test]
    fn test_outstanding_counting_settles_requests() {
        let mut h = harness(Config {
            request_counting: RequestCounting::Outstanding,
            ..Config::default()
        });
        for chunk in 0..5 {
            h.swarm.ensure_chunk(6, chunk).unwrap();
        }
        h.swarm
            .handle_integrity_result(6, 0, Verdict::Valid, 5)
            .unwrap();
        h.swarm.handle_data_delivery(6, 1).unwrap();
        assert_eq!(h.swarm.store().get(6).unwrap().pending_requests(), 3);

        h.swarm
            .handle_integrity_result(6, 2, Verdict::Invalid, 5)
            .unwrap();
        assert_eq!(h.swarm.store().get(6).unwrap().pending_requests(), 3);

        // Unsolicited answers do not push the count below zero.
        h.swarm.handle_data_delivery(6, 50).unwrap();
        assert_eq!(h.swarm.store().get(6).unwrap().pending_requests(), 3);
    }

    #[test]
    fn test_retry_limit() {
        let mut h = harness(Config {
            retry: RetryPolicy {
                max_retries: Some(2),
            },
            request_counting: RequestCounting::Outstanding,
            ..Config::default()
        });
        h.swarm.ensure_chunk(2, 9).unwrap();

        for expected in 1..=2 {
            let outcome = h
                .swarm
                .handle_integrity_result(2, 9, Verdict::Invalid, 1)
                .unwrap();
            assert_eq!(
                outcome,
                ChunkOutcome::Rerequested {
                    target: 1,
                    retries: expected
                }
            );
        }
        let result = h.swarm.handle_integrity_result(2, 9, Verdict::Invalid, 1);

        assert!(matches!(
            result,
            Err(SwarmError::RetryLimitExceeded {
                peer: 2,
                chunk: 9,
                limit: 2
            })
        ));
        assert_eq!(h.swarm.chunk_state(2, 9), ChunkState::Missing);
        assert_eq!(h.swarm.store().get(2).unwrap().integrity_failures(), 3);
        assert_eq!(h.transport.sent().len(), 3);
        assert_eq!(h.swarm.metrics().retries_exhausted, 1);

        // A fresh cycle starts with a full budget.
        assert_eq!(h.swarm.ensure_chunk(2, 9).unwrap(), ChunkState::Requested);
    }

    #[test]
    fn test_failed_verdict_with_invalid_parent() {
        let mut h = default_harness();
        let result = h.swarm.handle_integrity_result(3, 1, Verdict::Invalid, 0);
        assert!(matches!(result, Err(SwarmError::NoValidParent { .. })));
        assert_eq!(h.swarm.store().get(3).unwrap().integrity_failures(), 1);
        assert!(h.transport.sent().is_empty());
    }

    #[test]
    fn test_failed_verdict_for_owned_chunk() {
        let mut h = default_harness();
        h.swarm
            .handle_integrity_result(2, 4, Verdict::Valid, 1)
            .unwrap();
        let outcome = h
            .swarm
            .handle_integrity_result(2, 4, Verdict::Invalid, 1)
            .unwrap();
        assert_eq!(
            outcome,
            ChunkOutcome::Rerequested {
                target: 1,
                retries: 1
            }
        );
        let record = h.swarm.store().get(2).unwrap();
        assert!(record.owns(4));
        assert_eq!(record.integrity_failures(), 1);
        assert_eq!(record.pending_requests(), 1);

        let parent_signal = SequentialAddresses::default()
            .address_for(1)
            .endpoint(Channel::Signal);
        assert_eq!(
            h.transport.sent_messages(),
            vec![(2, parent_signal, request_frame(4))]
        );
    }

    #[test]
    fn test_results_sweep_every_peer() {
        let mut h = default_harness();
        h.swarm.store.record_mut(7).unwrap().pending_requests = 8;

        h.swarm
            .handle_integrity_result(2, 0, Verdict::Valid, 1)
            .unwrap();

        assert_eq!(h.swarm.evictions().len(), 1);
        assert_eq!(h.swarm.evictions()[0].peer, 7);
    }

    #[test]
    fn test_delivery_sweeps_every_peer() {
        let mut h = default_harness();
        h.swarm.store.record_mut(7).unwrap().pending_requests = 8;

        h.swarm.handle_data_delivery(2, 0).unwrap();

        assert_eq!(h.swarm.evictions().len(), 1);
        assert_eq!(h.swarm.evictions()[0].peer, 7);
        assert_eq!(
            h.swarm.evictions()[0].reason,
            EvictionReason::ExcessRequests { pending: 8 }
        );
    }

    #[test]
    fn test_repeated_sweeps_are_idempotent() {
        let mut h = default_harness();
        h.swarm.record_transfer(2, 0, 1024, false).unwrap();
        h.swarm.store.record_mut(5).unwrap().pending_requests = 6;

        let first = h.swarm.sweep();
        let second = h.swarm.sweep();

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].peer, 5);
        assert!(second.is_empty());
        assert_eq!(h.directory.removed().len(), 2);
    }

    #[test]
    fn test_stale_requests_are_reissued() {
        let mut h = harness(Config {
            request_timeout_ms: 0,
            retry: RetryPolicy {
                max_retries: Some(1),
            },
            ..Config::default()
        });
        h.swarm.ensure_chunk(3, 2).unwrap();

        std::thread::sleep(Duration::from_millis(1));
        assert_eq!(h.swarm.expire_stale_requests(), 1);
        assert_eq!(h.transport.sent().len(), 2);

        std::thread::sleep(Duration::from_millis(1));
        assert_eq!(h.swarm.expire_stale_requests(), 0);
        assert_eq!(h.swarm.chunk_state(3, 2), ChunkState::Missing);
        assert_eq!(h.swarm.metrics().retries_exhausted, 1);
    }

    #[test]
    fn test_expired_requests_stop_counting_when_outstanding() {
        let mut h = harness(Config {
            request_timeout_ms: 0,
            request_counting: RequestCounting::Outstanding,
            ..Config::default()
        });
        for chunk in 0..3 {
            h.swarm.ensure_chunk(4, chunk).unwrap();
        }

        std::thread::sleep(Duration::from_millis(1));
        assert_eq!(h.swarm.expire_stale_requests(), 3);
        assert_eq!(h.swarm.store().get(4).unwrap().pending_requests(), 3);
        assert_eq!(h.transport.sent().len(), 6);
    }

    #[test]
    fn test_dispatch_routes_to_handlers() {
        let mut h = default_harness();
        let codec = h.swarm.codec();

        let invalid = codec
            .encode(&Message::IntegrityResult {
                chunk: 42,
                verdict: Verdict::Invalid,
            })
            .unwrap();
        let outcome = h.swarm.dispatch(2, &invalid).unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Handled(ChunkOutcome::Rerequested {
                target: 1,
                retries: 1
            })
        );

        let request = codec.encode(&request_frame(3)).unwrap();
        assert_eq!(
            h.swarm.dispatch(1, &request).unwrap(),
            DispatchOutcome::Unsupported {
                kind: SenderType::ChunkRequest,
                chunk: 3
            }
        );

        let mut unknown = request.clone();
        unknown[0] = 99;
        assert_eq!(
            h.swarm.dispatch(4, &unknown).unwrap(),
            DispatchOutcome::UnknownTag(99)
        );

        let metrics = h.swarm.metrics();
        assert_eq!(metrics.integrity_failures, 1);
        assert_eq!(metrics.unsupported_messages, 1);
        assert_eq!(metrics.unknown_tags, 1);
        assert_eq!(h.swarm.store().get(4).unwrap().integrity_failures(), 0);
    }

    #[test]
    fn test_dispatch_rejects_out_of_range_chunk() {
        let mut h = default_harness();
        let frame = h
            .swarm
            .codec()
            .encode(&Message::IntegrityResult {
                chunk: 1000,
                verdict: Verdict::Valid,
            })
            .unwrap();
        assert!(matches!(
            h.swarm.dispatch(2, &frame),
            Err(SwarmError::ChunkOutOfRange { chunk: 1000, .. })
        ));
        assert_eq!(h.swarm.store().get(2).unwrap().owned_count(), 0);
    }

    #[test]
    fn test_transport_failure_leaves_chunk_missing() {
        let transport = Arc::new(RecordingTransport::failing());
        let directory = Arc::new(RecordingDirectory::default());
        let mut swarm = Swarm::new(Config::default(), transport, directory).unwrap();
        swarm.bootstrap(&SequentialAddresses::default());

        assert!(matches!(
            swarm.ensure_chunk(2, 0),
            Err(SwarmError::TransportError(_))
        ));
        assert_eq!(swarm.chunk_state(2, 0), ChunkState::Missing);
        assert_eq!(swarm.store().get(2).unwrap().pending_requests(), 0);
    }

    #[test]
    fn test_failed_retry_send_leaves_chunk_missing() {
        let mut h = harness(Config {
            request_counting: RequestCounting::Outstanding,
            ..Config::default()
        });
        h.swarm.ensure_chunk(2, 9).unwrap();
        h.transport.set_failing(true);

        let result = h.swarm.handle_integrity_result(2, 9, Verdict::Invalid, 1);

        assert!(matches!(result, Err(SwarmError::TransportError(_))));
        assert_eq!(h.swarm.chunk_state(2, 9), ChunkState::Missing);
        assert_eq!(h.swarm.in_flight(), 0);
        assert_eq!(h.swarm.store().get(2).unwrap().pending_requests(), 0);
    }

    #[test]
    fn test_failed_reissue_leaves_chunk_missing() {
        let mut h = harness(Config {
            request_timeout_ms: 0,
            request_counting: RequestCounting::Outstanding,
            ..Config::default()
        });
        h.swarm.ensure_chunk(3, 2).unwrap();
        h.transport.set_failing(true);

        std::thread::sleep(Duration::from_millis(1));
        assert_eq!(h.swarm.expire_stale_requests(), 0);
        assert_eq!(h.swarm.chunk_state(3, 2), ChunkState::Missing);
        assert_eq!(h.swarm.in_flight(), 0);
        assert_eq!(h.swarm.store().get(3).unwrap().pending_requests(), 0);

        // Once the link is back a new request starts from scratch.
        h.transport.set_failing(false);
        assert_eq!(h.swarm.ensure_chunk(3, 2).unwrap(), ChunkState::Requested);
        assert_eq!(h.transport.sent().len(), 2);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = Config {
            peer_count: 0,
            ..Config::default()
        };
        let result = Swarm::new(
            config,
            Arc::new(RecordingTransport::default()),
            Arc::new(RecordingDirectory::default()),
        );
        assert!(matches!(result, Err(SwarmError::ConfigError(_))));
    }
}
