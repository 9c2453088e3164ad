use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{self, MissedTickBehavior};

use crate::core::peer::{ChunkId, PeerAddress, PeerId, parent_of};
use crate::core::protocol::{Channel, Message, SenderType};
use crate::core::{Config, Swarm};
use crate::network::{
    AddressProvider, ChannelDirectory, ChannelTransport, DispatchOutcome, Envelope,
    SequentialAddresses, Transport,
};
use crate::storage::{ChunkManifest, ChunkSource};
use crate::transfer::{ChunkState, Eviction, TransferStats};
use crate::utils::{Result, SwarmError, SwarmMetrics};

/// The peer that starts out holding the whole file.
pub const SEED_PEER: PeerId = 1;

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub seed: u64,
    /// Chance that any frame is lost in transit.
    pub loss_rate: f64,
    /// Chance that a served chunk is corrupted before verification.
    pub corruption_rate: f64,
    pub max_rounds: u32,
    pub round_interval: Duration,
    /// Serve chunks as unverified deliveries instead of integrity verdicts.
    pub trusted_delivery: bool,
    /// Most chunks a peer keeps requested at once.
    pub request_window: usize,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            seed: 1,
            loss_rate: 0.0,
            corruption_rate: 0.0,
            max_rounds: 1_000,
            round_interval: Duration::from_millis(10),
            trusted_delivery: false,
            request_window: 4,
        }
    }
}

impl SimulationOptions {
    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("loss_rate", self.loss_rate),
            ("corruption_rate", self.corruption_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(SwarmError::ConfigError(format!(
                    "{} must be within 0..=1, got {}",
                    name, rate
                )));
            }
        }
        if self.round_interval.is_zero() {
            return Err(SwarmError::ConfigError(
                "round interval must be positive".to_string(),
            ));
        }
        if self.request_window == 0 {
            return Err(SwarmError::ConfigError(
                "request window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerSummary {
    pub peer: PeerId,
    pub address: PeerAddress,
    pub owned_chunks: usize,
    pub complete: bool,
    pub evicted: bool,
    pub stats: TransferStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub rounds: u32,
    /// Every surviving peer with a surviving source finished downloading.
    pub finished: bool,
    pub chunk_count: usize,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
    pub peers: Vec<PeerSummary>,
    pub evictions: Vec<Eviction>,
    pub metrics: SwarmMetrics,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.finished { "finished" } else { "stopped" };
        writeln!(f, "Simulation {} after {} rounds", outcome, self.rounds)?;
        writeln!(
            f,
            "Messages: {} delivered, {} dropped",
            self.messages_delivered, self.messages_dropped
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "{:>4}  {:>7}  {:>10}  {:>10}  {:>8}  {:>7}  status",
            "peer", "chunks", "uploaded", "downloaded", "failures", "ratio"
        )?;
        for peer in &self.peers {
            let status = if peer.evicted {
                "evicted"
            } else if peer.complete {
                "complete"
            } else {
                "incomplete"
            };
            writeln!(
                f,
                "{:>4}  {:>3}/{:<3}  {:>10}  {:>10}  {:>8}  {:>7.3}  {}",
                peer.peer,
                peer.owned_chunks,
                self.chunk_count,
                peer.stats.uploaded_bytes,
                peer.stats.downloaded_bytes,
                peer.stats.integrity_failures,
                peer.stats.ratio,
                status
            )?;
        }
        for eviction in &self.evictions {
            writeln!(f, "Peer {} evicted: {}", eviction.peer, eviction.reason)?;
        }
        writeln!(f)?;
        write!(f, "{}", self.metrics)
    }
}

/// Drives a [`Swarm`] over an in-process network.
///
/// The swarm only understands verdicts and deliveries, so this loop answers
/// chunk requests on behalf of the parent they were sent to.
pub struct Simulation {
    swarm: Swarm,
    options: SimulationOptions,
    source: ChunkSource,
    manifest: ChunkManifest,
    transport: ChannelTransport,
    inbox: UnboundedReceiver<Envelope>,
    deregistrations: UnboundedReceiver<PeerAddress>,
    registry: HashMap<SocketAddr, PeerId>,
    evicted: BTreeSet<PeerId>,
    rng: StdRng,
    delivered: u64,
    dropped: u64,
}

impl Simulation {
    pub fn new(config: Config, source: ChunkSource, options: SimulationOptions) -> Result<Self> {
        options.validate()?;
        if source.len() != config.chunk_count {
            return Err(SwarmError::ConfigError(format!(
                "source has {} chunks but chunk_count is {}",
                source.len(),
                config.chunk_count
            )));
        }
        if source.chunks().any(|chunk| chunk.len() > config.payload_size) {
            return Err(SwarmError::ConfigError(format!(
                "source chunks must fit a {} byte payload",
                config.payload_size
            )));
        }

        let (transport, inbox) = ChannelTransport::new();
        let (directory, deregistrations) = ChannelDirectory::new();
        let mut swarm = Swarm::new(config, Arc::new(transport.clone()), Arc::new(directory))?;

        let addresses = SequentialAddresses::default();
        swarm.bootstrap(&addresses);
        let registry = (0..=swarm.store().peer_count())
            .flat_map(|peer| {
                let address = addresses.address_for(peer);
                [
                    (address.endpoint(Channel::Signal), peer),
                    (address.endpoint(Channel::Bulk), peer),
                ]
            })
            .collect();

        Ok(Self {
            manifest: ChunkManifest::from_source(&source),
            rng: StdRng::seed_from_u64(options.seed),
            swarm,
            options,
            source,
            transport,
            inbox,
            deregistrations,
            registry,
            evicted: BTreeSet::new(),
            delivered: 0,
            dropped: 0,
        })
    }

    /// Run until every reachable peer is complete or the round limit is hit.
    pub async fn run(mut self) -> Result<SimulationReport> {
        self.swarm.seed(SEED_PEER)?;
        self.request_missing();

        let mut ticker = time::interval(self.options.round_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rounds = 0;

        loop {
            tokio::select! {
                Some(envelope) = self.inbox.recv() => self.deliver(envelope),
                _ = ticker.tick() => {
                    self.drain_deregistrations();
                    if self.finished() {
                        info!("All reachable peers complete after {} rounds", rounds);
                        break;
                    }
                    if rounds >= self.options.max_rounds {
                        warn!("Stopping after {} rounds with peers incomplete", rounds);
                        break;
                    }
                    rounds += 1;
                    let reissued = self.swarm.expire_stale_requests();
                    if reissued > 0 {
                        debug!("Round {}: re-issued {} stale requests", rounds, reissued);
                    }
                    self.request_missing();
                }
            }
        }

        Ok(self.report(rounds))
    }

    fn deliver(&mut self, envelope: Envelope) {
        self.drain_deregistrations();

        let Some(&peer) = self.registry.get(&envelope.to) else {
            debug!("No peer at {}, dropping frame from {}", envelope.to, envelope.from);
            self.dropped += 1;
            return;
        };
        if self.rng.random_bool(self.options.loss_rate) {
            debug!("Frame from {} to peer {} lost", envelope.from, peer);
            self.dropped += 1;
            return;
        }
        self.delivered += 1;

        match self.swarm.dispatch(peer, &envelope.frame) {
            Ok(DispatchOutcome::Unsupported {
                kind: SenderType::ChunkRequest,
                chunk,
            }) => self.serve(peer, envelope.from, chunk),
            Ok(_) => {}
            Err(e) => debug!("Peer {} could not handle frame: {}", peer, e),
        }
    }

    /// Answer `child`'s request for `chunk` as `parent`.
    fn serve(&mut self, parent: PeerId, child: PeerId, chunk: ChunkId) {
        if !self.is_live(child) {
            return;
        }
        let owned = self
            .swarm
            .store()
            .get(parent)
            .is_some_and(|record| record.owns(chunk));
        let Some(data) = self.source.chunk(chunk).filter(|_| owned) else {
            debug!("Peer {} cannot serve chunk {} yet", parent, chunk);
            return;
        };

        let mut payload = data.to_vec();
        let bytes = payload.len() as u64;
        if let Err(e) = self
            .swarm
            .record_transfer(parent, bytes, 0, false)
            .and_then(|_| self.swarm.record_transfer(child, 0, bytes, false))
        {
            warn!("Accounting for chunk {} failed: {}", chunk, e);
            return;
        }

        if !payload.is_empty() && self.rng.random_bool(self.options.corruption_rate) {
            let index = self.rng.random_range(0..payload.len());
            payload[index] ^= 0xff;
            debug!("Chunk {} corrupted on its way to peer {}", chunk, child);
        }

        let message = if self.options.trusted_delivery {
            Message::DataDelivery { chunk, payload }
        } else {
            Message::IntegrityResult {
                chunk,
                verdict: self.manifest.verify(chunk, &payload),
            }
        };

        let Some(record) = self.swarm.store().get(child) else {
            return;
        };
        let endpoint = record.address.endpoint(message.channel());
        let sent = self
            .swarm
            .codec()
            .encode(&message)
            .and_then(|frame| self.transport.send(parent, endpoint, frame));
        if let Err(e) = sent {
            warn!("Peer {} could not answer peer {}: {}", parent, child, e);
        }
    }

    /// Keep up to the request window of chunks in flight for every peer
    /// whose parent already holds them.
    fn request_missing(&mut self) {
        for peer in 1..=self.swarm.store().peer_count() {
            if !self.is_live(peer) || !self.has_live_source(peer) {
                continue;
            }
            let Some(parent) = parent_of(peer) else {
                continue;
            };

            let wanted: Vec<ChunkId> = {
                let store = self.swarm.store();
                let (Some(record), Some(parent_record)) = (store.get(peer), store.get(parent))
                else {
                    continue;
                };
                record
                    .missing_chunks()
                    .filter(|chunk| parent_record.owns(*chunk))
                    .collect()
            };

            let mut in_flight = wanted
                .iter()
                .filter(|chunk| self.swarm.chunk_state(peer, **chunk) == ChunkState::Requested)
                .count();
            for chunk in wanted {
                if in_flight >= self.options.request_window {
                    break;
                }
                if self.swarm.chunk_state(peer, chunk) != ChunkState::Missing {
                    continue;
                }
                match self.swarm.ensure_chunk(peer, chunk) {
                    Ok(_) => in_flight += 1,
                    Err(e) => debug!("Peer {} could not request chunk {}: {}", peer, chunk, e),
                }
            }
        }
    }

    fn drain_deregistrations(&mut self) {
        while let Ok(address) = self.deregistrations.try_recv() {
            self.registry.remove(&address.endpoint(Channel::Bulk));
            if let Some(peer) = self.registry.remove(&address.endpoint(Channel::Signal)) {
                info!("Peer {} left the swarm", peer);
                self.evicted.insert(peer);
            }
        }
    }

    fn is_live(&self, peer: PeerId) -> bool {
        !self.evicted.contains(&peer)
            && self
                .swarm
                .store()
                .get(peer)
                .is_some_and(|record| !record.address.is_placeholder())
    }

    /// Whether every ancestor of `peer` is still in the swarm.
    fn has_live_source(&self, peer: PeerId) -> bool {
        let mut current = peer;
        while let Some(parent) = parent_of(current) {
            if !self.is_live(parent) {
                return false;
            }
            current = parent;
        }
        true
    }

    fn finished(&self) -> bool {
        self.swarm.store().peers().all(|(peer, record)| {
            !self.is_live(peer) || !self.has_live_source(peer) || record.is_complete()
        })
    }

    fn report(&self, rounds: u32) -> SimulationReport {
        let peers = self
            .swarm
            .store()
            .peers()
            .map(|(peer, record)| PeerSummary {
                peer,
                address: record.address,
                owned_chunks: record.owned_count(),
                complete: record.is_complete(),
                evicted: !self.is_live(peer),
                stats: record.stats(),
            })
            .collect();

        SimulationReport {
            rounds,
            finished: self.finished(),
            chunk_count: self.swarm.store().chunk_count(),
            messages_delivered: self.delivered,
            messages_dropped: self.dropped,
            peers,
            evictions: self.swarm.evictions().to_vec(),
            metrics: self.swarm.metrics().clone(),
        }
    }
}
