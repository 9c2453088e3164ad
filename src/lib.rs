//! Mini Swarm
//!
//! Chunk distribution over a parent/child peer hierarchy, with per-chunk
//! integrity verdicts, upload/download accounting and freerider eviction.

pub mod core;
pub mod network;
pub mod simulation;
pub mod storage;
pub mod transfer;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export main types
pub use crate::core::{Config, Message, MessageCodec, PeerAddress, PeerStore, Swarm, Verdict};
pub use crate::network::{DispatchOutcome, PeerDirectory, SequentialAddresses, Transport};
pub use crate::simulation::{Simulation, SimulationOptions, SimulationReport};
pub use crate::storage::{ChunkManifest, ChunkSource};
pub use crate::transfer::{ChunkOutcome, ChunkState, Eviction, EvictionReason};
pub use crate::utils::{Result, SwarmError, SwarmMetrics};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
