pub mod accounting;
pub mod freerider;
pub mod scheduler;

pub use accounting::TransferStats;
pub use freerider::{Eviction, EvictionReason, FreeriderDetector};
pub use scheduler::{ChunkOutcome, ChunkRequest, ChunkScheduler, ChunkState};
