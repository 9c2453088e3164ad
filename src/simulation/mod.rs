//! An in-process network for exercising the chunk protocol end to end.

pub mod runner;

pub use runner::{PeerSummary, SEED_PEER, Simulation, SimulationOptions, SimulationReport};
