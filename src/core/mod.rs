pub mod config;
pub mod node;
pub mod peer;
pub mod protocol;

pub use config::{Config, MAX_PEER_COUNT, RequestCounting, RetryPolicy};
pub use node::Swarm;
pub use peer::{ChunkId, PeerAddress, PeerId, PeerRecord, PeerStore, ROOT_PEER, parent_of};
pub use protocol::{Channel, Message, MessageCodec, SenderType, Verdict};
