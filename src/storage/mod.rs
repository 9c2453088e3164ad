pub mod chunk;
pub mod source;

pub use chunk::{ChunkDigest, ChunkManifest, hash_chunk};
pub use source::ChunkSource;
