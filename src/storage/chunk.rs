use sha2::{Digest, Sha256};

use crate::core::peer::ChunkId;
use crate::core::protocol::Verdict;
use crate::storage::ChunkSource;

pub type ChunkDigest = [u8; 32];

pub fn hash_chunk(data: &[u8]) -> ChunkDigest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Expected SHA-256 digest of every chunk of the shared file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkManifest {
    digests: Vec<ChunkDigest>,
}

impl ChunkManifest {
    pub fn from_source(source: &ChunkSource) -> Self {
        Self {
            digests: source.chunks().map(hash_chunk).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    pub fn digest(&self, chunk: ChunkId) -> Option<&ChunkDigest> {
        self.digests.get(chunk as usize)
    }

    pub fn hex_digest(&self, chunk: ChunkId) -> Option<String> {
        self.digest(chunk).map(hex::encode)
    }

    /// Chunks outside the manifest never verify.
    pub fn verify(&self, chunk: ChunkId, data: &[u8]) -> Verdict {
        let matches = self
            .digest(chunk)
            .is_some_and(|expected| *expected == hash_chunk(data));
        Verdict::from(matches)
    }
}
