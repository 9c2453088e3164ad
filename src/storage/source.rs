use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

use crate::core::peer::ChunkId;
use crate::utils::{Result, SwarmError};

/// The file being shared, split into chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSource {
    chunks: Vec<Vec<u8>>,
}

impl ChunkSource {
    pub fn from_chunks(chunks: Vec<Vec<u8>>) -> Self {
        Self { chunks }
    }

    /// Deterministic pseudo-random content.
    pub fn synthetic(chunk_count: usize, chunk_size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let chunks = (0..chunk_count)
            .map(|_| {
                let mut chunk = vec![0u8; chunk_size];
                rng.fill(&mut chunk[..]);
                chunk
            })
            .collect();
        Self { chunks }
    }

    /// Read `path` and split it into `chunk_size` pieces. The last one may be short.
    pub async fn from_file(path: &Path, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(SwarmError::ConfigError(
                "chunk size must be positive".to_string(),
            ));
        }

        let content = tokio::fs::read(path).await.map_err(|e| {
            SwarmError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        if content.is_empty() {
            return Err(SwarmError::ConfigError(format!(
                "{} is empty",
                path.display()
            )));
        }

        let chunks: Vec<Vec<u8>> = content.chunks(chunk_size).map(<[u8]>::to_vec).collect();
        info!(
            "Loaded {} ({} bytes) as {} chunks",
            path.display(),
            content.len(),
            chunks.len()
        );
        Ok(Self { chunks })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk(&self, chunk: ChunkId) -> Option<&[u8]> {
        self.chunks.get(chunk as usize).map(Vec::as_slice)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks.iter().map(Vec::as_slice)
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }
}
