use thiserror::Error;

pub type Result<T> = std::result::Result<T, SwarmError>;

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Peer {peer} has no valid parent to request chunk {chunk}")]
    NoValidParent { peer: usize, chunk: u32 },

    #[error("Unknown sender type: {0}")]
    UnknownMessageTag(u8),

    #[error("Malformed message: expected {expected} bytes, got {actual}")]
    MalformedMessage { expected: usize, actual: usize },

    #[error("Message too large: {0} payload bytes")]
    MessageTooLarge(usize),

    #[error("Chunk {chunk} out of range (chunk count {chunk_count})")]
    ChunkOutOfRange { chunk: u32, chunk_count: usize },

    #[error("Unknown peer: {0}")]
    UnknownPeer(usize),

    #[error("Retry limit of {limit} reached for chunk {chunk} on peer {peer}")]
    RetryLimitExceeded { peer: usize, chunk: u32, limit: u32 },

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<std::io::Error> for SwarmError {
    fn from(err: std::io::Error) -> Self {
        SwarmError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(err: serde_json::Error) -> Self {
        SwarmError::SerializationError(err.to_string())
    }
}
