use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::protocol::{DEFAULT_PAYLOAD_SIZE, VALID_MARKER};
use crate::network::transport::DEFAULT_DATA_PORT_BASE;
use crate::utils::{Result, SwarmError};

/// Largest swarm whose default data ports stay below `u16::MAX`.
pub const MAX_PEER_COUNT: usize = (u16::MAX - DEFAULT_DATA_PORT_BASE) as usize;

/// How `pending_requests` is maintained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RequestCounting {
    /// Every issued request is counted and nothing is ever subtracted.
    #[default]
    Cumulative,
    /// A request stops counting once an integrity result or delivery answers it.
    Outstanding,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Re-requests allowed per request cycle. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Some(10),
        }
    }
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self { max_retries: None }
    }

    pub fn allows(&self, retries: u32) -> bool {
        self.max_retries.is_none_or(|max| retries <= max)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub peer_count: usize,
    pub chunk_count: usize,
    pub payload_size: usize,
    pub ratio_threshold: f64,
    pub pending_request_threshold: u32,
    /// Peers are judged by ratio only after downloading more than this.
    pub ratio_grace_bytes: u64,
    pub request_counting: RequestCounting,
    pub retry: RetryPolicy,
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_count: 8,
            chunk_count: 100,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            ratio_threshold: 0.1,
            pending_request_threshold: 5,
            ratio_grace_bytes: 0,
            request_counting: RequestCounting::Cumulative,
            retry: RetryPolicy::default(),
            request_timeout_ms: 500,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SwarmError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.peer_count == 0 || self.peer_count > MAX_PEER_COUNT {
            return Err(SwarmError::ConfigError(format!(
                "peer_count must be in 1..={}, got {}",
                MAX_PEER_COUNT, self.peer_count
            )));
        }
        if self.chunk_count == 0 || self.chunk_count > u32::MAX as usize {
            return Err(SwarmError::ConfigError(format!(
                "chunk_count must be in 1..={}, got {}",
                u32::MAX,
                self.chunk_count
            )));
        }
        if self.payload_size < VALID_MARKER.len() {
            return Err(SwarmError::ConfigError(format!(
                "payload_size must hold at least {} bytes",
                VALID_MARKER.len()
            )));
        }
        if !self.ratio_threshold.is_finite() || self.ratio_threshold < 0.0 {
            return Err(SwarmError::ConfigError(format!(
                "ratio_threshold must be a non-negative number, got {}",
                self.ratio_threshold
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
