use serde::Serialize;
use std::fmt;

/// Protocol counters kept by a [`Swarm`](crate::core::Swarm).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwarmMetrics {
    pub requests_sent: u64,
    pub integrity_passes: u64,
    pub integrity_failures: u64,
    pub trusted_deliveries: u64,
    pub evictions: u64,
    pub unknown_tags: u64,
    pub unsupported_messages: u64,
    pub retries_exhausted: u64,
}

impl SwarmMetrics {
    pub fn record_request_sent(&mut self) {
        self.requests_sent += 1;
    }

    pub fn record_integrity_result(&mut self, valid: bool) {
        if valid {
            self.integrity_passes += 1;
        } else {
            self.integrity_failures += 1;
        }
    }

    pub fn record_trusted_delivery(&mut self) {
        self.trusted_deliveries += 1;
    }

    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub fn record_unknown_tag(&mut self) {
        self.unknown_tags += 1;
    }

    pub fn record_unsupported(&mut self) {
        self.unsupported_messages += 1;
    }

    pub fn record_retries_exhausted(&mut self) {
        self.retries_exhausted += 1;
    }
}

impl fmt::Display for SwarmMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Swarm Statistics ===")?;
        writeln!(f, "Requests sent:        {}", self.requests_sent)?;
        writeln!(
            f,
            "Integrity results:    {} passed, {} failed",
            self.integrity_passes, self.integrity_failures
        )?;
        writeln!(f, "Trusted deliveries:   {}", self.trusted_deliveries)?;
        writeln!(f, "Evictions:            {}", self.evictions)?;
        writeln!(f, "Retries exhausted:    {}", self.retries_exhausted)?;
        write!(
            f,
            "Dropped messages:     {} unknown tag, {} unsupported",
            self.unknown_tags, self.unsupported_messages
        )
    }
}
