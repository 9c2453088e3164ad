pub mod error;
pub mod logger;
pub mod metrics;

pub use error::{Result, SwarmError};
pub use logger::{level_for_verbosity, setup_logging};
pub use metrics::SwarmMetrics;
