//! Configuration types for Larder

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Policy configuration for the cache index.
///
/// The eviction threshold and write-back delay are policy values, not
/// semantics; deployments tune them per cache type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Cache size budget in bytes (0 = eviction disabled)
    pub max_size: u64,
    /// Quiet period after the last mutation before the directory snapshot
    /// is written back
    pub flush_delay: Duration,
    /// Eviction trims the cache down to this fraction of `max_size`,
    /// keeping the next insert from re-triggering eviction immediately
    pub low_water_factor: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_size: 0,
            flush_delay: Duration::from_secs(20),
            low_water_factor: 0.9,
        }
    }
}

impl IndexConfig {
    /// Create a config with a size budget and default policy values
    #[must_use]
    pub fn with_max_size(max_size: u64) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    /// Byte size eviction trims the cache down to
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn low_water_mark(&self) -> u64 {
        (self.max_size as f64 * self.low_water_factor) as u64
    }
}
