//! Per-entry bookkeeping: last-used time and byte size

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Recency and size record for one cache entry.
///
/// Kept at full clock resolution in memory. The serialized form stores the
/// last-used time as whole seconds since the Unix epoch, so a round trip
/// through the backing store is lossless at one-second resolution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(with = "unix_seconds")]
    last_used: SystemTime,
    entry_size: u64,
}

impl EntryMetadata {
    /// Create metadata for an entry of the given size, last used at `last_used`
    #[must_use]
    pub fn new(last_used: SystemTime, entry_size: u64) -> Self {
        Self {
            last_used,
            entry_size,
        }
    }

    /// When the entry was last used
    #[must_use]
    pub fn last_used(&self) -> SystemTime {
        self.last_used
    }

    /// Refresh the last-used time
    pub fn set_last_used(&mut self, last_used: SystemTime) {
        self.last_used = last_used;
    }

    /// Size of the entry's payload in bytes
    #[must_use]
    pub fn entry_size(&self) -> u64 {
        self.entry_size
    }

    /// Set the payload size
    pub fn set_entry_size(&mut self, entry_size: u64) {
        self.entry_size = entry_size;
    }
}

impl Default for EntryMetadata {
    fn default() -> Self {
        Self {
            last_used: SystemTime::UNIX_EPOCH,
            entry_size: 0,
        }
    }
}

mod unix_seconds {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        // Times before the epoch collapse to it; the directory never
        // produces them.
        let secs = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        secs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}
