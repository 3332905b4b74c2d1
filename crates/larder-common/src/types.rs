//! Core type definitions for Larder

use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for one cache entry.
///
/// Derived externally from the entry's logical name; the index treats it
/// as an opaque 64-bit key.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
)]
pub struct EntryHash(u64);

impl EntryHash {
    /// Create from a raw 64-bit value
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw 64-bit value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for EntryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryHash({:016x})", self.0)
    }
}

impl fmt::Display for EntryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
