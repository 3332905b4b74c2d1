//! Backing store interface for the entry index
//!
//! The index owns only in-memory state. Everything durable, the snapshot
//! of the directory itself and the entry payloads, lives behind this
//! trait, which the owning cache supplies at construction.

use async_trait::async_trait;
use larder_common::{EntryHash, Result};
use std::collections::HashMap;
use std::time::SystemTime;
use tokio::time::Instant;

use crate::metadata::EntryMetadata;

/// Directory contents as loaded from or written to the backing store
pub type EntrySet = HashMap<EntryHash, EntryMetadata>;

/// Asynchronous persistence collaborator for [`EntryIndex`].
///
/// Implementations run their own I/O; the index awaits completions from
/// spawned tasks, so nothing here may call back into the index.
///
/// [`EntryIndex`]: crate::index::EntryIndex
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Load the directory snapshot from disk.
    ///
    /// `since` is the owning cache's last-modified time, for
    /// implementations that judge snapshot staleness. An `Err` degrades to
    /// an empty directory; it never fails initialization.
    async fn load(&self, since: SystemTime) -> Result<EntrySet>;

    /// Persist a directory snapshot.
    ///
    /// Fire-and-forget: failures are the store's to log or retry, the
    /// index never observes them. `started` is when the flush fired;
    /// `background` hints that the owning application is backgrounded.
    async fn write_index(
        &self,
        entries: EntrySet,
        cache_size: u64,
        started: Instant,
        background: bool,
    );

    /// Delete the on-disk representation of the given entries.
    ///
    /// The returned status is informational only; the index logs failures
    /// and never mutates its state based on the outcome.
    async fn purge_entries(&self, hashes: Vec<EntryHash>) -> Result<()>;
}
