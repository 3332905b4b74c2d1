//! File-backed [`IndexStore`] implementation
//!
//! Persists the directory as a single version-tagged bincode snapshot,
//! replaced atomically through a temp file, and removes per-entry payload
//! files when entries are purged. A snapshot with an unknown magic or
//! version fails to load and the directory starts empty.

use async_trait::async_trait;
use larder_common::{EntryHash, Error, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::store::{EntrySet, IndexStore};

const SNAPSHOT_MAGIC: u32 = 0x4C41_5244;
const SNAPSHOT_VERSION: u32 = 1;

const SNAPSHOT_FILE: &str = "index.snapshot";

#[derive(Serialize, Deserialize)]
struct Snapshot {
    magic: u32,
    version: u32,
    cache_size: u64,
    entries: EntrySet,
}

/// Keeps the directory snapshot and entry payload files under one
/// directory on disk.
pub struct FileIndexStore {
    dir: PathBuf,
    snapshot_path: PathBuf,
}

impl FileIndexStore {
    /// Create a store rooted at `dir`. The directory is created on the
    /// first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let snapshot_path = dir.join(SNAPSHOT_FILE);
        Self { dir, snapshot_path }
    }

    fn payload_path(&self, hash: EntryHash) -> PathBuf {
        self.dir.join(format!("{hash}.entry"))
    }

    fn decode(bytes: &[u8]) -> Result<EntrySet> {
        let snapshot: Snapshot =
            bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))?;
        if snapshot.magic != SNAPSHOT_MAGIC {
            return Err(Error::Deserialization("bad snapshot magic".into()));
        }
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::Deserialization(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot.entries)
    }
}

#[async_trait]
impl IndexStore for FileIndexStore {
    async fn load(&self, _since: SystemTime) -> Result<EntrySet> {
        let bytes = match tokio::fs::read(&self.snapshot_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no snapshot at {:?}, starting empty", self.snapshot_path);
                return Ok(EntrySet::new());
            }
            Err(e) => return Err(e.into()),
        };
        Self::decode(&bytes)
    }

    async fn write_index(
        &self,
        entries: EntrySet,
        cache_size: u64,
        started: Instant,
        _background: bool,
    ) {
        let snapshot = Snapshot {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            cache_size,
            entries,
        };
        let bytes = match bincode::serialize(&snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to encode snapshot: {e}");
                return;
            }
        };

        // Write-then-rename so a crash mid-write leaves the old snapshot
        // intact.
        let tmp = self.snapshot_path.with_extension("tmp");
        let result: Result<()> = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, &self.snapshot_path).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => debug!(
                "wrote snapshot ({} bytes) in {:?}",
                bytes.len(),
                started.elapsed()
            ),
            Err(e) => warn!("failed to write snapshot: {e}"),
        }
    }

    async fn purge_entries(&self, hashes: Vec<EntryHash>) -> Result<()> {
        for hash in hashes {
            match tokio::fs::remove_file(self.payload_path(hash)).await {
                Ok(()) => {}
                // Already gone, nothing to do.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::EntryMetadata;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::tempdir;

    fn sample_entries() -> EntrySet {
        let mut entries = EntrySet::new();
        entries.insert(
            EntryHash::from_raw(1),
            EntryMetadata::new(UNIX_EPOCH + Duration::from_secs(1000), 10),
        );
        entries.insert(
            EntryHash::from_raw(2),
            EntryMetadata::new(UNIX_EPOCH + Duration::from_secs(2000), 100),
        );
        entries
    }

    #[tokio::test]
    async fn test_write_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileIndexStore::new(dir.path());

        let entries = sample_entries();
        store
            .write_index(entries.clone(), 110, Instant::now(), false)
            .await;

        let loaded = store.load(SystemTime::UNIX_EPOCH).await.unwrap();
        assert_eq!(loaded, entries);
    }

    #[tokio::test]
    async fn test_load_missing_snapshot_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileIndexStore::new(dir.path());

        let loaded = store.load(SystemTime::UNIX_EPOCH).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_load_corrupt_snapshot_fails() {
        let dir = tempdir().unwrap();
        let store = FileIndexStore::new(dir.path());

        tokio::fs::write(dir.path().join(SNAPSHOT_FILE), b"not a snapshot")
            .await
            .unwrap();

        assert!(store.load(SystemTime::UNIX_EPOCH).await.is_err());
    }

    #[tokio::test]
    async fn test_load_unknown_version_fails() {
        let dir = tempdir().unwrap();
        let store = FileIndexStore::new(dir.path());

        let snapshot = Snapshot {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION + 1,
            cache_size: 0,
            entries: EntrySet::new(),
        };
        tokio::fs::write(
            dir.path().join(SNAPSHOT_FILE),
            bincode::serialize(&snapshot).unwrap(),
        )
        .await
        .unwrap();

        assert!(store.load(SystemTime::UNIX_EPOCH).await.is_err());
    }

    #[tokio::test]
    async fn test_rewrite_replaces_snapshot() {
        let dir = tempdir().unwrap();
        let store = FileIndexStore::new(dir.path());

        store
            .write_index(sample_entries(), 110, Instant::now(), false)
            .await;
        store
            .write_index(EntrySet::new(), 0, Instant::now(), false)
            .await;

        let loaded = store.load(SystemTime::UNIX_EPOCH).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_purge_removes_payload_files() {
        let dir = tempdir().unwrap();
        let store = FileIndexStore::new(dir.path());

        let present = EntryHash::from_raw(0xabc);
        tokio::fs::write(store.payload_path(present), b"payload")
            .await
            .unwrap();

        // One payload on disk, one already gone; both purge cleanly.
        store
            .purge_entries(vec![present, EntryHash::from_raw(0xdef)])
            .await
            .unwrap();

        assert!(!store.payload_path(present).exists());
    }
}
