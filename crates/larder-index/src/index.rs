//! The in-memory cache directory
//!
//! Tracks which entries exist together with their size and recency,
//! answers existence and touch queries synchronously while the initial
//! snapshot load is still in flight, enforces the size budget with LRU
//! eviction, and schedules debounced write-back of the directory.

use larder_common::{EntryHash, IndexConfig};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::metadata::EntryMetadata;
use crate::scheduler::FlushScheduler;
use crate::store::{EntrySet, IndexStore};

/// Counters for directory activity
#[derive(Debug, Default)]
pub struct IndexStats {
    /// Touch queries answered "present" after initialization
    pub hits: AtomicU64,
    /// Touch queries answered "absent" after initialization
    pub misses: AtomicU64,
    /// Entries removed by eviction
    pub evictions: AtomicU64,
    /// Bytes released by eviction
    pub evicted_bytes: AtomicU64,
    /// Directory snapshots handed to the store
    pub flushes: AtomicU64,
}

impl IndexStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

/// Entries removed by one eviction pass, destined for the store's purge
struct EvictionBatch {
    hashes: Vec<EntryHash>,
    bytes: u64,
}

struct IndexState {
    entries: EntrySet,
    /// Keys removed before the load resolved; suppresses their
    /// resurrection from the loaded snapshot
    removed_while_loading: HashSet<EntryHash>,
    /// Invariant: equals the sum of all entry sizes
    cache_size: u64,
    max_size: u64,
    low_water_factor: f64,
    initialized: bool,
}

impl IndexState {
    fn subtract_size(&mut self, size: u64) {
        debug_assert!(self.cache_size >= size, "cache size accounting underflow");
        self.cache_size = self.cache_size.saturating_sub(size);
    }

    /// Remove an entry and release its accounted size
    fn erase_entry(&mut self, hash: EntryHash) -> bool {
        if let Some(metadata) = self.entries.remove(&hash) {
            self.subtract_size(metadata.entry_size());
            true
        } else {
            false
        }
    }

    /// Fold the loaded snapshot into the local map. Local state wins: a
    /// key the caller already touched keeps its local metadata, and a key
    /// removed while loading stays dead. Returns how many loaded entries
    /// were taken.
    fn merge_loaded(&mut self, loaded: EntrySet) -> usize {
        let mut taken = 0;
        for (hash, metadata) in loaded {
            if self.entries.contains_key(&hash) || self.removed_while_loading.contains(&hash) {
                continue;
            }
            self.cache_size += metadata.entry_size();
            self.entries.insert(hash, metadata);
            taken += 1;
        }
        self.removed_while_loading.clear();
        self.initialized = true;
        taken
    }

    /// Trim oldest-first down to the low-water mark when over budget.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn evict_if_needed(&mut self) -> Option<EvictionBatch> {
        if self.max_size == 0 || self.cache_size <= self.max_size {
            return None;
        }
        let target = (self.max_size as f64 * self.low_water_factor) as u64;

        // Oldest first; ties resolved by hash so the order is deterministic.
        let mut by_age: Vec<(SystemTime, EntryHash)> = self
            .entries
            .iter()
            .map(|(hash, metadata)| (metadata.last_used(), *hash))
            .collect();
        by_age.sort_unstable();

        let before = self.cache_size;
        let mut hashes = Vec::new();
        for (_, hash) in by_age {
            if self.cache_size <= target {
                break;
            }
            self.erase_entry(hash);
            hashes.push(hash);
        }
        Some(EvictionBatch {
            hashes,
            bytes: before - self.cache_size,
        })
    }
}

/// The directory of a disk-backed cache.
///
/// All operations are synchronous and in-memory; the only asynchronous
/// events are the initial snapshot load and the debounced write-back, both
/// injected through the [`IndexStore`] supplied at construction. Mutations
/// issued while the load is still in flight take effect immediately and
/// are reconciled against the loaded snapshot when it arrives: the last
/// local operation per key wins, untouched keys take the loaded value.
pub struct EntryIndex {
    state: Arc<Mutex<IndexState>>,
    store: Arc<dyn IndexStore>,
    scheduler: FlushScheduler,
    stats: Arc<IndexStats>,
    background: Arc<AtomicBool>,
    load_started: AtomicBool,
    ready_tx: watch::Sender<bool>,
}

impl EntryIndex {
    /// Create a directory over the given backing store.
    ///
    /// Must be called from within a tokio runtime; the write-back waiter
    /// is spawned here.
    pub fn new(config: IndexConfig, store: Arc<dyn IndexStore>) -> Self {
        let state = Arc::new(Mutex::new(IndexState {
            entries: EntrySet::new(),
            removed_while_loading: HashSet::new(),
            cache_size: 0,
            max_size: config.max_size,
            low_water_factor: config.low_water_factor,
            initialized: false,
        }));
        let stats = Arc::new(IndexStats::default());
        let background = Arc::new(AtomicBool::new(false));
        let (ready_tx, _) = watch::channel(false);

        let scheduler = {
            let state = Arc::clone(&state);
            let store = Arc::clone(&store);
            let stats = Arc::clone(&stats);
            let background = Arc::clone(&background);
            FlushScheduler::spawn(config.flush_delay, move || {
                let started = Instant::now();
                // Snapshot the directory as it stands now, not as it stood
                // when the deadline was armed.
                let (entries, cache_size) = {
                    let state = state.lock();
                    (state.entries.clone(), state.cache_size)
                };
                stats.flushes.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "writing directory snapshot: {} entries, {} bytes",
                    entries.len(),
                    cache_size
                );
                let store = Arc::clone(&store);
                let on_background = background.load(Ordering::Relaxed);
                tokio::spawn(async move {
                    store
                        .write_index(entries, cache_size, started, on_background)
                        .await;
                });
            })
        };

        Self {
            state,
            store,
            scheduler,
            stats,
            background,
            load_started: AtomicBool::new(false),
            ready_tx,
        }
    }

    /// Begin the asynchronous snapshot load. Returns immediately; queries
    /// and mutations are legal at any time before or after. Call once.
    ///
    /// `cache_last_modified` is forwarded to [`IndexStore::load`].
    pub fn initialize(&self, cache_last_modified: SystemTime) {
        let already = self.load_started.swap(true, Ordering::Relaxed);
        debug_assert!(!already, "initialize must be called once");

        let state = Arc::clone(&self.state);
        let store = Arc::clone(&self.store);
        let stats = Arc::clone(&self.stats);
        let ready = self.ready_tx.clone();
        tokio::spawn(async move {
            let loaded = match store.load(cache_last_modified).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("directory load failed, starting empty: {e}");
                    EntrySet::new()
                }
            };
            let evicted = {
                let mut state = state.lock();
                let taken = state.merge_loaded(loaded);
                debug!(
                    "merged {taken} loaded entries, directory now {} entries / {} bytes",
                    state.entries.len(),
                    state.cache_size
                );
                state.evict_if_needed()
            };
            if let Some(batch) = evicted {
                purge_evicted(&store, &stats, batch);
            }
            let _ = ready.send(true);
            info!("cache directory initialized");
        });
    }

    /// Resolves once initialization has completed, including after a
    /// failed load. May be awaited any number of times.
    pub async fn ready(&self) {
        let mut rx = self.ready_tx.subscribe();
        // Only fails if the sender is dropped, impossible while &self lives.
        let _ = rx.wait_for(|initialized| *initialized).await;
    }

    /// Whether the snapshot load has resolved
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Record a new entry with zero size, last used now.
    ///
    /// Re-inserting a present key leaves it untouched. An insert cancels a
    /// pending pre-initialization removal of the same key.
    pub fn insert(&self, hash: EntryHash) {
        {
            let mut state = self.state.lock();
            if !state.entries.contains_key(&hash) {
                state
                    .entries
                    .insert(hash, EntryMetadata::new(SystemTime::now(), 0));
            }
            state.removed_while_loading.remove(&hash);
        }
        self.scheduler.arm();
    }

    /// Forget an entry.
    ///
    /// Before initialization the key is also marked removed, whether or
    /// not it was present locally, so the loaded snapshot cannot
    /// resurrect it.
    pub fn remove(&self, hash: EntryHash) {
        {
            let mut state = self.state.lock();
            state.erase_entry(hash);
            if !state.initialized {
                state.removed_while_loading.insert(hash);
            }
        }
        self.scheduler.arm();
    }

    /// Set an entry's payload size, creating the entry if absent, and run
    /// the eviction check.
    pub fn update_entry_size(&self, hash: EntryHash, new_size: u64) {
        let evicted = {
            let mut state = self.state.lock();
            let old_size = match state.entries.get_mut(&hash) {
                Some(metadata) => {
                    let old = metadata.entry_size();
                    metadata.set_entry_size(new_size);
                    old
                }
                None => {
                    state
                        .entries
                        .insert(hash, EntryMetadata::new(SystemTime::now(), new_size));
                    0
                }
            };
            state.cache_size += new_size;
            state.subtract_size(old_size);
            state.evict_if_needed()
        };
        if let Some(batch) = evicted {
            purge_evicted(&self.store, &self.stats, batch);
        }
        self.scheduler.arm();
    }

    /// Refresh an entry's last-used time if it exists.
    ///
    /// Until the load resolves this always returns `true`: the on-disk
    /// state is unknown and a false negative would turn a cache hit into a
    /// miss. No entry is created for an absent key.
    pub fn touch_if_exists(&self, hash: EntryHash) -> bool {
        let (found, initialized) = {
            let mut state = self.state.lock();
            let found = match state.entries.get_mut(&hash) {
                Some(metadata) => {
                    metadata.set_last_used(SystemTime::now());
                    true
                }
                None => false,
            };
            (found, state.initialized)
        };
        if initialized {
            self.count_lookup(found);
        }
        if found {
            self.scheduler.arm();
        }
        found || !initialized
    }

    /// Whether an entry exists.
    ///
    /// Unconditionally `true` until the load resolves, even for keys
    /// never seen or locally removed, for the same reason as
    /// [`touch_if_exists`](Self::touch_if_exists).
    #[must_use]
    pub fn has_entry(&self, hash: EntryHash) -> bool {
        let state = self.state.lock();
        if !state.initialized {
            return true;
        }
        state.entries.contains_key(&hash)
    }

    /// Copy of an entry's metadata, if present locally
    #[must_use]
    pub fn entry_metadata(&self, hash: EntryHash) -> Option<EntryMetadata> {
        self.state.lock().entries.get(&hash).copied()
    }

    /// Number of entries in the directory
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the directory is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of all entry sizes in bytes
    #[must_use]
    pub fn cache_size(&self) -> u64 {
        self.state.lock().cache_size
    }

    /// Configured size budget
    #[must_use]
    pub fn max_size(&self) -> u64 {
        self.state.lock().max_size
    }

    /// Change the size budget. Takes effect at the next eviction check;
    /// shrinking the budget alone evicts nothing.
    pub fn set_max_size(&self, max_size: u64) {
        self.state.lock().max_size = max_size;
    }

    /// All keys currently in the directory, in no particular order
    #[must_use]
    pub fn all_hashes(&self) -> Vec<EntryHash> {
        self.state.lock().entries.keys().copied().collect()
    }

    /// Keys whose last-used time lies in `[start, end)`
    #[must_use]
    pub fn entries_last_used_between(&self, start: SystemTime, end: SystemTime) -> Vec<EntryHash> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter(|(_, metadata)| {
                let t = metadata.last_used();
                start <= t && t < end
            })
            .map(|(hash, _)| *hash)
            .collect()
    }

    /// Hint that the owning application is backgrounded; forwarded with
    /// every directory write.
    pub fn set_background_mode(&self, background: bool) {
        self.background.store(background, Ordering::Relaxed);
    }

    /// Directory activity counters
    #[must_use]
    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    fn count_lookup(&self, found: bool) {
        if found {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Record an eviction batch and hand it to the store. The on-disk purge
/// is asynchronous and its outcome is only ever logged.
fn purge_evicted(store: &Arc<dyn IndexStore>, stats: &IndexStats, batch: EvictionBatch) {
    stats
        .evictions
        .fetch_add(batch.hashes.len() as u64, Ordering::Relaxed);
    stats.evicted_bytes.fetch_add(batch.bytes, Ordering::Relaxed);
    debug!(
        "evicting {} entries ({} bytes)",
        batch.hashes.len(),
        batch.bytes
    );
    let store = Arc::clone(store);
    tokio::spawn(async move {
        let count = batch.hashes.len();
        if let Err(e) = store.purge_entries(batch.hashes).await {
            warn!("failed to purge {count} evicted entries: {e}");
        }
    });
}
