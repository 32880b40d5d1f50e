//! Sharded Storage Engine with Live Resharding
//!
//! This module implements the core key-value store. Keys are partitioned
//! across many shards, each guarded by its own [`SpinRwLock`], so writers on
//! different shards never touch the same cache line.
//!
//! ## Design Decisions
//!
//! 1. **Spin-locked shards**: critical sections are one map probe, so spinning
//!    beats parking the thread.
//! 2. **Lazy expiry on read**: `get` reports a stale item as expired but never
//!    deletes it; only the background sweeper mutates the map for expiry.
//! 3. **Pluggable index function**: the shard of a key is computed by an
//!    [`IndexFn`] chosen at construction.
//! 4. **Manual shard counts**: each shard tracks its live key count so resize
//!    can size the new array without walking every map.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Store                                │
//! │   shards: ArcSwap<ShardSet>          resize_lock: Mutex     │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ Spin    │ │ Spin    │ │ Spin    │ │ Spin    │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! │        │ resize_target (only while resizing)                │
//! │        ▼                                                    │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐                        │
//! │  │ Shard 0'│ │ Shard 1'│ │ Shard M'│                        │
//! │  └─────────┘ └─────────┘ └─────────┘                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Resize
//!
//! 1. Allocate the new array, sized from the current key count.
//! 2. Publish it in the old array's `resize_target` slot. From now on every
//!    `set` writes into both arrays.
//! 3. Copy each old shard into the new array under the old shard's shared
//!    lock. A copy never overwrites a key already present: a concurrent
//!    `set` got there first with a fresher item.
//! 4. Swap the active array pointer.
//!
//! A writer reads `resize_target` while holding its shard's exclusive lock,
//! so its write either precedes that shard's migration (and gets copied) or
//! sees the target (and is dual-written). The retired array keeps pointing
//! at its successor, which forwards writes from threads that loaded the old
//! array just before the swap.

use super::config::StoreConfig;
use super::expiry::{ExpiryConfig, ExpirySweeper, Sweep};
use super::index::IndexFn;
use crate::error::{ConfigError, StoreError};
use crate::sync::SpinRwLock;
use arc_swap::{ArcSwap, ArcSwapOption};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A stored value with its absolute expiry time.
#[derive(Debug, Clone)]
struct Item<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Item<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    #[inline]
    fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Map and key count of one shard, guarded together.
struct ShardData<K, V> {
    entries: HashMap<K, Item<V>>,
    /// Number of keys in `entries`, expired ones included
    count: usize,
}

/// A single shard containing a portion of the key-value pairs.
struct Shard<K, V> {
    data: SpinRwLock<ShardData<K, V>>,
}

impl<K, V> Shard<K, V> {
    fn new(capacity: usize, spin_rounds: u32, spin_iterations: u32) -> Self {
        Self {
            data: SpinRwLock::new(
                ShardData {
                    entries: HashMap::with_capacity(capacity),
                    count: 0,
                },
                spin_rounds,
                spin_iterations,
            ),
        }
    }

    fn count(&self) -> usize {
        self.data.read().count
    }
}

/// One generation of shards plus the slot for the array replacing it.
struct ShardSet<K, V> {
    shards: Box<[Shard<K, V>]>,
    resize_target: ArcSwapOption<ShardSet<K, V>>,
}

impl<K, V> ShardSet<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn new(shard_count: usize, capacity: usize, spin_rounds: u32, spin_iterations: u32) -> Self {
        let shards = (0..shard_count)
            .map(|_| Shard::new(capacity, spin_rounds, spin_iterations))
            .collect();

        Self {
            shards,
            resize_target: ArcSwapOption::empty(),
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.shards.len()
    }

    /// Returns the shard owning `key`, or `None` if the array is empty.
    #[inline]
    fn shard_for(&self, index_fn: IndexFn<K>, key: &K) -> Option<&Shard<K, V>> {
        let len = self.shards.len();
        if len == 0 {
            return None;
        }
        // Clamp custom index functions
        self.shards.get(index_fn(len, key) % len)
    }

    fn get(&self, index_fn: IndexFn<K>, key: &K, now: Instant) -> Result<V, StoreError> {
        let shard = self.shard_for(index_fn, key).ok_or(StoreError::Uninitialized)?;
        let data = shard.data.read();

        match data.entries.get(key) {
            None => Err(StoreError::NotFound),
            Some(item) if item.is_expired_at(now) => Err(StoreError::Expired),
            Some(item) => Ok(item.value.clone()),
        }
    }

    fn set(&self, index_fn: IndexFn<K>, key: K, value: V, ttl: Duration) -> Result<(), StoreError> {
        let shard = self.shard_for(index_fn, &key).ok_or(StoreError::Uninitialized)?;
        let mut data = shard.data.write();

        // Must be read under the shard lock, see the module docs.
        let target = self.resize_target.load();
        if let Some(target) = &*target {
            target.set(index_fn, key.clone(), value.clone(), ttl)?;
        }

        let item = Item::new(value, ttl);
        if data.entries.insert(key, item).is_none() {
            data.count += 1;
        }
        Ok(())
    }

    /// Inserts a migrated item unless the key is already present.
    fn insert_if_absent(&self, index_fn: IndexFn<K>, key: &K, item: &Item<V>) -> bool {
        let Some(shard) = self.shard_for(index_fn, key) else {
            return false;
        };
        let mut data = shard.data.write();

        if data.entries.contains_key(key) {
            return false;
        }
        data.entries.insert(key.clone(), item.clone());
        data.count += 1;
        true
    }

    /// Copies every entry into `target`, one shard at a time.
    fn migrate_into(&self, index_fn: IndexFn<K>, target: &ShardSet<K, V>) -> usize {
        let mut migrated = 0;
        for shard in self.shards.iter() {
            let data = shard.data.read();
            for (key, item) in data.entries.iter() {
                if target.insert_if_absent(index_fn, key, item) {
                    migrated += 1;
                }
            }
        }
        migrated
    }

    fn sweep(&self, now: Instant) -> u64 {
        let mut removed = 0u64;
        for shard in self.shards.iter() {
            let mut data = shard.data.write();
            let before = data.entries.len();

            data.entries.retain(|_, item| !item.is_expired_at(now));

            let dropped = before - data.entries.len();
            data.count = data.count.saturating_sub(dropped);
            removed += dropped as u64;
        }
        removed
    }

    fn clear(&self, capacity: usize) {
        for shard in self.shards.iter() {
            let mut data = shard.data.write();
            data.entries = HashMap::with_capacity(capacity);
            data.count = 0;
        }
    }

    fn counts(&self) -> Vec<usize> {
        self.shards.iter().map(Shard::count).collect()
    }
}

/// State shared between the store handle and its sweeper thread.
struct Shared<K, V> {
    /// The active shard array
    shards: ArcSwap<ShardSet<K, V>>,

    /// Top-level lock, taken by resize and clear only
    resize_lock: Mutex<()>,

    config: StoreConfig<K>,

    /// Statistics: total GET operations
    get_count: AtomicU64,

    /// Statistics: total SET operations
    set_count: AtomicU64,

    /// Statistics: number of expired keys swept
    expired_count: AtomicU64,

    /// Statistics: completed resizes
    resize_count: AtomicU64,
}

impl<K, V> Sweep for Shared<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn sweep_expired(&self) -> u64 {
        let now = Instant::now();
        let removed = self.shards.load_full().sweep(now);

        if removed > 0 {
            self.expired_count.fetch_add(removed, Ordering::Relaxed);
        }
        removed
    }
}

/// Statistics about the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Keys physically present, expired-but-unswept included
    pub keys: usize,
    /// Current number of shards
    pub shards: usize,
    /// Total GET operations
    pub get_ops: u64,
    /// Total SET operations
    pub set_ops: u64,
    /// Keys removed by the sweeper
    pub expired: u64,
    /// Completed resizes
    pub resizes: u64,
}

/// A sharded in-memory key-value store with TTL expiry and live resharding.
///
/// # Thread Safety
///
/// Wrap the store in an `Arc` to share it between threads. All operations
/// take `&self` and are synchronous.
///
/// # Example
///
/// ```
/// use shardstore::storage::{Store, StoreConfig};
/// use shardstore::StoreError;
///
/// let store: Store<u64, String> = Store::new(StoreConfig::default()).unwrap();
///
/// store.set(7, "seven".to_string()).unwrap();
/// assert_eq!(store.get(&7), Ok("seven".to_string()));
/// assert_eq!(store.get(&8), Err(StoreError::NotFound));
///
/// store.resize(13).unwrap();
/// assert_eq!(store.get(&7), Ok("seven".to_string()));
///
/// store.stop();
/// ```
pub struct Store<K, V> {
    shared: Arc<Shared<K, V>>,
    sweeper: ExpirySweeper,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a store and starts its background expiry sweeper.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or the
    /// sweeper cannot be started.
    pub fn new(config: StoreConfig<K>) -> Result<Self, ConfigError> {
        config.validate()?;

        let shards = ShardSet::new(
            config.shard_count,
            config.starting_shard_capacity,
            config.spin_rounds,
            config.spin_iterations,
        );
        let expiry = ExpiryConfig {
            interval: config.sweep_interval,
            name: "shard-sweeper".to_string(),
        };

        info!(
            shards = config.shard_count,
            ttl_ms = config.ttl.as_millis() as u64,
            sweep_interval_ms = config.sweep_interval.as_millis() as u64,
            "Store initialized"
        );

        let shared = Arc::new(Shared {
            shards: ArcSwap::from_pointee(shards),
            resize_lock: Mutex::new(()),
            config,
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
            resize_count: AtomicU64::new(0),
        });

        let sweeper = ExpirySweeper::start(Arc::clone(&shared), expiry)?;

        Ok(Self { shared, sweeper })
    }

    /// Gets the value for a key.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the key is absent
    /// - [`StoreError::Expired`] if its TTL has passed; the item stays in
    ///   place until the next sweep
    pub fn get(&self, key: &K) -> Result<V, StoreError> {
        self.shared.get_count.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let shards = self.shared.shards.load();
        shards.get(self.shared.config.index_fn, key, now)
    }

    /// Sets a key-value pair with the configured TTL.
    ///
    /// If the key already exists, its value and expiry are replaced. While a
    /// resize is running the item is written into both shard arrays.
    pub fn set(&self, key: K, value: V) -> Result<(), StoreError> {
        self.shared.set_count.fetch_add(1, Ordering::Relaxed);

        let shards = self.shared.shards.load();
        shards.set(self.shared.config.index_fn, key, value, self.shared.config.ttl)
    }

    /// Redistributes all keys over `shard_count` shards.
    ///
    /// Concurrent `get`/`set` calls keep working during the migration.
    /// Resizes are serialized by the store lock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidShardCount`] if `shard_count` is zero.
    pub fn resize(&self, shard_count: usize) -> Result<(), StoreError> {
        if shard_count == 0 {
            return Err(StoreError::InvalidShardCount(shard_count));
        }

        let _guard = self
            .shared
            .resize_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let current = self.shared.shards.load_full();
        let total: usize = current.counts().iter().sum();

        let target = Arc::new(ShardSet::new(
            shard_count,
            total / shard_count,
            self.shared.config.spin_rounds,
            self.shared.config.spin_iterations,
        ));

        // From here on every set on `current` is mirrored into `target`
        current.resize_target.store(Some(Arc::clone(&target)));

        let migrated = current.migrate_into(self.shared.config.index_fn, &target);

        self.shared.shards.store(target);
        self.shared.resize_count.fetch_add(1, Ordering::Relaxed);

        info!(
            from = current.len(),
            to = shard_count,
            keys = total,
            migrated,
            "Store resized"
        );

        Ok(())
    }

    /// Removes every item from every shard.
    pub fn clear(&self) {
        let _guard = self
            .shared
            .resize_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        self.shared
            .shards
            .load()
            .clear(self.shared.config.starting_shard_capacity);

        debug!("Store cleared");
    }

    /// Stops the background sweeper.
    ///
    /// Reads and writes keep working; expired items are no longer reclaimed.
    pub fn stop(&self) {
        self.sweeper.stop();
    }

    /// Runs one sweep pass now and returns the number of items removed.
    pub fn sweep_expired(&self) -> u64 {
        self.shared.sweep_expired()
    }

    /// Returns the key count of each shard.
    ///
    /// Advisory snapshot: shards are read one after another.
    pub fn counts(&self) -> Vec<usize> {
        self.shared.shards.load().counts()
    }

    /// Returns the number of keys, expired-but-unswept ones included.
    pub fn len(&self) -> usize {
        self.counts().iter().sum()
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the current number of shards.
    pub fn shard_count(&self) -> usize {
        self.shared.shards.load().len()
    }

    /// Returns the configured TTL.
    pub fn ttl(&self) -> Duration {
        self.shared.config.ttl
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StoreStats {
        let shards = self.shared.shards.load();
        StoreStats {
            keys: shards.counts().iter().sum(),
            shards: shards.len(),
            get_ops: self.shared.get_count.load(Ordering::Relaxed),
            set_ops: self.shared.set_count.load(Ordering::Relaxed),
            expired: self.shared.expired_count.load(Ordering::Relaxed),
            resizes: self.shared.resize_count.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> fmt::Debug for Store<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("shards", &self.shared.shards.load().shards.len())
            .field("config", &self.shared.config)
            .field("get_count", &self.shared.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.shared.set_count.load(Ordering::Relaxed))
            .field("sweeper_stopped", &self.sweeper.is_stopped())
            .finish()
    }
}
