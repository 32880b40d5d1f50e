//! Idempotency Cache
//!
//! Deduplicates retries of a side-effecting operation keyed by a
//! caller-chosen 128-bit identifier.
//!
//! ## State Machine
//!
//! ```text
//!                 lock                      save
//!   ┌────────┐ ─────────▶ ┌──────────┐ ──────────▶ ┌─────────┐
//!   │ Absent │            │  Locked  │             │  Saved  │
//!   └────────┘ ◀───────── └──────────┘             └─────────┘
//!       ▲        unlock /      │ deadline               │ deadline
//!       │        sweep         ▼ passed: lock           ▼ passed: lock
//!       └──────────────────────── overwrites ◀──────────┘ overwrites
//! ```
//!
//! ## Request Flow
//!
//! 1. `get`: a saved result is returned as is; a lock means a duplicate is
//!    in flight and the caller should back off.
//! 2. `lock`: claims the key for a short `lock_ttl`. Concurrent duplicates
//!    are rejected with [`IdempotencyError::LockExists`].
//! 3. The caller runs its operation.
//! 4. On failure, `unlock` frees the key so a retry can go through at once.
//! 5. On success, `save` stores the result for `save_ttl`.
//!
//! [`IdempotencyCache::execute`] runs the whole flow in one call.
//!
//! ## Buckets
//!
//! Keys are expected to be uniformly random (UUIDs), so a small fixed number
//! of buckets selected by the key's low-order byte spreads them well enough.
//! Each bucket has its own `RwLock`; hold times here are longer than in the
//! store and contention lower, so a blocking lock is used.

use super::key::bucket_index;
use crate::error::{ConfigError, ExecuteError, IdempotencyError};
use crate::storage::expiry::{ExpiryConfig, ExpirySweeper, Sweep};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{info, trace};
use uuid::Uuid;

/// Default lifetime of a lock record.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);

/// Default lifetime of a saved result.
pub const DEFAULT_SAVE_TTL: Duration = Duration::from_secs(60 * 60);

/// Default number of buckets.
pub const DEFAULT_BUCKET_COUNT: usize = 8;

const DEFAULT_BUCKET_CAPACITY: usize = 128;

/// Scales `ttl` by a random factor in `[0.99, 1.01)`.
///
/// Spreads out deadlines created by a burst of requests.
pub(crate) fn jittered(ttl: Duration) -> Duration {
    let factor = 0.99 + rand::random::<f64>() / 50.0;
    ttl.mul_f64(factor)
}

/// Configuration for an [`IdempotencyCache`].
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// How long a lock protects an in-flight operation
    pub lock_ttl: Duration,

    /// How long a saved result is served
    pub save_ttl: Duration,

    /// Reject `save` over a live saved result
    pub enforce_uniqueness: bool,

    /// Number of buckets, `1..=256`
    pub bucket_count: usize,

    /// Interval between sweeps; `None` sweeps every `lock_ttl`
    pub sweep_interval: Option<Duration>,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            lock_ttl: DEFAULT_LOCK_TTL,
            save_ttl: DEFAULT_SAVE_TTL,
            enforce_uniqueness: false,
            bucket_count: DEFAULT_BUCKET_COUNT,
            sweep_interval: None,
        }
    }
}

impl IdempotencyConfig {
    /// Checks the configuration for values the cache cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_ttl.is_zero() || self.save_ttl.is_zero() {
            return Err(ConfigError::ZeroTtl);
        }
        if !(1..=256).contains(&self.bucket_count) {
            return Err(ConfigError::InvalidBucketCount(self.bucket_count));
        }
        if self.sweep_interval.is_some_and(|i| i.is_zero()) {
            return Err(ConfigError::ZeroSweepInterval);
        }
        Ok(())
    }

    fn effective_sweep_interval(&self) -> Duration {
        self.sweep_interval.unwrap_or(self.lock_ttl)
    }
}

/// Live state of one key.
#[derive(Debug, Clone)]
enum Record {
    Locked { deadline: Instant },
    Saved { payload: Bytes, deadline: Instant },
}

impl Record {
    #[inline]
    fn is_expired_at(&self, now: Instant) -> bool {
        match self {
            Record::Locked { deadline } | Record::Saved { deadline, .. } => now >= *deadline,
        }
    }
}

struct Bucket {
    records: RwLock<HashMap<Uuid, Record>>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::with_capacity(DEFAULT_BUCKET_CAPACITY)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Record>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Record>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Buckets {
    buckets: Box<[Bucket]>,
    config: IdempotencyConfig,
}

impl Buckets {
    #[inline]
    fn bucket(&self, key: &Uuid) -> &Bucket {
        &self.buckets[bucket_index(key, self.buckets.len())]
    }
}

impl Sweep for Buckets {
    fn sweep_expired(&self) -> u64 {
        let now = Instant::now();
        let mut removed = 0u64;

        for bucket in self.buckets.iter() {
            let mut records = bucket.write();
            let before = records.len();
            records.retain(|_, record| !record.is_expired_at(now));
            removed += (before - records.len()) as u64;
        }
        removed
    }
}

/// Lock → Save → Unlock cache for deduplicating retried operations.
///
/// Construct one per service and share it (for example behind an `Arc`)
/// with every request handler. It must exist before the first request is
/// served; there is no global instance.
///
/// # Example
///
/// ```
/// use shardstore::idempotency::{IdempotencyCache, IdempotencyConfig};
/// use shardstore::IdempotencyError;
/// use uuid::Uuid;
///
/// let cache = IdempotencyCache::new(IdempotencyConfig::default()).unwrap();
/// let key = Uuid::new_v4();
///
/// cache.lock(key).unwrap();
/// assert_eq!(cache.lock(key), Err(IdempotencyError::LockExists));
///
/// cache.save(key, "receipt-17").unwrap();
/// assert_eq!(cache.get(key).unwrap(), "receipt-17");
/// assert_eq!(cache.lock(key), Err(IdempotencyError::LockExistsSaved));
/// ```
pub struct IdempotencyCache {
    shared: Arc<Buckets>,
    sweeper: ExpirySweeper,
}

impl IdempotencyCache {
    /// Creates a cache and starts its background sweeper.
    pub fn new(config: IdempotencyConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let buckets = (0..config.bucket_count).map(|_| Bucket::new()).collect();
        let expiry = ExpiryConfig {
            interval: config.effective_sweep_interval(),
            name: "idempotency-sweeper".to_string(),
        };

        info!(
            buckets = config.bucket_count,
            lock_ttl_ms = config.lock_ttl.as_millis() as u64,
            save_ttl_ms = config.save_ttl.as_millis() as u64,
            enforce_uniqueness = config.enforce_uniqueness,
            "Idempotency cache initialized"
        );

        let shared = Arc::new(Buckets { buckets, config });
        let sweeper = ExpirySweeper::start(Arc::clone(&shared), expiry)?;

        Ok(Self { shared, sweeper })
    }

    /// Returns the saved result for `key`.
    ///
    /// # Errors
    ///
    /// - [`IdempotencyError::LockExists`] while the operation is in flight
    /// - [`IdempotencyError::Expired`] if the result is past its deadline
    /// - [`IdempotencyError::NotFound`] if there is no record
    pub fn get(&self, key: Uuid) -> Result<Bytes, IdempotencyError> {
        let now = Instant::now();
        let records = self.shared.bucket(&key).read();

        match records.get(&key) {
            None => Err(IdempotencyError::NotFound),
            Some(Record::Locked { .. }) => Err(IdempotencyError::LockExists),
            Some(Record::Saved { deadline, .. }) if now >= *deadline => {
                Err(IdempotencyError::Expired)
            }
            Some(Record::Saved { payload, .. }) => Ok(payload.clone()),
        }
    }

    /// Claims `key` for an operation about to run.
    ///
    /// A record past its deadline is treated as absent: an abandoned lock
    /// must not block retries forever.
    ///
    /// # Errors
    ///
    /// - [`IdempotencyError::LockExists`] if another request holds a live lock
    /// - [`IdempotencyError::LockExistsSaved`] if a live result is saved
    pub fn lock(&self, key: Uuid) -> Result<(), IdempotencyError> {
        let now = Instant::now();
        let deadline = now + jittered(self.shared.config.lock_ttl);
        let mut records = self.shared.bucket(&key).write();

        if let Some(record) = records.get(&key) {
            if !record.is_expired_at(now) {
                let err = match record {
                    Record::Locked { .. } => IdempotencyError::LockExists,
                    Record::Saved { .. } => IdempotencyError::LockExistsSaved,
                };
                trace!(%key, error = %err, "Lock rejected");
                return Err(err);
            }
        }

        records.insert(key, Record::Locked { deadline });
        Ok(())
    }

    /// Stores the result of the operation for `key`.
    ///
    /// # Errors
    ///
    /// - [`IdempotencyError::NotFound`] if `key` has no record (never locked,
    ///   unlocked, or swept)
    /// - [`IdempotencyError::AlreadyExists`] if uniqueness is enforced and a
    ///   live result is already saved
    pub fn save(&self, key: Uuid, payload: impl Into<Bytes>) -> Result<(), IdempotencyError> {
        let payload = payload.into();
        let now = Instant::now();
        let deadline = now + jittered(self.shared.config.save_ttl);
        let mut records = self.shared.bucket(&key).write();

        let Some(record) = records.get_mut(&key) else {
            trace!(%key, "Save without a lock");
            return Err(IdempotencyError::NotFound);
        };

        if let Record::Saved { deadline: current, .. } = record {
            if self.shared.config.enforce_uniqueness && now < *current {
                trace!(%key, "Save rejected, result already saved");
                return Err(IdempotencyError::AlreadyExists);
            }
        }

        *record = Record::Saved { payload, deadline };
        Ok(())
    }

    /// Releases the lock on `key` after a failed operation.
    ///
    /// Only a lock is removed; a saved result is left alone.
    ///
    /// # Returns
    ///
    /// Returns `true` if a lock was removed.
    pub fn unlock(&self, key: Uuid) -> bool {
        let mut records = self.shared.bucket(&key).write();

        if matches!(records.get(&key), Some(Record::Locked { .. })) {
            records.remove(&key);
            return true;
        }
        false
    }

    /// Runs `op` at most once per key.
    ///
    /// Returns the saved result if there is one. Otherwise locks the key,
    /// runs `op`, then saves its output or, on failure, unlocks the key so
    /// a retry can run it again.
    ///
    /// # Errors
    ///
    /// - [`ExecuteError::Cache`] if a duplicate is in flight or the cache
    ///   rejected the save
    /// - [`ExecuteError::Operation`] with the error returned by `op`
    pub fn execute<F, E>(&self, key: Uuid, op: F) -> Result<Bytes, ExecuteError<E>>
    where
        F: FnOnce() -> Result<Bytes, E>,
    {
        if let Ok(payload) = self.get(key) {
            return Ok(payload);
        }

        match self.lock(key) {
            Ok(()) => {}
            // Saved between our get and lock
            Err(IdempotencyError::LockExistsSaved) => return Ok(self.get(key)?),
            Err(err) => return Err(err.into()),
        }

        match op() {
            Ok(payload) => {
                self.save(key, payload.clone())?;
                Ok(payload)
            }
            Err(err) => {
                self.unlock(key);
                Err(ExecuteError::Operation(err))
            }
        }
    }

    /// Drops every record.
    pub fn reset(&self) {
        for bucket in self.shared.buckets.iter() {
            bucket.write().clear();
        }
    }

    /// Runs one sweep pass now and returns the number of records removed.
    pub fn sweep_expired(&self) -> u64 {
        self.shared.sweep_expired()
    }

    /// Stops the background sweeper.
    pub fn stop(&self) {
        self.sweeper.stop();
    }

    /// Returns the number of records, expired-but-unswept ones included.
    pub fn len(&self) -> usize {
        self.shared.buckets.iter().map(|b| b.read().len()).sum()
    }

    /// Returns true if the cache holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the configuration the cache was built with.
    pub fn config(&self) -> &IdempotencyConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for IdempotencyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyCache")
            .field("config", &self.shared.config)
            .field("records", &self.len())
            .field("sweeper_stopped", &self.sweeper.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use tokio_test::{assert_err, assert_ok};

    fn cache_with(config: IdempotencyConfig) -> IdempotencyCache {
        IdempotencyCache::new(IdempotencyConfig {
            sweep_interval: Some(Duration::from_secs(3600)),
            ..config
        })
        .unwrap()
    }

    fn default_cache() -> IdempotencyCache {
        cache_with(IdempotencyConfig::default())
    }

    #[test]
    fn test_get_states() {
        let cache = default_cache();
        let key = Uuid::new_v4();

        assert_eq!(cache.get(key), Err(IdempotencyError::NotFound));

        cache.lock(key).unwrap();
        assert_eq!(cache.get(key), Err(IdempotencyError::LockExists));

        cache.save(key, "done").unwrap();
        assert_eq!(cache.get(key), Ok(Bytes::from("done")));
    }

    #[test]
    fn test_duplicate_lock_rejected() {
        let cache = default_cache();
        let key = Uuid::new_v4();

        assert_ok!(cache.lock(key));
        assert_eq!(cache.lock(key), Err(IdempotencyError::LockExists));
    }

    #[test]
    fn test_concurrent_lock_single_winner() {
        const THREADS: usize = 8;

        let cache = Arc::new(default_cache());
        let key = Uuid::new_v4();
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.lock(key)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| *r == Err(IdempotencyError::LockExists)));
    }

    #[test]
    fn test_lock_after_save() {
        let cache = default_cache();
        let key = Uuid::new_v4();

        cache.lock(key).unwrap();
        cache.save(key, vec![1u8, 2, 3]).unwrap();

        assert_eq!(cache.lock(key), Err(IdempotencyError::LockExistsSaved));
        assert_eq!(cache.get(key), Ok(Bytes::from(vec![1u8, 2, 3])));
    }

    #[test]
    fn test_unlock_after_failure() {
        let cache = default_cache();
        let key = Uuid::new_v4();

        cache.lock(key).unwrap();
        assert!(cache.unlock(key));

        // A retry goes through immediately
        assert_ok!(cache.lock(key));
    }

    #[test]
    fn test_unlock_leaves_saved_result() {
        let cache = default_cache();
        let key = Uuid::new_v4();

        assert!(!cache.unlock(key));

        cache.lock(key).unwrap();
        cache.save(key, "done").unwrap();

        assert!(!cache.unlock(key));
        assert_eq!(cache.get(key), Ok(Bytes::from("done")));
    }

    #[test]
    fn test_save_without_lock() {
        let cache = default_cache();
        let key = Uuid::new_v4();

        assert_eq!(cache.save(key, "orphan"), Err(IdempotencyError::NotFound));
        assert_eq!(cache.get(key), Err(IdempotencyError::NotFound));

        // A released lock leaves nothing to save into either
        cache.lock(key).unwrap();
        assert!(cache.unlock(key));
        assert_eq!(cache.save(key, "late"), Err(IdempotencyError::NotFound));
    }

    #[test]
    fn test_expired_lock_is_overwritten() {
        let cache = cache_with(IdempotencyConfig {
            lock_ttl: Duration::from_millis(30),
            ..Default::default()
        });
        let key = Uuid::new_v4();

        cache.lock(key).unwrap();
        thread::sleep(Duration::from_millis(50));

        // The first holder is presumed dead
        assert_ok!(cache.lock(key));
        assert_eq!(cache.lock(key), Err(IdempotencyError::LockExists));
    }

    #[test]
    fn test_expired_save() {
        let cache = cache_with(IdempotencyConfig {
            save_ttl: Duration::from_millis(30),
            ..Default::default()
        });
        let key = Uuid::new_v4();

        cache.lock(key).unwrap();
        cache.save(key, "done").unwrap();
        thread::sleep(Duration::from_millis(50));

        assert_eq!(cache.get(key), Err(IdempotencyError::Expired));
        assert_ok!(cache.lock(key));
    }

    #[test]
    fn test_uniqueness() {
        let key = Uuid::new_v4();

        let relaxed = default_cache();
        relaxed.lock(key).unwrap();
        relaxed.save(key, "first").unwrap();
        assert_ok!(relaxed.save(key, "second"));
        assert_eq!(relaxed.get(key), Ok(Bytes::from("second")));

        let strict = cache_with(IdempotencyConfig {
            enforce_uniqueness: true,
            ..Default::default()
        });
        strict.lock(key).unwrap();
        strict.save(key, "first").unwrap();
        assert_eq!(strict.save(key, "second"), Err(IdempotencyError::AlreadyExists));
        assert_eq!(strict.get(key), Ok(Bytes::from("first")));
    }

    #[test]
    fn test_jitter_bounds() {
        let ttl = Duration::from_secs(100);
        for _ in 0..1_000 {
            let value = jittered(ttl);
            assert!(value >= Duration::from_secs(99));
            assert!(value <= Duration::from_secs(101));
        }
    }

    #[test]
    fn test_sweep_removes_expired_records() {
        let cache = cache_with(IdempotencyConfig {
            lock_ttl: Duration::from_millis(20),
            save_ttl: Duration::from_millis(20),
            ..Default::default()
        });

        let locked = Uuid::new_v4();
        let saved = Uuid::new_v4();
        cache.lock(locked).unwrap();
        cache.lock(saved).unwrap();
        cache.save(saved, "done").unwrap();
        assert_eq!(cache.len(), 2);

        thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.sweep_expired(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.get(saved), Err(IdempotencyError::NotFound));
    }

    #[test]
    fn test_background_sweeper() {
        let cache = IdempotencyCache::new(IdempotencyConfig {
            lock_ttl: Duration::from_millis(20),
            ..Default::default()
        })
        .unwrap();

        for _ in 0..16 {
            cache.lock(Uuid::new_v4()).unwrap();
        }

        // Sweeps every lock_ttl by default
        thread::sleep(Duration::from_millis(200));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reset() {
        let cache = default_cache();
        for _ in 0..10 {
            cache.lock(Uuid::new_v4()).unwrap();
        }

        cache.reset();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_execute_runs_once() {
        let cache = default_cache();
        let key = Uuid::new_v4();
        let mut runs = 0;

        let first = cache.execute(key, || -> Result<Bytes, String> {
            runs += 1;
            Ok(Bytes::from("charged"))
        });
        assert_eq!(first.unwrap(), Bytes::from("charged"));

        let second = cache.execute(key, || -> Result<Bytes, String> {
            runs += 1;
            Ok(Bytes::from("charged twice"))
        });
        assert_eq!(second.unwrap(), Bytes::from("charged"));
        assert_eq!(runs, 1);
    }

    #[test]
    fn test_execute_failure_allows_retry() {
        let cache = default_cache();
        let key = Uuid::new_v4();

        let failed = cache.execute(key, || Err::<Bytes, _>("gateway timeout"));
        assert!(matches!(failed, Err(ExecuteError::Operation("gateway timeout"))));
        assert_eq!(cache.get(key), Err(IdempotencyError::NotFound));

        let retried = cache.execute(key, || Ok::<_, &str>(Bytes::from("ok")));
        assert_eq!(retried.unwrap(), Bytes::from("ok"));
    }

    #[test]
    fn test_execute_rejects_in_flight_duplicate() {
        let cache = default_cache();
        let key = Uuid::new_v4();
        cache.lock(key).unwrap();

        let result = cache.execute(key, || Ok::<_, &str>(Bytes::from("dup")));
        assert_err!(&result);
        assert!(matches!(
            result,
            Err(ExecuteError::Cache(IdempotencyError::LockExists))
        ));
    }

    #[test]
    fn test_config_validation() {
        let config = IdempotencyConfig {
            bucket_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            IdempotencyCache::new(config),
            Err(ConfigError::InvalidBucketCount(0))
        ));

        let config = IdempotencyConfig {
            bucket_count: 257,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBucketCount(257))));

        let config = IdempotencyConfig {
            lock_ttl: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTtl)));

        let config = IdempotencyConfig {
            sweep_interval: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroSweepInterval)));
    }
}
