//! Store Configuration

use super::index::{DefaultIndex, IndexFn};
use crate::error::ConfigError;
use crate::sync::{DEFAULT_SPIN_ITERATIONS, DEFAULT_SPIN_ROUNDS};
use std::fmt;
use std::time::Duration;

/// Default number of shards.
pub const DEFAULT_SHARD_COUNT: usize = 128;

/// Default starting capacity of each shard's map.
pub const DEFAULT_SHARD_CAPACITY: usize = 128;

/// Default time-to-live of an item.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Default interval between two expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for a [`Store`](super::Store).
///
/// Override individual fields with struct-update syntax:
///
/// ```
/// use shardstore::storage::StoreConfig;
/// use std::time::Duration;
///
/// let config = StoreConfig::<u64> {
///     ttl: Duration::from_secs(5),
///     shard_count: 16,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
pub struct StoreConfig<K> {
    /// Lifetime of an item after each `set`
    pub ttl: Duration,

    /// Number of shards the key space is split into
    pub shard_count: usize,

    /// Starting capacity of each shard's map
    pub starting_shard_capacity: usize,

    /// Interval between background expiry sweeps
    pub sweep_interval: Duration,

    /// Spinlock acquisition attempts per round before yielding
    pub spin_rounds: u32,

    /// Spinlock relax hints between two attempts
    pub spin_iterations: u32,

    /// Maps a key to its shard
    pub index_fn: IndexFn<K>,
}

impl<K> StoreConfig<K> {
    /// Creates a default configuration using a custom index function.
    ///
    /// Required for key types without a [`DefaultIndex`] implementation.
    pub fn with_index(index_fn: IndexFn<K>) -> Self {
        Self {
            ttl: DEFAULT_TTL,
            shard_count: DEFAULT_SHARD_COUNT,
            starting_shard_capacity: DEFAULT_SHARD_CAPACITY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            spin_rounds: DEFAULT_SPIN_ROUNDS,
            spin_iterations: DEFAULT_SPIN_ITERATIONS,
            index_fn,
        }
    }

    /// Checks the configuration for values the store cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_count == 0 {
            return Err(ConfigError::InvalidShardCount);
        }
        if self.ttl.is_zero() {
            return Err(ConfigError::ZeroTtl);
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        if self.spin_rounds == 0 {
            return Err(ConfigError::ZeroSpinRounds);
        }
        Ok(())
    }
}

impl<K: DefaultIndex> Default for StoreConfig<K> {
    fn default() -> Self {
        Self::with_index(K::default_index())
    }
}

impl<K> Clone for StoreConfig<K> {
    fn clone(&self) -> Self {
        Self {
            ttl: self.ttl,
            shard_count: self.shard_count,
            starting_shard_capacity: self.starting_shard_capacity,
            sweep_interval: self.sweep_interval,
            spin_rounds: self.spin_rounds,
            spin_iterations: self.spin_iterations,
            index_fn: self.index_fn,
        }
    }
}

impl<K> fmt::Debug for StoreConfig<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("ttl", &self.ttl)
            .field("shard_count", &self.shard_count)
            .field("starting_shard_capacity", &self.starting_shard_capacity)
            .field("sweep_interval", &self.sweep_interval)
            .field("spin_rounds", &self.spin_rounds)
            .field("spin_iterations", &self.spin_iterations)
            .finish_non_exhaustive()
    }
}
