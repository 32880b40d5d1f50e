//! Error Types
//!
//! Every error here is recoverable and returned to the caller. Nothing in
//! the crate escalates to a panic on its own.
//!
//! - [`StoreError`]: outcomes of `get`/`set`/`resize` on the sharded store.
//! - [`IdempotencyError`]: rejected transitions of the idempotency state machine.
//! - [`ExecuteError`]: either the cache refused, or the wrapped operation failed.
//! - [`ConfigError`]: invalid configuration or a sweeper that could not start.

use thiserror::Error;

/// Errors returned by [`Store`](crate::storage::Store) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No entry for the key
    #[error("item not found")]
    NotFound,

    /// The entry exists but its TTL has passed; it is waiting for the sweeper
    #[error("item already expired")]
    Expired,

    /// The shard array is empty
    #[error("shard array is not initialized")]
    Uninitialized,

    /// A resize was requested with a shard count of zero
    #[error("invalid shard count: {0}")]
    InvalidShardCount(usize),
}

/// Errors returned by [`IdempotencyCache`](crate::idempotency::IdempotencyCache).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdempotencyError {
    /// No record for the key, also returned by `save` without a prior lock
    #[error("item not found")]
    NotFound,

    /// The saved result is past its deadline
    #[error("item already expired")]
    Expired,

    /// Another request holds the lock for this key
    #[error("lock already exists")]
    LockExists,

    /// The result is already saved; read it with `get` instead of locking
    #[error("can't create lock, item already saved")]
    LockExistsSaved,

    /// A saved result exists and uniqueness is enforced
    #[error("item already exists")]
    AlreadyExists,

    /// The header value is not a valid 128-bit identifier
    #[error("invalid idempotency key: {0}")]
    InvalidKey(String),
}

/// Error returned by [`IdempotencyCache::execute`](crate::idempotency::IdempotencyCache::execute).
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    /// The cache rejected the request (duplicate in flight, etc.)
    #[error(transparent)]
    Cache(#[from] IdempotencyError),

    /// The operation itself failed; the lock has been released
    #[error("operation failed: {0}")]
    Operation(E),
}

/// Errors returned while building a store or cache.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Shard count must be at least one
    #[error("shard count must be greater than zero")]
    InvalidShardCount,

    /// TTL must be non-zero
    #[error("ttl must be greater than zero")]
    ZeroTtl,

    /// Sweep interval must be non-zero
    #[error("sweep interval must be greater than zero")]
    ZeroSweepInterval,

    /// Spin rounds must be at least one
    #[error("spin rounds must be greater than zero")]
    ZeroSpinRounds,

    /// Bucket count must be in `1..=256`
    #[error("bucket count must be between 1 and 256, got {0}")]
    InvalidBucketCount(usize),

    /// The background sweeper thread or runtime could not be started
    #[error("failed to start expiry sweeper: {0}")]
    SpawnSweeper(#[from] std::io::Error),
}
