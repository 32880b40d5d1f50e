//! # shardstore - A Sharded In-Memory Cache Engine
//!
//! shardstore is an in-process key-value cache built for high read/write
//! throughput under concurrent access, plus an idempotency-key cache built
//! on the same partitioning idea.
//!
//! ## Features
//!
//! - **Spin-Locked Shards**: every shard has its own atomics-only
//!   reader/writer spinlock
//! - **Pluggable Key Domain**: numeric, sequence and string keys via
//!   interchangeable index functions
//! - **Live Resharding**: change the shard count while readers and writers
//!   keep going, without losing a write
//! - **TTL Expiry**: lazy detection on read, reclamation by a background sweeper
//! - **Idempotency Cache**: Lock → Save → Unlock deduplication of retried
//!   operations
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            shardstore                                   │
//! │                                                                         │
//! │   ┌──────────────────────────────────────────────┐                      │
//! │   │                  Store                       │    ┌──────────────┐  │
//! │   │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │◀───│ IndexFn      │  │
//! │   │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...N    │ │    │ num/seq/str  │  │
//! │   │  │Spinlock│ │Spinlock│ │Spinlock│ │shards  │ │    └──────────────┘  │
//! │   │  └────────┘ └────────┘ └────────┘ └────────┘ │                      │
//! │   └──────────────────────────────────────────────┘                      │
//! │                          ▲                                              │
//! │   ┌──────────────────────┴───────────────────────┐                      │
//! │   │   ExpirySweeper (dedicated thread + Tokio)   │                      │
//! │   └──────────────────────┬───────────────────────┘                      │
//! │                          ▼                                              │
//! │   ┌──────────────────────────────────────────────┐                      │
//! │   │ IdempotencyCache                             │                      │
//! │   │  buckets by low key byte, RwLock each        │                      │
//! │   └──────────────────────────────────────────────┘                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use shardstore::{Store, StoreConfig, StoreError};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let store: Arc<Store<u64, String>> = Arc::new(Store::new(StoreConfig::default()).unwrap());
//!
//! let writer = {
//!     let store = Arc::clone(&store);
//!     thread::spawn(move || {
//!         for i in 0..100 {
//!             store.set(i, format!("value-{i}")).unwrap();
//!         }
//!     })
//! };
//! writer.join().unwrap();
//!
//! store.resize(32).unwrap();
//! assert_eq!(store.get(&42), Ok("value-42".to_string()));
//! assert_eq!(store.get(&500), Err(StoreError::NotFound));
//! ```
//!
//! ## Module Overview
//!
//! - [`sync`]: the spinlock and its data-owning wrapper
//! - [`storage`]: the sharded store, index functions and expiry sweeper
//! - [`idempotency`]: the Lock → Save → Unlock cache
//! - [`error`]: error types

pub mod error;
pub mod idempotency;
pub mod storage;
pub mod sync;

// Re-export commonly used types for convenience
pub use error::{ConfigError, ExecuteError, IdempotencyError, StoreError};
pub use idempotency::{parse_key, IdempotencyCache, IdempotencyConfig, IDEMPOTENCY_KEY_HEADER};
pub use storage::{
    index_num, index_seq, index_str, DefaultIndex, IndexFn, Store, StoreConfig, StoreStats,
};
pub use sync::{SpinRwLock, Spinlock};

/// Version of shardstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
