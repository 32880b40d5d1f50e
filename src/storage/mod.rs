//! Storage Engine Module
//!
//! This module provides the sharded key-value store: spin-locked shards, a
//! pluggable key-to-shard index function, live resharding and a background
//! expiry sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                               │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...128   │           │
//! │  │ Spin    │ │ Spin    │ │ Spin    │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (dedicated thread)       │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use shardstore::storage::{Store, StoreConfig};
//! use std::time::Duration;
//!
//! let store: Store<String, u64> = Store::new(StoreConfig {
//!     ttl: Duration::from_secs(30),
//!     shard_count: 16,
//!     ..Default::default()
//! })
//! .unwrap();
//!
//! store.set("visits".to_string(), 1).unwrap();
//! assert_eq!(store.get(&"visits".to_string()), Ok(1));
//! ```

pub mod config;
pub mod engine;
pub mod expiry;
pub mod index;

// Re-export commonly used types
pub use config::StoreConfig;
pub use engine::{Store, StoreStats};
pub use expiry::{ExpiryConfig, ExpirySweeper, Sweep};
pub use index::{index_num, index_seq, index_str, DefaultIndex, IndexFn, NumKey};
