//! Idempotency Module
//!
//! A Lock → Save → Unlock cache that gives at-most-one-in-flight semantics
//! for operations correlated by a caller-supplied key, typically sent in the
//! [`IDEMPOTENCY_KEY_HEADER`] header.
//!
//! ## Example
//!
//! ```
//! use bytes::Bytes;
//! use shardstore::idempotency::{parse_key, IdempotencyCache, IdempotencyConfig};
//!
//! let cache = IdempotencyCache::new(IdempotencyConfig::default()).unwrap();
//! let key = parse_key("7d444840-9dc0-11d1-b245-5ffdce74fad2").unwrap();
//!
//! let receipt = cache
//!     .execute(key, || Ok::<_, std::io::Error>(Bytes::from("paid")))
//!     .unwrap();
//! assert_eq!(receipt, "paid");
//!
//! // A retry with the same key gets the saved result back
//! let retry = cache
//!     .execute(key, || Ok::<_, std::io::Error>(Bytes::from("paid twice")))
//!     .unwrap();
//! assert_eq!(retry, "paid");
//! ```

pub mod cache;
pub mod key;

pub use cache::{IdempotencyCache, IdempotencyConfig};
pub use key::{parse_key, IDEMPOTENCY_KEY_HEADER};
