//! Idempotency Key Helpers

use crate::error::IdempotencyError;
use uuid::Uuid;

/// Conventional header carrying the caller-chosen idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "X-Idempotency-Key";

/// Parses a header value into an idempotency key.
///
/// Accepts any textual UUID form (hyphenated, simple, braced, URN).
/// Surrounding whitespace is ignored.
///
/// # Example
///
/// ```
/// use shardstore::idempotency::parse_key;
///
/// let key = parse_key("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
/// assert_eq!(key.to_string(), "67e55044-10b1-426f-9247-bb680e5fe0c8");
/// assert!(parse_key("not-a-key").is_err());
/// ```
pub fn parse_key(value: &str) -> Result<Uuid, IdempotencyError> {
    Uuid::parse_str(value.trim()).map_err(|e| IdempotencyError::InvalidKey(e.to_string()))
}

/// Selects the bucket of `key` from its low-order byte.
///
/// That is the last byte of the big-endian UUID layout (`as_u128() as u8`),
/// not `as_bytes()[0]`. Both are random for v4 keys; callers that derive
/// keys themselves should vary the trailing byte to spread buckets.
#[inline]
pub(crate) fn bucket_index(key: &Uuid, bucket_count: usize) -> usize {
    let low = key.as_u128() as u8;
    usize::from(low) % bucket_count
}
