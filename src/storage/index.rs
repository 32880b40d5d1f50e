//! Shard Index Functions
//!
//! An index function maps `(shard_count, key)` to a shard in
//! `[0, shard_count)`. The store never hashes keys itself; it calls the
//! function it was configured with, so the key domain is pluggable.
//!
//! Three built-in functions cover the usual key domains:
//!
//! | Function      | Keys                                   | Index                         |
//! |---------------|----------------------------------------|-------------------------------|
//! | [`index_num`] | primitive integers                     | folded bits `%` shard count   |
//! | [`index_seq`] | `[T; N]`, `Vec<T>`, `Uuid`, `Bytes`... | sum of elements `%` count     |
//! | [`index_str`] | `String`, `Box<str>`, `Arc<str>`...    | sum of bytes `%` count        |
//!
//! These are additive, not cryptographic. Pathological key sets (for example
//! anagrams under [`index_str`]) land in the same shard; the trade is speed.

use bytes::Bytes;
use std::sync::Arc;
use uuid::Uuid;

/// Maps `(shard_count, key)` to a shard index in `[0, shard_count)`.
pub type IndexFn<K> = fn(usize, &K) -> usize;

/// Numeric scalar usable as a key or as an element of a sequence key.
pub trait NumKey: Copy {
    /// Folds the value's bits into 64 bits.
    fn fold(self) -> u64;
}

macro_rules! impl_num_key {
    ($($t:ty),* $(,)?) => {
        $(
            impl NumKey for $t {
                #[inline]
                fn fold(self) -> u64 {
                    self as u64
                }
            }
        )*
    };
}

impl_num_key!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl NumKey for u128 {
    #[inline]
    fn fold(self) -> u64 {
        (self as u64) ^ ((self >> 64) as u64)
    }
}

impl NumKey for i128 {
    #[inline]
    fn fold(self) -> u64 {
        (self as u128).fold()
    }
}

#[inline]
fn reduce(value: u64, shard_count: usize) -> usize {
    if shard_count == 0 {
        return 0;
    }
    (value % shard_count as u64) as usize
}

/// Index for numeric keys: the folded key modulo `shard_count`.
#[inline]
pub fn index_num<K: NumKey>(shard_count: usize, key: &K) -> usize {
    reduce(key.fold(), shard_count)
}

/// Index for sequence keys: wrapping sum of the folded elements modulo `shard_count`.
#[inline]
pub fn index_seq<T: NumKey, K: AsRef<[T]> + ?Sized>(shard_count: usize, key: &K) -> usize {
    let sum = key
        .as_ref()
        .iter()
        .fold(0u64, |acc, el| acc.wrapping_add(el.fold()));
    reduce(sum, shard_count)
}

/// Index for string keys: wrapping sum of the UTF-8 bytes modulo `shard_count`.
#[inline]
pub fn index_str<K: AsRef<str> + ?Sized>(shard_count: usize, key: &K) -> usize {
    let sum = key
        .as_ref()
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_add(u64::from(b)));
    reduce(sum, shard_count)
}

/// Key types with a built-in index function.
///
/// Implemented for the primitive integers, strings, numeric arrays, `Uuid`
/// and `Bytes`, which lets [`StoreConfig::default`](super::StoreConfig) pick
/// the right function. Other key types pass their own function to
/// [`StoreConfig::with_index`](super::StoreConfig::with_index).
pub trait DefaultIndex: Sized {
    /// The index function used when none is configured.
    fn default_index() -> IndexFn<Self>;
}

macro_rules! impl_default_index_num {
    ($($t:ty),* $(,)?) => {
        $(
            impl DefaultIndex for $t {
                fn default_index() -> IndexFn<Self> {
                    index_num::<$t>
                }
            }
        )*
    };
}

impl_default_index_num!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

impl<T: NumKey, const N: usize> DefaultIndex for [T; N] {
    fn default_index() -> IndexFn<Self> {
        index_seq::<T, [T; N]>
    }
}

impl<T: NumKey> DefaultIndex for Vec<T> {
    fn default_index() -> IndexFn<Self> {
        index_seq::<T, Vec<T>>
    }
}

impl DefaultIndex for Uuid {
    fn default_index() -> IndexFn<Self> {
        index_seq::<u8, Uuid>
    }
}

impl DefaultIndex for Bytes {
    fn default_index() -> IndexFn<Self> {
        index_seq::<u8, Bytes>
    }
}

impl DefaultIndex for String {
    fn default_index() -> IndexFn<Self> {
        index_str::<String>
    }
}

impl DefaultIndex for Box<str> {
    fn default_index() -> IndexFn<Self> {
        index_str::<Box<str>>
    }
}

impl DefaultIndex for Arc<str> {
    fn default_index() -> IndexFn<Self> {
        index_str::<Arc<str>>
    }
}

impl DefaultIndex for &'static str {
    fn default_index() -> IndexFn<Self> {
        index_str::<&'static str>
    }
}
