//! Synchronization Primitives
//!
//! Low-level locking used by the sharded store. Everything here is built on
//! atomics only; the uncontended path is a single CAS.

pub mod spinlock;

pub use spinlock::{
    SpinReadGuard, SpinRwLock, SpinWriteGuard, Spinlock, DEFAULT_SPIN_ITERATIONS,
    DEFAULT_SPIN_ROUNDS,
};
