//! Spin-Based Reader/Writer Lock
//!
//! This module implements the lock that guards every shard of the store.
//! Critical sections in a shard are tiny (one hash map probe or insert), so
//! parking the thread in the OS is far more expensive than spinning for a
//! few hundred nanoseconds.
//!
//! ## Design
//!
//! The lock state is two atomics:
//!
//! ```text
//! ┌──────────────────────┐   ┌──────────────────────────┐
//! │ locked: AtomicU32    │   │ readers: AtomicI64       │
//! │ 0 = free, 1 = writer │   │ number of shared holders │
//! └──────────────────────┘   └──────────────────────────┘
//! ```
//!
//! - **Exclusive**: CAS `locked` from 0 to 1, then wait for `readers` to drain.
//! - **Shared**: bump `readers`, then re-check `locked`. If a writer slipped in,
//!   back the increment out and retry.
//!
//! ## Backoff
//!
//! Acquisition uses two levels of backoff. Inside a round the thread makes up
//! to `spin_rounds` attempts, issuing `spin_iterations` CPU relax hints between
//! them. When a whole round fails the thread yields to the scheduler and starts
//! over. The uncontended path never allocates and never enters the kernel.
//!
//! ## Caveats
//!
//! - Not reentrant: a thread that locks twice deadlocks itself.
//! - Not fair: there is no queue, the fastest CAS wins.
//! - The raw [`Spinlock`] does not track ownership, so `unlock` from a thread
//!   that never locked releases someone else's critical section. Use
//!   [`SpinRwLock`] whenever the lock protects data.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::thread;

/// Default number of acquisition attempts per round before yielding.
pub const DEFAULT_SPIN_ROUNDS: u32 = 16;

/// Default number of CPU relax hints between two attempts.
pub const DEFAULT_SPIN_ITERATIONS: u32 = 4;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

#[inline]
fn relax(iterations: u32) {
    for _ in 0..iterations {
        std::hint::spin_loop();
    }
}

/// A raw exclusive/shared spin lock without associated data.
///
/// The type is neither `Clone` nor `Copy`: duplicating the state of an
/// acquired lock would hand out a second, independent lock.
///
/// # Example
///
/// ```
/// use shardstore::sync::Spinlock;
///
/// let lock = Spinlock::new(16, 4);
///
/// lock.read_lock();
/// lock.read_lock();
/// lock.read_unlock();
/// lock.read_unlock();
///
/// lock.lock();
/// assert!(lock.is_locked());
/// lock.unlock();
/// ```
pub struct Spinlock {
    /// Exclusive flag
    locked: AtomicU32,
    /// Number of shared holders (and readers mid-attempt)
    readers: AtomicI64,
    /// Attempts per round before yielding the thread
    spin_rounds: u32,
    /// Relax hints between attempts
    spin_iterations: u32,
}

impl Spinlock {
    /// Creates an unlocked spinlock.
    ///
    /// A `spin_rounds` of zero is treated as one, otherwise the lock could
    /// never be acquired.
    pub const fn new(spin_rounds: u32, spin_iterations: u32) -> Self {
        Self {
            locked: AtomicU32::new(UNLOCKED),
            readers: AtomicI64::new(0),
            spin_rounds: if spin_rounds == 0 { 1 } else { spin_rounds },
            spin_iterations,
        }
    }

    /// Acquires exclusive access, spinning and yielding until it succeeds.
    pub fn lock(&self) {
        loop {
            for _ in 0..self.spin_rounds {
                if self.locked.load(Ordering::Relaxed) == UNLOCKED
                    && self
                        .locked
                        .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::SeqCst, Ordering::Relaxed)
                        .is_ok()
                {
                    // New readers now back off; wait for the ones already inside.
                    while self.readers.load(Ordering::SeqCst) != 0 {
                        relax(self.spin_iterations.max(1));
                    }
                    return;
                }
                relax(self.spin_iterations);
            }
            thread::yield_now();
        }
    }

    /// Releases exclusive access.
    ///
    /// There is no ownership check.
    #[inline]
    pub fn unlock(&self) {
        self.locked.store(UNLOCKED, Ordering::Release);
    }

    /// Acquires shared access, spinning and yielding until it succeeds.
    pub fn read_lock(&self) {
        loop {
            for _ in 0..self.spin_rounds {
                if self.locked.load(Ordering::Relaxed) == UNLOCKED {
                    self.readers.fetch_add(1, Ordering::SeqCst);
                    if self.locked.load(Ordering::SeqCst) == UNLOCKED {
                        return;
                    }
                    self.readers.fetch_sub(1, Ordering::SeqCst);
                }
                relax(self.spin_iterations);
            }
            thread::yield_now();
        }
    }

    /// Releases shared access.
    #[inline]
    pub fn read_unlock(&self) {
        self.readers.fetch_sub(1, Ordering::Release);
    }

    /// Returns true if a writer currently holds the lock.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed) == LOCKED
    }

    /// Returns the number of shared holders (advisory).
    #[inline]
    pub fn reader_count(&self) -> i64 {
        self.readers.load(Ordering::Relaxed)
    }
}

impl Default for Spinlock {
    fn default() -> Self {
        Self::new(DEFAULT_SPIN_ROUNDS, DEFAULT_SPIN_ITERATIONS)
    }
}

impl fmt::Debug for Spinlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spinlock")
            .field("locked", &self.is_locked())
            .field("readers", &self.reader_count())
            .field("spin_rounds", &self.spin_rounds)
            .field("spin_iterations", &self.spin_iterations)
            .finish()
    }
}

/// A reader/writer lock built on [`Spinlock`] that owns the data it guards.
///
/// Access only goes through RAII guards, so the lock is always released by
/// the holder that acquired it.
///
/// # Example
///
/// ```
/// use shardstore::sync::SpinRwLock;
///
/// let lock = SpinRwLock::new(Vec::new(), 16, 4);
/// lock.write().push(1);
/// assert_eq!(lock.read().len(), 1);
/// ```
pub struct SpinRwLock<T: ?Sized> {
    raw: Spinlock,
    data: UnsafeCell<T>,
}

// SAFETY: the spinlock hands out either one `&mut T` or any number of `&T`,
// the same contract as `std::sync::RwLock`.
unsafe impl<T: ?Sized + Send> Send for SpinRwLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for SpinRwLock<T> {}

impl<T> SpinRwLock<T> {
    /// Wraps `data` in a new unlocked lock.
    pub const fn new(data: T, spin_rounds: u32, spin_iterations: u32) -> Self {
        Self {
            raw: Spinlock::new(spin_rounds, spin_iterations),
            data: UnsafeCell::new(data),
        }
    }

    /// Consumes the lock and returns the data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinRwLock<T> {
    /// Acquires shared access.
    #[inline]
    pub fn read(&self) -> SpinReadGuard<'_, T> {
        self.raw.read_lock();
        SpinReadGuard { lock: self }
    }

    /// Acquires exclusive access.
    #[inline]
    pub fn write(&self) -> SpinWriteGuard<'_, T> {
        self.raw.lock();
        SpinWriteGuard { lock: self }
    }

    /// Returns a mutable reference without locking; `&mut self` proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for SpinRwLock<T> {
    fn default() -> Self {
        Self::new(T::default(), DEFAULT_SPIN_ROUNDS, DEFAULT_SPIN_ITERATIONS)
    }
}

impl<T: ?Sized> fmt::Debug for SpinRwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinRwLock").field("raw", &self.raw).finish_non_exhaustive()
    }
}

/// Shared access to the data of a [`SpinRwLock`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinReadGuard<'a, T: ?Sized> {
    lock: &'a SpinRwLock<T>,
}

impl<T: ?Sized> Deref for SpinReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: shared lock held, no writer can exist.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.read_unlock();
    }
}

/// Exclusive access to the data of a [`SpinRwLock`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinWriteGuard<'a, T: ?Sized> {
    lock: &'a SpinRwLock<T>,
}

impl<T: ?Sized> Deref for SpinWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: exclusive lock held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: exclusive lock held.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.unlock();
    }
}
