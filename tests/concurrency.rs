//! Concurrency stress tests across the public API.

use bytes::Bytes;
use shardstore::{
    IdempotencyCache, IdempotencyConfig, IdempotencyError, Spinlock, Store, StoreConfig,
    StoreError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn resize_under_mixed_load_loses_nothing() -> anyhow::Result<()> {
    init_tracing();

    let store: Arc<Store<u32, u32>> = Arc::new(Store::new(StoreConfig {
        shard_count: 20,
        starting_shard_capacity: 1000,
        sweep_interval: Duration::from_secs(3600),
        ..Default::default()
    })?);
    store.stop();

    // Written once before the resize and never touched again
    store.set(100_001, 7)?;

    let done = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();

    for t in 0..4u32 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || -> Result<(), StoreError> {
            for i in 0..20_000u32 {
                let key = t * 20_000 + i;
                store.set(key, key)?;
            }
            Ok(())
        }));
    }

    let reader = {
        let store = Arc::clone(&store);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut i = 0u32;
            while !done.load(Ordering::Relaxed) {
                match store.get(&(i % 80_000)) {
                    Ok(v) => assert_eq!(v, i % 80_000),
                    Err(err) => assert_eq!(err, StoreError::NotFound),
                }
                i = i.wrapping_add(7);
            }
        })
    };

    thread::sleep(Duration::from_millis(5));
    store.resize(9)?;
    store.resize(31)?;

    for handle in handles {
        handle.join().expect("writer panicked")?;
    }
    done.store(true, Ordering::Relaxed);
    reader.join().expect("reader panicked");

    assert_eq!(store.get(&100_001), Ok(7));
    for key in 0..80_000u32 {
        assert_eq!(store.get(&key), Ok(key), "key {key} lost during resize");
    }
    assert_eq!(store.len(), 80_001);
    assert_eq!(store.shard_count(), 31);
    Ok(())
}

#[test]
fn overwrites_during_resize_keep_latest_value() -> anyhow::Result<()> {
    init_tracing();

    const KEYS: u32 = 50_000;
    const WRITERS: u32 = 4;
    const ROUNDS: u32 = 3;

    let store: Arc<Store<u32, u32>> = Arc::new(Store::new(StoreConfig {
        shard_count: 16,
        sweep_interval: Duration::from_secs(3600),
        ..Default::default()
    })?);
    store.stop();

    for key in 0..KEYS {
        store.set(key, 0)?;
    }

    let start = Arc::new(Barrier::new(WRITERS as usize + 1));
    let per_writer = KEYS / WRITERS;

    // Each writer owns a slice of the keys and rewrites it with a rising round number
    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let store = Arc::clone(&store);
            let start = Arc::clone(&start);
            thread::spawn(move || -> Result<(), StoreError> {
                start.wait();
                for round in 1..=ROUNDS {
                    for key in w * per_writer..(w + 1) * per_writer {
                        store.set(key, round)?;
                        if let Ok(seen) = store.get(&key) {
                            assert!(seen >= round, "key {key} went back to {seen}");
                        }
                    }
                }
                Ok(())
            })
        })
        .collect();

    start.wait();
    for count in [7, 29, 3, 64, 11] {
        store.resize(count)?;
    }

    for handle in handles {
        handle.join().expect("writer panicked")?;
    }

    let stale = (0..KEYS)
        .filter(|key| store.get(key) != Ok(ROUNDS))
        .count();
    assert_eq!(stale, 0, "keys lost or left with an older value");
    assert_eq!(store.len(), KEYS as usize);
    assert_eq!(store.shard_count(), 11);
    Ok(())
}

#[test]
fn v2_written_after_resize_wins() -> anyhow::Result<()> {
    let store: Store<Uuid, &'static str> = Store::new(StoreConfig {
        shard_count: 8,
        ..Default::default()
    })?;
    let key = Uuid::new_v4();

    store.set(key, "v1")?;
    store.resize(13)?;
    store.set(key, "v2")?;
    store.resize(3)?;

    assert_eq!(store.get(&key), Ok("v2"));
    Ok(())
}

#[test]
fn raw_spinlock_excludes_writers() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 10_000;

    let lock = Arc::new(Spinlock::new(8, 2));
    let inside = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|n| {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let total = Arc::clone(&total);
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    if n % 2 == 0 {
                        lock.lock();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        total.fetch_add(1, Ordering::Relaxed);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        lock.unlock();
                    } else {
                        lock.read_lock();
                        assert_eq!(inside.load(Ordering::SeqCst), 0);
                        lock.read_unlock();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread panicked");
    }

    assert_eq!(total.load(Ordering::Relaxed), THREADS / 2 * ROUNDS);
    assert!(!lock.is_locked());
    assert_eq!(lock.reader_count(), 0);
}

#[test]
fn idempotency_full_flow() -> anyhow::Result<()> {
    init_tracing();

    let cache = Arc::new(IdempotencyCache::new(IdempotencyConfig::default())?);
    let key = Uuid::new_v4();
    let barrier = Arc::new(Barrier::new(2));

    // Two concurrent requests with the same key
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.lock(key)
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.contains(&Err(IdempotencyError::LockExists)));

    // The winner fails and releases the slot
    assert!(cache.unlock(key));
    cache.lock(key)?;
    cache.save(key, Bytes::from_static(b"{\"status\":\"paid\"}"))?;

    assert_eq!(cache.lock(key), Err(IdempotencyError::LockExistsSaved));
    assert_eq!(cache.get(key)?, Bytes::from_static(b"{\"status\":\"paid\"}"));
    Ok(())
}
