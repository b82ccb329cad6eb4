//! Multi-threaded behaviour of the cache.

use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use bcache::{BufferCache, CacheConfig};
use blockdev::MemDisk;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn mem_cache(slots: usize) -> BufferCache<MemDisk> {
    BufferCache::new(MemDisk::new(), CacheConfig::new(slots))
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn test_waiters_hold_references() {
    const HOLDERS: u32 = 6;
    let cache = mem_cache(4);

    let first = cache.read(1, 7).unwrap();
    thread::scope(|s| {
        for _ in 1..HOLDERS {
            s.spawn(|| {
                let mut buf = cache.read(1, 7).unwrap();
                buf.data_mut()[0] += 1;
                buf.store().unwrap();
            });
        }

        // every waiter has taken its reference before blocking on the lock
        assert!(wait_for(|| cache.ref_count(1, 7) == Some(HOLDERS)));
        assert_eq!(cache.active_count(), 1);
        drop(first);
    });

    assert_eq!(cache.ref_count(1, 7), None);
    assert_eq!(cache.device().peek(1, 7)[0] as u32, HOLDERS - 1);
    cache.audit().check().unwrap();
}

#[test]
fn test_concurrent_misses_converge() {
    const THREADS: usize = 8;
    let cache = mem_cache(THREADS);
    let barrier = Barrier::new(THREADS);

    let slots: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    let buf = cache.acquire(1, 42);
                    let slot = buf.slot();
                    let pin = buf.pin();
                    drop(buf);
                    // keep the block referenced until everyone has looked
                    barrier.wait();
                    pin.unpin();
                    slot
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(slots.windows(2).all(|w| w[0] == w[1]));
    let stats = cache.stats();
    assert_eq!(stats.hits() + stats.misses(), THREADS as u64);
    assert_eq!(stats.misses() - stats.races(), 1);

    let audit = cache.audit();
    audit.check().unwrap();
    assert_eq!(audit.free_count(), THREADS);
}

#[test]
fn test_miss_waits_for_free_slot() {
    let cache = mem_cache(1);

    let held = cache.acquire(1, 1);
    let held_slot = held.slot();
    thread::scope(|s| {
        let waiter = s.spawn(|| {
            let buf = cache.acquire(1, 2);
            buf.slot()
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        drop(held);

        assert_eq!(waiter.join().unwrap(), held_slot);
    });

    assert!(!cache.is_resident(1, 1));
    assert_eq!(cache.free_count(), 1);
}

#[test]
#[should_panic(expected = "bcache: no buffers")]
fn test_exhausted_pool_panics_with_timeout() {
    let cache = BufferCache::new(
        MemDisk::new(),
        CacheConfig::new(1).with_exhaustion_timeout(Duration::from_millis(20)),
    );

    let _held = cache.acquire(1, 1);
    cache.acquire(1, 2);
}

#[test]
fn test_counter_stress() {
    const THREADS: usize = 8;
    const OPS: usize = 400;
    const BLOCKS: u32 = 32;

    // one guard plus one pin per thread at most
    let cache = mem_cache(THREADS * 2);

    thread::scope(|s| {
        for t in 0..THREADS {
            let cache = &cache;
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(t as u64);
                let mut pin = None;
                for _ in 0..OPS {
                    let blockno = rng.gen_range(0..BLOCKS);

                    let mut buf = cache.read(1, blockno).unwrap();
                    let data = buf.data_mut();
                    let count = u64::from_le_bytes(data[..8].try_into().unwrap());
                    data[..8].copy_from_slice(&(count + 1).to_le_bytes());
                    buf.store().unwrap();

                    if rng.gen_ratio(1, 5) {
                        pin = Some(buf.pin());
                    } else if rng.gen_ratio(1, 7) {
                        pin = None;
                    }
                }
                drop(pin);
            });
        }
    });

    let total: u64 = (0..BLOCKS)
        .map(|b| u64::from_le_bytes(cache.device().peek(1, b)[..8].try_into().unwrap()))
        .sum();
    assert_eq!(total, (THREADS * OPS) as u64);

    let audit = cache.audit();
    audit.check().unwrap();
    assert_eq!(audit.free_count(), THREADS * 2);
    assert_eq!(cache.active_count(), 0);
}
