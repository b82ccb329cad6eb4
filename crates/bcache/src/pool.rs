//! The free pool: every unreferenced slot, oldest release first.
//!
//! One lock guards the heap and the logical clock. Misses that find the
//! pool empty park on a condition variable until a release inserts a slot.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::heap::{FreeEntry, FreeHeap};
use crate::slot::SlotId;

struct PoolState {
    heap: FreeHeap,
    /// Last stamp handed out
    clock: u64,
}

pub(crate) struct FreePool {
    state: Mutex<PoolState>,
    available: Condvar,
    exhaustion_timeout: Option<Duration>,
}

impl FreePool {
    /// Pool holding every slot of an `n`-slot arena, all stamped 0
    pub fn full(n: usize, exhaustion_timeout: Option<Duration>) -> Self {
        let mut heap = FreeHeap::with_capacity(n);
        for i in 0..n {
            heap.insert(FreeEntry {
                stamp: 0,
                slot: SlotId::new(i as u32),
            });
        }
        Self {
            state: Mutex::new(PoolState { heap, clock: 0 }),
            available: Condvar::new(),
            exhaustion_timeout,
        }
    }

    /// Take the least recently released slot, waiting while none is free.
    ///
    /// Returns the entry and whether the caller had to wait.
    ///
    /// # Panics
    /// If an exhaustion timeout is configured and no slot frees up in time.
    pub fn take(&self) -> (FreeEntry, bool) {
        let mut state = self.state.lock();
        let waited = state.heap.is_empty();
        if waited {
            warn!("free pool empty, waiting for a release");
            let deadline = self.exhaustion_timeout.map(|t| Instant::now() + t);
            while state.heap.is_empty() {
                match deadline {
                    Some(deadline) => {
                        let result = self.available.wait_until(&mut state, deadline);
                        if result.timed_out() && state.heap.is_empty() {
                            panic!("bcache: no buffers");
                        }
                    }
                    None => self.available.wait(&mut state),
                }
            }
        }
        (state.heap.extract_min(), waited)
    }

    /// Insert a newly unreferenced slot stamped with the next clock value
    pub fn release(&self, slot: SlotId) -> u64 {
        let mut state = self.state.lock();
        state.clock += 1;
        let stamp = state.clock;
        state.heap.insert(FreeEntry { stamp, slot });
        self.available.notify_one();
        stamp
    }

    /// Return an entry taken but never used, keeping its stamp
    pub fn restore(&self, entry: FreeEntry) {
        self.state.lock().heap.insert(entry);
        self.available.notify_one();
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Copy of the free entries, in heap order
    pub fn entries(&self) -> Vec<FreeEntry> {
        self.state.lock().heap.iter().copied().collect()
    }
}
