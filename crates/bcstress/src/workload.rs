//! Concurrent counter workload
//!
//! Every block holds a little-endian `u64` counter in its first eight bytes.
//! Workers pick blocks at random, increment the counter, and store the
//! block. Afterwards each counter must have grown by exactly the number of
//! increments applied to it.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use bcache::BufferCache;
use blockdev::{BlockDevice, BlockNo, DeviceId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

/// Workload parameters
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Worker threads
    pub threads: usize,
    /// Increments per worker
    pub ops_per_thread: usize,
    /// Blocks `0..blocks` are touched
    pub blocks: u32,
    /// Device id to run against
    pub dev: DeviceId,
    /// Chance (0-100) that an increment leaves the block pinned
    pub pin_percent: u8,
    /// Base RNG seed; worker `t` uses `seed + t`
    pub seed: u64,
}

impl WorkloadConfig {
    /// Slots needed so workers can never exhaust the pool: one held buffer
    /// per worker, plus one pin each when pinning is enabled
    pub fn min_slots(&self) -> usize {
        if self.pin_percent > 0 {
            self.threads * 2
        } else {
            self.threads
        }
    }

    /// Reject parameter combinations that cannot run
    pub fn validate(&self, slots: usize) -> Result<()> {
        if self.threads == 0 {
            bail!("at least one worker thread is required");
        }
        if self.blocks == 0 {
            bail!("at least one block is required");
        }
        if self.pin_percent > 100 {
            bail!("pin percentage {} exceeds 100", self.pin_percent);
        }
        if slots < self.min_slots() {
            bail!(
                "{} slots cannot serve {} workers (need at least {})",
                slots,
                self.threads,
                self.min_slots()
            );
        }
        Ok(())
    }
}

/// Outcome of a verified run
#[derive(Debug, Clone)]
pub struct Report {
    /// Increments performed
    pub ops: u64,
    /// Pins taken
    pub pins: u64,
    /// Wall time of the concurrent phase
    pub elapsed: Duration,
}

impl Report {
    /// Increments per second
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.ops as f64 / secs
        }
    }
}

struct WorkerOutcome {
    increments: Vec<u64>,
    pins: u64,
}

/// Run the workload and verify every counter afterwards
pub fn run<D: BlockDevice>(cache: &BufferCache<D>, config: &WorkloadConfig) -> Result<Report> {
    config.validate(cache.capacity())?;

    let baseline = read_counters(cache, config)?;
    info!(
        threads = config.threads,
        ops = config.ops_per_thread,
        blocks = config.blocks,
        "starting workload"
    );

    let start = Instant::now();
    let outcomes = thread::scope(|s| {
        let handles: Vec<_> = (0..config.threads)
            .map(|t| s.spawn(move || worker(cache, config, t)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| anyhow!("worker panicked"))?)
            .collect::<Result<Vec<_>>>()
    })?;
    let elapsed = start.elapsed();

    let mut expected = baseline;
    let mut pins = 0;
    for outcome in &outcomes {
        pins += outcome.pins;
        for (total, n) in expected.iter_mut().zip(&outcome.increments) {
            *total += n;
        }
    }

    let actual = read_counters(cache, config)?;
    for (blockno, (want, got)) in expected.iter().zip(&actual).enumerate() {
        if want != got {
            bail!("block {} counter is {}, expected {}", blockno, got, want);
        }
    }

    cache
        .audit()
        .check()
        .context("cache invariant violated")?;

    Ok(Report {
        ops: (config.threads * config.ops_per_thread) as u64,
        pins,
        elapsed,
    })
}

fn worker<D: BlockDevice>(
    cache: &BufferCache<D>,
    config: &WorkloadConfig,
    id: usize,
) -> Result<WorkerOutcome> {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(id as u64));
    let mut increments = vec![0u64; config.blocks as usize];
    let mut pin = None;
    let mut pins = 0;

    for _ in 0..config.ops_per_thread {
        let blockno: BlockNo = rng.gen_range(0..config.blocks);

        let mut buf = cache
            .read(config.dev, blockno)
            .with_context(|| format!("reading block {}", blockno))?;
        let count = counter(buf.data());
        buf.data_mut()[..8].copy_from_slice(&(count + 1).to_le_bytes());
        buf.store()
            .with_context(|| format!("writing block {}", blockno))?;
        increments[blockno as usize] += 1;

        // replacing the previous pin drops it
        if rng.gen_ratio(config.pin_percent as u32, 100) {
            pin = Some(buf.pin());
            pins += 1;
        }
    }
    drop(pin);

    debug!(worker = id, pins, "worker done");
    Ok(WorkerOutcome { increments, pins })
}

fn read_counters<D: BlockDevice>(
    cache: &BufferCache<D>,
    config: &WorkloadConfig,
) -> Result<Vec<u64>> {
    (0..config.blocks)
        .map(|blockno| {
            let buf = cache
                .read(config.dev, blockno)
                .with_context(|| format!("reading block {}", blockno))?;
            Ok(counter(buf.data()))
        })
        .collect()
}

fn counter(data: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[..8]);
    u64::from_le_bytes(bytes)
}
