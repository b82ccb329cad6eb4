//! bcstress - concurrent workload driver for bcache

mod workload;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use bcache::{BufferCache, CacheConfig, DEFAULT_BUCKETS, DEFAULT_SLOTS};
use blockdev::{BlockDevice, FileDisk, MemDisk};
use clap::Parser;
use tracing::info;

use crate::workload::{Report, WorkloadConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of buffer slots
    #[arg(short, long, default_value_t = DEFAULT_SLOTS)]
    slots: usize,

    /// Number of hash buckets
    #[arg(long, default_value_t = DEFAULT_BUCKETS)]
    buckets: usize,

    /// Worker threads
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Increments per worker
    #[arg(short = 'n', long, default_value_t = 10_000)]
    ops: usize,

    /// Number of distinct blocks touched
    #[arg(short, long, default_value_t = 64)]
    blocks: u32,

    /// Disk image (created if missing); in-memory device when omitted
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Device id
    #[arg(long, default_value_t = 1)]
    dev: u32,

    /// Chance (0-100) that an increment leaves its block pinned
    #[arg(long, default_value_t = 10)]
    pin_percent: u8,

    /// RNG seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Panic if a miss waits this long (ms) for a free slot
    #[arg(long)]
    exhaustion_timeout_ms: Option<u64>,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!("Starting bcstress v{}", env!("CARGO_PKG_VERSION"));
    info!("Slots: {}, buckets: {}", args.slots, args.buckets);
    info!("Workers: {} x {} ops over {} blocks", args.threads, args.ops, args.blocks);

    let mut config = CacheConfig::new(args.slots).with_buckets(args.buckets);
    if let Some(ms) = args.exhaustion_timeout_ms {
        config = config.with_exhaustion_timeout(Duration::from_millis(ms));
    }

    let workload = WorkloadConfig {
        threads: args.threads,
        ops_per_thread: args.ops,
        blocks: args.blocks,
        dev: args.dev,
        pin_percent: args.pin_percent,
        seed: args.seed,
    };
    workload.validate(config.slots)?;

    match &args.image {
        Some(path) => {
            let disk = if path.exists() {
                info!("Opening image {}", path.display());
                FileDisk::open(path)?
            } else {
                info!("Creating image {}", path.display());
                FileDisk::create(path, args.dev, args.blocks)?
            };
            if disk.dev() != args.dev {
                bail!("image serves device {}, not {}", disk.dev(), args.dev);
            }
            if disk.nblocks() < args.blocks {
                bail!("image has {} blocks, workload needs {}", disk.nblocks(), args.blocks);
            }

            let cache = BufferCache::new(disk, config);
            let report = workload::run(&cache, &workload)?;
            log_report(&cache, &report);

            let mut disk = cache.into_device();
            disk.close()?;
        }
        None => {
            let cache = BufferCache::new(MemDisk::new(), config);
            let report = workload::run(&cache, &workload)?;
            log_report(&cache, &report);
        }
    }

    Ok(())
}

fn log_report<D: BlockDevice>(cache: &BufferCache<D>, report: &Report) {
    let stats = cache.stats();

    info!(
        "Verified {} increments in {:.2?} ({:.0} ops/sec), {} pins",
        report.ops,
        report.elapsed,
        report.throughput(),
        report.pins
    );
    info!(
        "Hits: {}, misses: {}, hit ratio: {:.1}%",
        stats.hits(),
        stats.misses(),
        stats.hit_ratio() * 100.0
    );
    info!(
        "Evictions: {}, device reads: {}, device writes: {}",
        stats.evictions(),
        stats.reads(),
        stats.writes()
    );
    info!("Pool waits: {}, insert races: {}", stats.pool_waits(), stats.races());
}
