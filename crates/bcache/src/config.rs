//! Cache configuration

use std::time::Duration;

/// Default number of buffer slots
pub const DEFAULT_SLOTS: usize = 30;

/// Default number of hash buckets
pub const DEFAULT_BUCKETS: usize = 13;

/// Sizing and policy fixed at cache construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Number of buffer slots (N)
    pub slots: usize,

    /// Number of hash buckets
    pub buckets: usize,

    /// How long a miss may wait on an empty free pool before the cache
    /// panics; `None` waits forever
    pub exhaustion_timeout: Option<Duration>,
}

impl CacheConfig {
    /// Configuration with `slots` slots and default buckets
    pub fn new(slots: usize) -> Self {
        Self {
            slots,
            ..Self::default()
        }
    }

    /// Set the bucket count
    pub fn with_buckets(mut self, buckets: usize) -> Self {
        self.buckets = buckets;
        self
    }

    /// Panic instead of waiting longer than `timeout` for a free slot
    pub fn with_exhaustion_timeout(mut self, timeout: Duration) -> Self {
        self.exhaustion_timeout = Some(timeout);
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            slots: DEFAULT_SLOTS,
            buckets: DEFAULT_BUCKETS,
            exhaustion_timeout: None,
        }
    }
}
