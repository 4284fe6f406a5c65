//! In-memory watch set and the shared filter it coordinates.
//!
//! The path map is authoritative and exact; the bloom filter is the
//! probabilistic view handed to upstream filtered-sync providers. False
//! positives cost bandwidth, never correctness. False negatives cannot
//! happen locally, only in externally filtered delivery when the upstream
//! filter predates a window extension.

use std::collections::HashMap;

use walletd_keys::KeyPath;
use walletd_primitives::BloomFilter;

const MIN_FILTER_CAPACITY: u32 = 1_024;

pub struct WatchSet {
    paths: HashMap<[u8; 20], KeyPath>,
    filter: BloomFilter,
    rate: f64,
    tweak: u32,
}

impl WatchSet {
    pub fn new(rate: f64, tweak: u32) -> Self {
        Self::with_capacity(MIN_FILTER_CAPACITY, rate, tweak)
    }

    pub fn with_capacity(capacity: u32, rate: f64, tweak: u32) -> Self {
        Self {
            paths: HashMap::new(),
            filter: BloomFilter::new(capacity.max(MIN_FILTER_CAPACITY), rate, tweak),
            rate,
            tweak,
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn contains(&self, key_hash: &[u8; 20]) -> Option<KeyPath> {
        self.paths.get(key_hash).copied()
    }

    pub fn insert(&mut self, key_hash: [u8; 20], path: KeyPath) {
        self.filter.insert(&key_hash);
        self.paths.insert(key_hash, path);
    }

    /// Snapshot of the probabilistic filter for upstream transmission.
    pub fn filter(&self) -> &BloomFilter {
        &self.filter
    }

    /// Drops every watched item and starts over with an empty filter.
    pub fn reset(&mut self) {
        let capacity = (self.paths.len() as u32).max(MIN_FILTER_CAPACITY);
        self.paths.clear();
        self.filter = BloomFilter::new(capacity, self.rate, self.tweak);
    }
}
