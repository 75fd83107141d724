use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default reservoir capacity.
pub const DEFAULT_DISTRIBUTION_SIZE: usize = 1000;

/// Seed used unless the caller picks one, so sampled percentiles are
/// reproducible across runs.
pub const DEFAULT_DISTRIBUTION_SEED: u64 = 0;

/// Bounded-memory uniform sample of latency values in nanoseconds.
///
/// The first `capacity` samples fill the reservoir in order; past that,
/// each new value replaces a random slot with probability capacity/count
/// (algorithm R). The maximum is tracked exactly on the side.
#[derive(Debug, Clone)]
pub struct Distribution {
    capacity: usize,
    items: Vec<u64>,
    count: u64,
    max: u64,
    rng: StdRng,
}

/// Percentile summary of a `Distribution`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Percentiles {
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub max: u64,
}

impl Distribution {
    pub fn new() -> Self {
        Self::with_capacity_and_seed(DEFAULT_DISTRIBUTION_SIZE, DEFAULT_DISTRIBUTION_SEED)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_capacity_and_seed(DEFAULT_DISTRIBUTION_SIZE, seed)
    }

    pub fn with_capacity_and_seed(capacity: usize, seed: u64) -> Self {
        Self {
            capacity,
            items: Vec::with_capacity(capacity),
            count: 0,
            max: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Total number of values observed, including ones not retained.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sample(&mut self, value: u64) {
        if value > self.max {
            self.max = value;
        }

        self.count += 1;

        if self.items.len() < self.capacity {
            self.items.push(value);
        } else {
            let slot = self.rng.random_range(0..self.count);
            if (slot as usize) < self.items.len() {
                self.items[slot as usize] = value;
            }
        }
    }

    /// p50/p90/p99 over the retained sample plus the exact maximum.
    /// All zeros when nothing has been sampled.
    pub fn percentiles(&self) -> Percentiles {
        if self.items.is_empty() {
            return Percentiles::default();
        }

        let mut items = self.items.clone();
        items.sort_unstable();

        let n = items.len();
        Percentiles {
            p50: items[n * 50 / 100],
            p90: items[n * 90 / 100],
            p99: items[n * 99 / 100],
            max: self.max,
        }
    }
}

impl Default for Distribution {
    fn default() -> Self {
        Self::new()
    }
}
