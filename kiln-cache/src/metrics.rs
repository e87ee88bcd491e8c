//! # Client Metrics
//!
//! Purpose: Provide lightweight counters and a latency histogram so hit
//! rate, retry pressure, and tail latency of cache operations can be
//! observed without touching the hot path.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Atomic counters aggregate events cheaply.
//! 2. **Fixed Buckets**: Histogram buckets live in a contiguous array.
//! 3. **Zero-Cost Access**: Snapshots are plain serializable structs.
//! 4. **Init-Once Registry**: The process-wide instance is created on first
//!    use and only ever appended to afterwards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use serde::Serialize;

/// Default latency bucket boundaries in microseconds.
///
/// Coarse on purpose; cache round trips sit in the hundreds of
/// microseconds to tens of milliseconds under load.
pub const DEFAULT_LATENCY_BUCKETS_US: [u64; 12] = [
    100, 250, 500, 1_000, 2_500, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000, 1_000_000,
];

static GLOBAL: OnceLock<Metrics> = OnceLock::new();

/// Snapshot of all client metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Total GET operations issued.
    pub gets: u64,
    /// Total PUT operations issued.
    pub puts: u64,
    /// GETs that returned a value.
    pub hits: u64,
    /// GETs that returned no value.
    pub misses: u64,
    /// Operations that surfaced a fatal error.
    pub errors: u64,
    /// Transient failures absorbed by the retry loop.
    pub retries: u64,
    /// Admission waits that crossed the slow threshold.
    pub slow_waits: u64,
    /// Operations currently in flight.
    pub inflight: u64,
    /// Latency histogram snapshot.
    pub latency: LatencySnapshot,
}

/// Snapshot of the latency histogram.
#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    /// Bucket boundaries in microseconds.
    pub bounds_us: Vec<u64>,
    /// Bucket counts, including the overflow bucket at the end.
    pub buckets: Vec<u64>,
    /// Total number of samples.
    pub samples: u64,
    /// Sum of latencies in microseconds.
    pub sum_us: u64,
}

/// Thread-safe metrics aggregator for the cache client.
///
/// All record calls are zero-allocation. `Ordering::Relaxed` is sufficient:
/// no cross-field ordering is required, only eventual consistency.
pub struct Metrics {
    gets: AtomicU64,
    puts: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
    slow_waits: AtomicU64,
    inflight: AtomicU64,
    latency: LatencyHistogram,
}

impl Metrics {
    /// Creates an aggregator with the default latency buckets.
    pub fn new() -> Self {
        Metrics {
            gets: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            slow_waits: AtomicU64::new(0),
            inflight: AtomicU64::new(0),
            latency: LatencyHistogram::new(DEFAULT_LATENCY_BUCKETS_US.to_vec()),
        }
    }

    /// Returns the process-wide registry, created on first use.
    pub fn global() -> &'static Metrics {
        GLOBAL.get_or_init(Metrics::new)
    }

    /// Records the start of a GET.
    pub fn record_get_start(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.inflight.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the start of a PUT.
    pub fn record_put_start(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.inflight.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the end of an operation and its latency.
    pub fn record_op_end(&self, latency: Duration) {
        self.inflight.fetch_sub(1, Ordering::Relaxed);
        self.latency.record(latency);
    }

    /// Records a GET that found its key.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a GET miss.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a fatal error surfaced to the caller.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records transient failures absorbed before an operation settled.
    pub fn record_retries(&self, count: u64) {
        self.retries.fetch_add(count, Ordering::Relaxed);
    }

    /// Records an admission wait that crossed the slow threshold.
    pub fn record_slow_wait(&self) {
        self.slow_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of all counters and buckets.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            slow_waits: self.slow_waits.load(Ordering::Relaxed),
            inflight: self.inflight.load(Ordering::Relaxed),
            latency: self.latency.snapshot(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

/// Fixed-bucket latency histogram.
struct LatencyHistogram {
    bounds_us: Vec<u64>,
    // One extra overflow bucket at the end.
    buckets: Vec<AtomicU64>,
    samples: AtomicU64,
    sum_us: AtomicU64,
}

impl LatencyHistogram {
    fn new(bounds_us: Vec<u64>) -> Self {
        let buckets = (0..=bounds_us.len()).map(|_| AtomicU64::new(0)).collect();
        LatencyHistogram {
            bounds_us,
            buckets,
            samples: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
        }
    }

    fn record(&self, latency: Duration) {
        let us = latency.as_micros().min(u128::from(u64::MAX)) as u64;
        let idx = self
            .bounds_us
            .iter()
            .position(|bound| us <= *bound)
            .unwrap_or(self.bounds_us.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(us, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            bounds_us: self.bounds_us.clone(),
            buckets: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            samples: self.samples.load(Ordering::Relaxed),
            sum_us: self.sum_us.load(Ordering::Relaxed),
        }
    }
}
