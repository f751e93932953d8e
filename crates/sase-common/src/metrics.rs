//! Lock-free latency accounting for per-stage processing cost
//!
//! Stage delays range from zero (pure byte merge) to milliseconds (large
//! configured spins), so buckets are spaced roughly by decade in nanoseconds.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bound (inclusive, nanoseconds) of each bucket except the last
const BUCKET_LIMITS_NS: [u64; 9] = [
    100,
    500,
    1_000,
    5_000,
    10_000,
    50_000,
    100_000,
    1_000_000,
    10_000_000,
];

const NUM_BUCKETS: usize = BUCKET_LIMITS_NS.len() + 1;

/// Lock-free histogram for per-packet stage cost
#[derive(Debug)]
pub struct LatencyHistogram {
    /// Buckets: <=100ns, <=500ns, <=1us, <=5us, <=10us, <=50us, <=100us, <=1ms, <=10ms, >10ms
    buckets: [AtomicU64; NUM_BUCKETS],
    count: AtomicU64,
    sum_ns: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl LatencyHistogram {
    /// Create new histogram
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            buckets: [ZERO; NUM_BUCKETS],
            count: AtomicU64::new(0),
            sum_ns: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    fn bucket_for(latency_ns: u64) -> usize {
        BUCKET_LIMITS_NS
            .iter()
            .position(|&limit| latency_ns <= limit)
            .unwrap_or(NUM_BUCKETS - 1)
    }

    /// Record a latency value in nanoseconds
    #[inline(always)]
    pub fn record(&self, latency_ns: u64) {
        self.buckets[Self::bucket_for(latency_ns)].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ns.fetch_add(latency_ns, Ordering::Relaxed);
        self.min_ns.fetch_min(latency_ns, Ordering::Relaxed);
        self.max_ns.fetch_max(latency_ns, Ordering::Relaxed);
    }

    /// Number of recorded samples
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean latency in nanoseconds
    pub fn average(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.sum_ns.load(Ordering::Relaxed) as f64 / count as f64
    }

    /// Approximate percentile, reported as the upper limit of the matching bucket.
    /// The overflow bucket reports the observed maximum.
    pub fn percentile(&self, p: f64) -> u64 {
        let count = self.count();
        if count == 0 {
            return 0;
        }
        let target = ((count as f64) * p).ceil().max(1.0) as u64;
        let mut cumulative = 0u64;

        for (i, bucket) in self.buckets.iter().enumerate() {
            cumulative += bucket.load(Ordering::Relaxed);
            if cumulative >= target {
                return BUCKET_LIMITS_NS
                    .get(i)
                    .copied()
                    .unwrap_or_else(|| self.max_ns.load(Ordering::Relaxed));
            }
        }

        self.max_ns.load(Ordering::Relaxed)
    }

    /// Get snapshot
    pub fn snapshot(&self) -> LatencySnapshot {
        let count = self.count();
        let min = self.min_ns.load(Ordering::Relaxed);
        LatencySnapshot {
            count,
            sum_ns: self.sum_ns.load(Ordering::Relaxed),
            min_ns: if count == 0 { 0 } else { min },
            max_ns: self.max_ns.load(Ordering::Relaxed),
            p50_ns: self.percentile(0.50),
            p90_ns: self.percentile(0.90),
            p99_ns: self.percentile(0.99),
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Histogram snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LatencySnapshot {
    /// Samples recorded
    pub count: u64,
    /// Sum of all samples
    pub sum_ns: u64,
    /// Smallest sample (0 when empty)
    pub min_ns: u64,
    /// Largest sample
    pub max_ns: u64,
    /// Approximate median
    pub p50_ns: u64,
    /// Approximate 90th percentile
    pub p90_ns: u64,
    /// Approximate 99th percentile
    pub p99_ns: u64,
}

impl LatencySnapshot {
    /// Merge another snapshot into this one. Percentiles keep the worse value.
    pub fn merge(&mut self, other: &LatencySnapshot) {
        if other.count == 0 {
            return;
        }
        self.min_ns = if self.count == 0 { other.min_ns } else { self.min_ns.min(other.min_ns) };
        self.count += other.count;
        self.sum_ns += other.sum_ns;
        self.max_ns = self.max_ns.max(other.max_ns);
        self.p50_ns = self.p50_ns.max(other.p50_ns);
        self.p90_ns = self.p90_ns.max(other.p90_ns);
        self.p99_ns = self.p99_ns.max(other.p99_ns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let h = LatencyHistogram::new();

        h.record(50);
        h.record(400);
        h.record(2_000);
        h.record(40_000);
        h.record(20_000_000);

        assert_eq!(h.count(), 5);
        assert!(h.average() > 0.0);

        let snap = h.snapshot();
        assert_eq!(snap.min_ns, 50);
        assert_eq!(snap.max_ns, 20_000_000);
        assert_eq!(snap.p50_ns, 5_000);
        assert_eq!(snap.p99_ns, 20_000_000);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = LatencyHistogram::new().snapshot();
        assert_eq!(snap, LatencySnapshot::default());
    }

    #[test]
    fn test_merge_keeps_extremes() {
        let a = LatencyHistogram::new();
        a.record(200);
        let b = LatencyHistogram::new();
        b.record(100);
        b.record(9_000);

        let mut merged = a.snapshot();
        merged.merge(&b.snapshot());
        assert_eq!(merged.count, 3);
        assert_eq!(merged.min_ns, 100);
        assert_eq!(merged.max_ns, 9_000);
        assert_eq!(merged.sum_ns, 9_300);
    }
}
