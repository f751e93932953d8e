//! OpenSASE Common - shared primitives for the synthetic load stages
//!
//! This crate provides the lock-free accounting pieces used on the hot path:
//! - Error type shared by the stage crates and the runner binary
//! - Atomic counters for per-stage packet accounting
//! - A nanosecond latency histogram for per-stage cost

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod metrics;

pub use error::*;
pub use metrics::{LatencyHistogram, LatencySnapshot};

use std::sync::atomic::{AtomicU64, Ordering};

/// High-performance counter for lock-free metrics
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create new counter
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Increment and return previous value
    #[inline(always)]
    pub fn inc(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Add value and return previous
    #[inline(always)]
    pub fn add(&self, val: u64) -> u64 {
        self.0.fetch_add(val, Ordering::Relaxed)
    }

    /// Get current value
    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_counter() {
        let counter = AtomicCounter::new(0);
        assert_eq!(counter.inc(), 0);
        assert_eq!(counter.inc(), 1);
        assert_eq!(counter.add(10), 2);
        assert_eq!(counter.get(), 12);
    }
}
