//! Time sources and spin-wait primitives
//!
//! Every injected delay is a busy spin on a monotonic source. Sleeping would
//! undershoot at microsecond scale because of scheduler granularity, so the
//! calling thread is held for the full configured duration.
//!
//! Stages take an `Arc<dyn TimeSource>`; tests swap in [`StepClock`], which
//! advances by a fixed step per read so spins terminate after a predictable
//! number of iterations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Monotonic clock and free-running cycle counter
pub trait TimeSource: Send + Sync {
    /// Monotonic nanoseconds since an arbitrary epoch
    fn now_nanos(&self) -> u64;

    /// Current value of the cycle counter
    fn cycles(&self) -> u64;

    /// Cycle counter frequency
    fn cycles_hz(&self) -> u64;

    /// Spin until at least `delay` of wall-clock time has elapsed.
    /// Returns the measured elapsed time.
    #[inline]
    fn spin_for(&self, delay: Duration) -> Duration {
        let target = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        let start = self.now_nanos();
        loop {
            let elapsed = self.now_nanos().saturating_sub(start);
            if elapsed >= target {
                return Duration::from_nanos(elapsed);
            }
            std::hint::spin_loop();
        }
    }

    /// Spin on the cycle counter until at least `delay_ns` nanoseconds worth
    /// of cycles have elapsed at the counter's frequency. Returns the elapsed
    /// cycle count.
    #[inline]
    fn spin_cycles(&self, delay_ns: u64) -> u64 {
        self.spin_cycles_from(self.cycles(), delay_ns)
    }

    /// As [`spin_cycles`](TimeSource::spin_cycles), measured from a cycle
    /// count taken earlier by the caller.
    #[inline]
    fn spin_cycles_from(&self, start: u64, delay_ns: u64) -> u64 {
        let hz = self.cycles_hz() as u128;
        let budget = delay_ns as u128 * hz;
        loop {
            let elapsed = self.cycles().wrapping_sub(start);
            if elapsed as u128 * NANOS_PER_SEC >= budget {
                return elapsed;
            }
            std::hint::spin_loop();
        }
    }
}

/// Convert a cycle count to nanoseconds at `hz`
pub fn cycles_to_nanos(cycles: u64, hz: u64) -> u64 {
    if hz == 0 {
        return 0;
    }
    u64::try_from(cycles as u128 * NANOS_PER_SEC / hz as u128).unwrap_or(u64::MAX)
}

fn process_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn read_cycle_counter() -> u64 {
    // SAFETY: rdtsc has no preconditions on x86_64
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
fn read_cycle_counter() -> u64 {
    process_epoch().elapsed().as_nanos() as u64
}

#[cfg(target_arch = "x86_64")]
fn calibrate_hz() -> u64 {
    const WINDOW: Duration = Duration::from_millis(10);
    let start = Instant::now();
    let c0 = read_cycle_counter();
    while start.elapsed() < WINDOW {
        std::hint::spin_loop();
    }
    let c1 = read_cycle_counter();
    let elapsed = start.elapsed().as_nanos().max(1);
    let hz = (c1.wrapping_sub(c0) as u128 * NANOS_PER_SEC / elapsed) as u64;
    tracing::debug!(hz, "calibrated cycle counter");
    hz.max(1)
}

#[cfg(not(target_arch = "x86_64"))]
fn calibrate_hz() -> u64 {
    NANOS_PER_SEC as u64
}

/// Real clock: `Instant` for nanoseconds, `rdtsc` for cycles on x86_64.
///
/// Frequency calibration runs once per process on first use.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    /// Create the clock, running calibration eagerly so the first packet
    /// does not pay for it.
    pub fn new() -> Self {
        let _ = Self.cycles_hz();
        Self
    }
}

impl TimeSource for MonotonicClock {
    #[inline(always)]
    fn now_nanos(&self) -> u64 {
        process_epoch().elapsed().as_nanos() as u64
    }

    #[inline(always)]
    fn cycles(&self) -> u64 {
        read_cycle_counter()
    }

    fn cycles_hz(&self) -> u64 {
        static HZ: OnceLock<u64> = OnceLock::new();
        *HZ.get_or_init(calibrate_hz)
    }
}

/// Deterministic clock for tests. Each read of either counter advances it by
/// `step`; the cycle counter runs at 1 GHz so cycles equal nanoseconds.
#[derive(Debug)]
pub struct StepClock {
    ticks: AtomicU64,
    step: u64,
}

impl StepClock {
    /// Create a clock that advances `step` per read
    pub fn new(step: u64) -> Self {
        Self { ticks: AtomicU64::new(0), step }
    }

    /// Number of nanoseconds the clock has advanced so far
    pub fn elapsed(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    #[inline]
    fn tick(&self) -> u64 {
        self.ticks.fetch_add(self.step, Ordering::Relaxed)
    }
}

impl TimeSource for StepClock {
    fn now_nanos(&self) -> u64 {
        self.tick()
    }

    fn cycles(&self) -> u64 {
        self.tick()
    }

    fn cycles_hz(&self) -> u64 {
        NANOS_PER_SEC as u64
    }
}
