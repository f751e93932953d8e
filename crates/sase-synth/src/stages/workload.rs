//! Memory-access workload
//!
//! Per packet, performs `accesses` pseudo-random 4-byte reads, each from the
//! packet or from a private random-filled array, and folds every word read
//! through `work_multiplier * 100` XORs. The access chain is data-dependent:
//! the next position is mixed from the word just read, so reads cannot be
//! issued ahead of time and the cost tracks cache behaviour.
//!
//! Packet content is never modified.

use crate::buffer::Packet;
use crate::config::ConfigError;
use crate::pipeline::{DropReason, Stage};
use crate::traffic::HEADER_READ_LEN;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Workload parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadSpec {
    /// Private array size in bytes
    pub array_bytes: usize,
    /// Reads per packet
    pub accesses: u32,
    /// Share of reads that hit the packet rather than the array, 0..=100
    pub packet_read_percent: u32,
    /// Read anywhere in the packet instead of the first `HEADER_READ_LEN` bytes
    pub use_payload: bool,
    /// XOR repetitions per read, in hundreds
    pub work_multiplier: u32,
}

impl WorkloadSpec {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.packet_read_percent > 100 {
            return Err(ConfigError::PercentOutOfRange(self.packet_read_percent));
        }
        if self.array_bytes < 4 && self.packet_read_percent < 100 {
            return Err(ConfigError::EmptyWorkloadArray);
        }
        Ok(())
    }
}

/// Scale a 32-bit random value into `[0, n)` by division, so high bits pick
/// the slot. `n == 0` maps to 0.
#[inline(always)]
fn scale(r: u32, n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let n = n.min(u32::MAX as usize) as u64;
    (r as u64 / (u32::MAX as u64 / n + 1)) as usize
}

/// Next chain value from the word just read
#[inline(always)]
pub fn mix(word: u32, r: u32) -> u32 {
    word ^ (r << 24 ^ r << 16 ^ r << 8 ^ r >> 16)
}

/// 4-byte native-order read at `pos`, zero-padded past the end of `data`
#[inline(always)]
fn read_word(data: &[u8], pos: usize) -> u32 {
    match data.get(pos..pos + 4) {
        Some(w) => u32::from_ne_bytes([w[0], w[1], w[2], w[3]]),
        None => {
            let mut w = [0u8; 4];
            let tail = data.get(pos..).unwrap_or(&[]);
            w[..tail.len()].copy_from_slice(tail);
            u32::from_ne_bytes(w)
        }
    }
}

/// Simulated per-packet memory and CPU work; packets pass through untouched
pub struct MemoryWorkload {
    spec: WorkloadSpec,
    array: Arc<[u32]>,
    rng: StdRng,
    seed: Option<u64>,
    replicas: AtomicU64,
}

impl MemoryWorkload {
    /// Allocate and fill the private array. With `seed` the array and the
    /// per-packet draws are reproducible; otherwise they come from OS entropy.
    pub fn new(spec: WorkloadSpec, seed: Option<u64>) -> Result<Self, ConfigError> {
        spec.validate()?;
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let words = spec.array_bytes / std::mem::size_of::<u32>();
        let mut array: Vec<u32> = Vec::new();
        array
            .try_reserve_exact(words)
            .map_err(|_| ConfigError::ArrayTooLarge(spec.array_bytes / (1024 * 1024)))?;
        array.resize(words, 0);
        rng.fill(&mut array[..]);
        tracing::debug!(words = array.len(), "workload array initialised");

        Ok(Self {
            spec,
            array: array.into(),
            rng,
            seed,
            replicas: AtomicU64::new(0),
        })
    }

    /// Configured parameters
    pub fn spec(&self) -> &WorkloadSpec {
        &self.spec
    }

    /// Array length in words
    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    /// Run the access chain over `data` starting from `r`. Returns the XOR
    /// fold, which callers must consume.
    #[inline]
    pub fn simulate(&self, data: &[u8], mut r: u32) -> u32 {
        let window = if self.spec.use_payload {
            data.len()
        } else {
            HEADER_READ_LEN.min(data.len())
        };
        // Start positions whose 4-byte read stays inside the window
        let positions = window.saturating_sub(3);
        let reps = self.spec.work_multiplier.saturating_mul(100);
        let mut sum = 0u32;

        for _ in 0..self.spec.accesses {
            let word = if (scale(r, 101) as u32) < self.spec.packet_read_percent {
                read_word(data, scale(r, positions))
            } else {
                self.array.get(scale(r, self.array.len())).copied().unwrap_or(0)
            };
            for _ in 0..reps {
                sum = black_box(sum ^ word);
            }
            r = mix(word, r);
        }
        sum
    }
}

impl Stage for MemoryWorkload {
    fn process(&mut self, pkt: Packet) -> Result<Packet, DropReason> {
        let r = self.rng.next_u32();
        black_box(self.simulate(pkt.data(), r));
        Ok(pkt)
    }

    fn name(&self) -> &'static str {
        "memory-workload"
    }

    fn replicate(&self) -> Box<dyn Stage> {
        let n = self.replicas.fetch_add(1, Ordering::Relaxed) + 1;
        let rng = match self.seed {
            Some(s) => StdRng::seed_from_u64(s.wrapping_add(n)),
            None => StdRng::from_entropy(),
        };
        Box::new(Self {
            spec: self.spec,
            array: self.array.clone(),
            rng,
            seed: self.seed.map(|s| s.wrapping_add(n)),
            replicas: AtomicU64::new(0),
        })
    }
}
