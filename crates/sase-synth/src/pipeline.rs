//! Synthetic Cost Pipeline
//!
//! RX → [PayloadMutator | TimestampProbe | MemoryWorkload]* → TX
//!
//! Each stage implements one per-packet operation. [`Element`] wraps a stage
//! with its statistics and exposes both disciplines: `push` for a single
//! packet and `push_batch` for a batch. Both go through the same handler, so
//! a batch of one behaves exactly like a single push.

use crate::batch::PacketBatch;
use crate::buffer::{BufferError, Packet};
use crate::stats::{StageStats, StageStatsSnapshot};
use std::time::Instant;
use thiserror::Error;

/// Why a stage consumed a packet instead of forwarding it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DropReason {
    /// Exclusive access or growth could not be obtained
    #[error("allocation failed: {0}")]
    Allocation(#[from] BufferError),

    /// A fixed-size access would fall outside the packet
    #[error("access needs {needed} bytes, packet has {len}")]
    Bounds {
        /// End of the access
        needed: usize,
        /// Packet length
        len: usize,
    },
}

/// Pipeline stage trait
pub trait Stage: Send {
    /// Per-packet operation. `Err` means the packet is consumed.
    fn process(&mut self, pkt: Packet) -> Result<Packet, DropReason>;

    /// Stable name used in stats, metrics labels and logs
    fn name(&self) -> &'static str;

    /// Independent instance for another worker. Immutable state may be
    /// shared with `self`; mutable state (RNG) must not be.
    fn replicate(&self) -> Box<dyn Stage>;
}

/// A stage plus its accounting
pub struct Element {
    stage: Box<dyn Stage>,
    stats: StageStats,
}

impl Element {
    /// Wrap `stage` with zeroed stats
    pub fn new(stage: Box<dyn Stage>) -> Self {
        Self { stage, stats: StageStats::default() }
    }

    /// Name of the wrapped stage
    pub fn name(&self) -> &'static str {
        self.stage.name()
    }

    #[inline]
    fn handle(&mut self, pkt: Packet) -> Option<Packet> {
        self.stats.record_rx();
        let start = Instant::now();
        let result = self.stage.process(pkt);
        let cost_ns = start.elapsed().as_nanos() as u64;
        let name = self.stage.name();

        match result {
            Ok(pkt) => {
                self.stats.record_tx(pkt.len() as u64, cost_ns);
                metrics::counter!("synth_stage_packets_total", "stage" => name).increment(1);
                tracing::trace!(stage = name, len = pkt.len(), cost_ns, "forward");
                Some(pkt)
            }
            Err(reason) => {
                self.stats.record_drop(&reason, cost_ns);
                metrics::counter!("synth_stage_drops_total", "stage" => name).increment(1);
                tracing::debug!(stage = name, %reason, "drop");
                None
            }
        }
    }

    /// Single-packet mode
    #[inline]
    pub fn push(&mut self, pkt: Packet) -> Option<Packet> {
        self.handle(pkt)
    }

    /// Batch mode
    #[inline]
    pub fn push_batch(&mut self, batch: PacketBatch) -> PacketBatch {
        batch.apply(|pkt| self.handle(pkt))
    }

    /// Replica of the stage with fresh stats
    pub fn replicate(&self) -> Element {
        Element::new(self.stage.replicate())
    }

    /// Point-in-time copy of this element's counters
    pub fn stats(&self) -> StageStatsSnapshot {
        self.stats.snapshot(self.name())
    }
}

/// Ordered chain of elements
#[derive(Default)]
pub struct Pipeline {
    elements: Vec<Element>,
}

impl Pipeline {
    /// Empty pipeline
    pub fn new() -> Self {
        Self { elements: Vec::new() }
    }

    /// Append a stage at the tail
    pub fn add_stage(&mut self, stage: Box<dyn Stage>) {
        self.elements.push(Element::new(stage));
    }

    /// Run one packet through every element; `None` if any element dropped it
    #[inline]
    pub fn push(&mut self, pkt: Packet) -> Option<Packet> {
        let mut pkt = pkt;
        for element in &mut self.elements {
            pkt = element.push(pkt)?;
        }
        Some(pkt)
    }

    /// Run a batch through every element, each element seeing the survivors
    /// of the previous one
    #[inline]
    pub fn push_batch(&mut self, batch: PacketBatch) -> PacketBatch {
        let mut batch = batch;
        for element in &mut self.elements {
            if batch.is_empty() {
                break;
            }
            batch = element.push_batch(batch);
        }
        batch
    }

    /// Fresh copy of the chain for another worker thread
    pub fn replicate(&self) -> Pipeline {
        Pipeline { elements: self.elements.iter().map(Element::replicate).collect() }
    }

    /// Number of stages
    pub fn stage_count(&self) -> usize {
        self.elements.len()
    }

    /// Snapshots in stage order
    pub fn stats(&self) -> Vec<StageStatsSnapshot> {
        self.elements.iter().map(Element::stats).collect()
    }
}
