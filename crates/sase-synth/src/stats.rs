//! Stage Statistics
//!
//! Lock-free accounting of what each stage did to the packets it saw.

use crate::pipeline::DropReason;
use sase_common::{AtomicCounter, LatencyHistogram, LatencySnapshot};
use serde::Serialize;

/// Per-stage counters (cache-line aligned)
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct StageStats {
    /// Packets received
    pub rx_packets: AtomicCounter,
    /// Packets forwarded
    pub tx_packets: AtomicCounter,
    /// Bytes forwarded
    pub tx_bytes: AtomicCounter,
    /// Drops on allocation failure
    pub alloc_drops: AtomicCounter,
    /// Drops on out-of-bounds access
    pub bounds_drops: AtomicCounter,
    /// Time spent per packet, forwarded or dropped
    pub cost: LatencyHistogram,
}

impl StageStats {
    /// Count a received packet
    #[inline(always)]
    pub fn record_rx(&self) {
        self.rx_packets.inc();
    }

    /// Count a forwarded packet and its cost
    #[inline(always)]
    pub fn record_tx(&self, bytes: u64, cost_ns: u64) {
        self.tx_packets.inc();
        self.tx_bytes.add(bytes);
        self.cost.record(cost_ns);
    }

    /// Count a drop by reason and its cost
    #[inline(always)]
    pub fn record_drop(&self, reason: &DropReason, cost_ns: u64) {
        match reason {
            DropReason::Allocation(_) => self.alloc_drops.inc(),
            DropReason::Bounds { .. } => self.bounds_drops.inc(),
        };
        self.cost.record(cost_ns);
    }

    /// Copy the counters out under `name`
    pub fn snapshot(&self, name: &'static str) -> StageStatsSnapshot {
        StageStatsSnapshot {
            stage: name,
            rx_packets: self.rx_packets.get(),
            tx_packets: self.tx_packets.get(),
            tx_bytes: self.tx_bytes.get(),
            alloc_drops: self.alloc_drops.get(),
            bounds_drops: self.bounds_drops.get(),
            cost: self.cost.snapshot(),
        }
    }
}

/// Stats snapshot (non-atomic)
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageStatsSnapshot {
    /// Stage name
    pub stage: &'static str,
    /// Packets received
    pub rx_packets: u64,
    /// Packets forwarded
    pub tx_packets: u64,
    /// Bytes forwarded
    pub tx_bytes: u64,
    /// Drops on allocation failure
    pub alloc_drops: u64,
    /// Drops on out-of-bounds access
    pub bounds_drops: u64,
    /// Per-packet cost distribution
    pub cost: LatencySnapshot,
}

impl StageStatsSnapshot {
    /// All drops
    pub fn dropped(&self) -> u64 {
        self.alloc_drops + self.bounds_drops
    }

    /// Fold a replica's snapshot of the same stage into this one
    pub fn merge(&mut self, other: &StageStatsSnapshot) {
        self.rx_packets += other.rx_packets;
        self.tx_packets += other.tx_packets;
        self.tx_bytes += other.tx_bytes;
        self.alloc_drops += other.alloc_drops;
        self.bounds_drops += other.bounds_drops;
        self.cost.merge(&other.cost);
    }
}
