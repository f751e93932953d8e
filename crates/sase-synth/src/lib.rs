//! OpenSASE Synthetic Load Stages
//!
//! Pipeline stages that impose a controlled, measurable processing cost on
//! every packet, for benchmarking schedulers, load balancers and packet
//! frameworks against realistic per-packet work.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         LOAD ENGINE                              │
//! │                                                                  │
//! │  ┌────────────────────┐          ┌────────────────────┐          │
//! │  │   Worker 0         │          │   Worker N         │          │
//! │  │                    │          │                    │          │
//! │  │ ┌────────────────┐ │          │ ┌────────────────┐ │          │
//! │  │ │  TrafficGen    │ │          │ │  TrafficGen    │ │          │
//! │  │ └───────┬────────┘ │          │ └───────┬────────┘ │          │
//! │  │         ▼          │          │         ▼          │          │
//! │  │ ┌────────────────┐ │          │ ┌────────────────┐ │          │
//! │  │ │PayloadMutator  │ │   ...    │ │PayloadMutator  │ │          │
//! │  │ ├────────────────┤ │          │ ├────────────────┤ │          │
//! │  │ │TimestampProbe  │ │          │ │TimestampProbe  │ │          │
//! │  │ ├────────────────┤ │          │ ├────────────────┤ │          │
//! │  │ │MemoryWorkload  │ │          │ │MemoryWorkload  │ │          │
//! │  │ └───────┬────────┘ │          │ └───────┬────────┘ │          │
//! │  │         ▼          │          │         ▼          │          │
//! │  │    StageStats      │          │    StageStats      │          │
//! │  └────────────────────┘          └────────────────────┘          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Stages
//!
//! | Stage | Cost | Packet effect |
//! |-------|------|---------------|
//! | PayloadMutator | wall-clock spin | masked byte merge, optional growth |
//! | TimestampProbe | cycle-counter spin | access/compute cycles stamped |
//! | MemoryWorkload | random reads + XOR work | none |
//!
//! Every stage supports single-packet and batch processing with identical
//! per-packet results.

#![warn(missing_docs)]
#![allow(dead_code)]

pub mod batch;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod engine;
pub mod merge;
pub mod pipeline;
pub mod stages;
pub mod stats;
pub mod traffic;

pub use batch::PacketBatch;
pub use buffer::{BufferAllocator, BufferError, BudgetAllocator, HeapAllocator, Packet};
pub use clock::{MonotonicClock, StepClock, TimeSource};
pub use config::{ConfigError, EngineConfig, ProcessingMode, StageConfig, StageEnv, SynthConfig};
pub use engine::{EngineError, EngineReport, LoadEngine, StopHandle};
pub use merge::ByteSpec;
pub use pipeline::{DropReason, Element, Pipeline, Stage};
pub use stages::{MemoryWorkload, PayloadMutator, TimestampProbe, TimestampRecord, WorkloadSpec};

/// Batch size for packet processing
pub const BATCH_SIZE: usize = 32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(BATCH_SIZE, 32);
        assert!(BATCH_SIZE <= u16::MAX as usize);
    }
}
