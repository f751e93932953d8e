//! Synthetic cost stages
//!
//! | Stage | Cost injected | Packet effect |
//! |-------|---------------|---------------|
//! | [`PayloadMutator`] | wall-clock spin | bytes merged at an offset, optional growth |
//! | [`TimestampProbe`] | cycle-counter spin | access/compute cycles written after the UDP header |
//! | [`MemoryWorkload`] | pseudo-random memory reads + XOR work | none |

pub mod payload;
pub mod timestamp;
pub mod workload;

pub use payload::PayloadMutator;
pub use timestamp::{TimestampProbe, TimestampRecord};
pub use workload::{MemoryWorkload, WorkloadSpec};
