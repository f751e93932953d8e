//! Payload mutation with a fixed wall-clock stall per packet

use crate::buffer::{BufferAllocator, HeapAllocator, Packet};
use crate::clock::{MonotonicClock, TimeSource};
use crate::merge::{merge, ByteSpec};
use crate::pipeline::{DropReason, Stage};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

/// Copies the packet aside, merges the configured bytes into it, then holds
/// the thread until `delay` has elapsed.
pub struct PayloadMutator {
    spec: ByteSpec,
    delay: Duration,
    clock: Arc<dyn TimeSource>,
    alloc: Arc<dyn BufferAllocator>,
    scratch: Vec<u8>,
}

impl PayloadMutator {
    /// Mutator on the real clock and heap allocator
    pub fn new(spec: ByteSpec, delay: Duration) -> Self {
        Self {
            spec,
            delay,
            clock: Arc::new(MonotonicClock::new()),
            alloc: Arc::new(HeapAllocator),
            scratch: Vec::new(),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the buffer allocator
    pub fn with_allocator(mut self, alloc: Arc<dyn BufferAllocator>) -> Self {
        self.alloc = alloc;
        self
    }

    /// Merge parameters
    pub fn spec(&self) -> &ByteSpec {
        &self.spec
    }

    /// Per-packet stall
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Stage for PayloadMutator {
    fn process(&mut self, mut pkt: Packet) -> Result<Packet, DropReason> {
        pkt.uniqueify(&*self.alloc)?;

        // Full-packet copy, part of the simulated cost
        self.scratch.clear();
        self.scratch.extend_from_slice(pkt.data());
        black_box(&self.scratch);

        merge(&mut pkt, &self.spec, &*self.alloc)?;
        self.clock.spin_for(self.delay);
        Ok(pkt)
    }

    fn name(&self) -> &'static str {
        "payload-mutator"
    }

    fn replicate(&self) -> Box<dyn Stage> {
        Box::new(Self {
            spec: self.spec.clone(),
            delay: self.delay,
            clock: self.clock.clone(),
            alloc: self.alloc.clone(),
            scratch: Vec::new(),
        })
    }
}
