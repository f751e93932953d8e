//! Cycle-accounted timestamp probe
//!
//! Splits per-packet cost into an *access* phase (obtaining a writable
//! packet, which may copy) and a *compute* phase (the configured spin), and
//! stamps both cycle counts into the packet so downstream analysis can
//! attribute latency.
//!
//! Record layout at `offset + UDP_PAYLOAD_OFFSET`, little-endian:
//!
//! ```text
//! +0   access_cycles  u64
//! +8   compute_cycles u64
//! ```

use crate::buffer::{BufferAllocator, HeapAllocator, Packet};
use crate::clock::{MonotonicClock, TimeSource};
use crate::pipeline::{DropReason, Stage};
use crate::traffic::UDP_PAYLOAD_OFFSET;
use std::hint::black_box;
use std::sync::Arc;

/// Measured cost of one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimestampRecord {
    /// Cycles spent obtaining a writable packet
    pub access_cycles: u64,
    /// Cycles spent in the copy and spin
    pub compute_cycles: u64,
}

impl TimestampRecord {
    /// Encoded size in bytes
    pub const LEN: usize = 16;

    /// Little-endian wire form
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..8].copy_from_slice(&self.access_cycles.to_le_bytes());
        out[8..].copy_from_slice(&self.compute_cycles.to_le_bytes());
        out
    }

    /// Inverse of [`encode`](Self::encode); `None` if `bytes` is short
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let access = bytes.get(..8)?.try_into().ok()?;
        let compute = bytes.get(8..Self::LEN)?.try_into().ok()?;
        Some(Self {
            access_cycles: u64::from_le_bytes(access),
            compute_cycles: u64::from_le_bytes(compute),
        })
    }

    /// Read the record a probe configured with `offset` left in `data`
    pub fn read_from(data: &[u8], offset: usize) -> Option<Self> {
        Self::decode(data.get(offset.checked_add(UDP_PAYLOAD_OFFSET)?..)?)
    }
}

/// Stamps per-packet access and compute cycle counts after the UDP header
pub struct TimestampProbe {
    offset: usize,
    delay_ns: u64,
    clock: Arc<dyn TimeSource>,
    alloc: Arc<dyn BufferAllocator>,
    scratch: Vec<u8>,
}

impl TimestampProbe {
    /// `delay_ns` is converted to cycles at the clock's measured frequency.
    pub fn new(offset: usize, delay_ns: u64) -> Self {
        Self {
            offset,
            delay_ns,
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

    /// Absolute position of the record in the packet, `None` if it is not
    /// addressable
    pub fn record_offset(&self) -> Option<usize> {
        self.offset.checked_add(UDP_PAYLOAD_OFFSET)
    }
}

impl Stage for TimestampProbe {
    fn process(&mut self, mut pkt: Packet) -> Result<Packet, DropReason> {
        let access_start = self.clock.cycles();
        let access = pkt.uniqueify(&*self.alloc);
        let access_end = self.clock.cycles();
        access?;

        let span = self
            .record_offset()
            .and_then(|at| Some((at, at.checked_add(TimestampRecord::LEN)?)));
        let (at, needed) = match span {
            Some((at, needed)) if needed <= pkt.len() => (at, needed),
            Some((_, needed)) => return Err(DropReason::Bounds { needed, len: pkt.len() }),
            None => return Err(DropReason::Bounds { needed: usize::MAX, len: pkt.len() }),
        };

        let compute_start = self.clock.cycles();
        self.scratch.clear();
        self.scratch.extend_from_slice(pkt.data());
        black_box(&self.scratch);
        let compute_cycles = self.clock.spin_cycles_from(compute_start, self.delay_ns);

        let record = TimestampRecord {
            access_cycles: access_end.wrapping_sub(access_start),
            compute_cycles,
        };
        pkt.data_mut()?[at..needed].copy_from_slice(&record.encode());
        Ok(pkt)
    }

    fn name(&self) -> &'static str {
        "timestamp-probe"
    }

    fn replicate(&self) -> Box<dyn Stage> {
        Box::new(Self {
            offset: self.offset,
            delay_ns: self.delay_ns,
            clock: self.clock.clone(),
            alloc: self.alloc.clone(),
            scratch: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BudgetAllocator, BufferError};
    use crate::clock::{cycles_to_nanos, StepClock};
    use crate::traffic::udp_packet;
    use bytes::Bytes;

    #[test]
    fn test_record_roundtrip() {
        let rec = TimestampRecord { access_cycles: 0x0102_0304_0506_0708, compute_cycles: 42 };
        let bytes = rec.encode();
        assert_eq!(bytes[0], 0x08);
        assert_eq!(TimestampRecord::decode(&bytes), Some(rec));
        assert_eq!(TimestampRecord::decode(&bytes[..15]), None);
    }

    #[test]
    fn test_stamps_after_udp_header() {
        let clock = Arc::new(StepClock::new(10));
        let mut probe = TimestampProbe::new(0, 1_000).with_clock(clock);
        let out = probe.process(udp_packet(60, 7)).unwrap();

        let rec = TimestampRecord::read_from(out.data(), 0).unwrap();
        // One tick between the two access reads
        assert_eq!(rec.access_cycles, 10);
        assert!(rec.compute_cycles >= 1_000);
        assert!(rec.compute_cycles <= 1_010);
        // Headers untouched
        assert_eq!(&out.data()[..UDP_PAYLOAD_OFFSET], &udp_packet(60, 7).data()[..UDP_PAYLOAD_OFFSET]);
    }

    #[test]
    fn test_offset_shifts_record() {
        let clock = Arc::new(StepClock::new(1));
        let mut probe = TimestampProbe::new(2, 0).with_clock(clock);
        let out = probe.process(udp_packet(64, 0)).unwrap();
        assert_eq!(probe.record_offset(), Some(44));
        let rec = TimestampRecord::read_from(out.data(), 2).unwrap();
        assert_eq!(rec.access_cycles, 1);
    }

    #[test]
    fn test_short_packet_dropped() {
        let mut probe = TimestampProbe::new(0, 0).with_clock(Arc::new(StepClock::new(1)));
        let err = probe.process(Packet::from_slice(&[0; 57])).unwrap_err();
        assert_eq!(err, DropReason::Bounds { needed: 58, len: 57 });
        assert!(probe.process(Packet::from_slice(&[0; 58])).is_ok());
    }

    #[test]
    fn test_unaddressable_offset_dropped() {
        for offset in [usize::MAX, usize::MAX - UDP_PAYLOAD_OFFSET, usize::MAX - 50] {
            let mut probe = TimestampProbe::new(offset, 0).with_clock(Arc::new(StepClock::new(1)));
            let input = udp_packet(64, 0);
            let err = probe.process(input).unwrap_err();
            assert!(matches!(err, DropReason::Bounds { len: 64, .. }));
        }
        assert_eq!(TimestampRecord::read_from(&[0; 64], usize::MAX), None);
    }

    #[test]
    fn test_access_failure_dropped() {
        let mut probe = TimestampProbe::new(0, 0)
            .with_clock(Arc::new(StepClock::new(1)))
            .with_allocator(Arc::new(BudgetAllocator::new(0)));
        let err = probe.process(Packet::shared(Bytes::from(vec![0u8; 60]))).unwrap_err();
        assert_eq!(err, DropReason::Allocation(BufferError::Exhausted));
    }

    #[test]
    fn test_real_clock_compute_covers_delay() {
        let clock = MonotonicClock::new();
        let hz = clock.cycles_hz();
        let mut probe = TimestampProbe::new(0, 1_000);
        let out = probe.process(udp_packet(60, 0)).unwrap();
        let rec = TimestampRecord::read_from(out.data(), 0).unwrap();
        assert!(cycles_to_nanos(rec.compute_cycles, hz) >= 1_000);
    }
}
