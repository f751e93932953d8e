//! Packet buffers
//!
//! A packet arrives from upstream either as a shared view (cheap clone of a
//! frame that other holders may still read) or as a unique, writable buffer.
//! Stages that mutate content must first `uniqueify` the packet, which copies
//! a shared frame into a fresh buffer obtained from the [`BufferAllocator`].
//!
//! # Design
//!
//! - Allocation goes through a trait so pool exhaustion can be simulated
//! - Growth is bounded by the allocator's maximum frame size
//! - Handles are moved, never duplicated, unless `share` is called explicitly

use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Default MTU size
pub const DEFAULT_MTU: usize = 1500;

/// Maximum packet size
pub const MAX_PACKET_SIZE: usize = 9216; // Jumbo frame

/// Spare tailroom reserved when a buffer is (re)allocated
pub const DEFAULT_TAILROOM: usize = 128;

/// Buffer service failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The allocator has no buffers left
    #[error("buffer pool exhausted")]
    Exhausted,

    /// Requested length exceeds the maximum frame size
    #[error("requested length {requested} exceeds maximum {max}")]
    TooLarge {
        /// Length asked for
        requested: usize,
        /// Allocator limit
        max: usize,
    },

    /// Write attempted on a buffer that is still shared
    #[error("buffer is shared")]
    Shared,
}

/// The buffer allocation service packets are backed by
pub trait BufferAllocator: Send + Sync {
    /// Allocate an empty buffer able to hold at least `len` bytes
    fn allocate(&self, len: usize) -> Result<BytesMut, BufferError>;

    /// Largest frame this allocator can back
    fn max_len(&self) -> usize {
        MAX_PACKET_SIZE
    }
}

/// Heap-backed allocator; only fails for oversized frames
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, len: usize) -> Result<BytesMut, BufferError> {
        if len > self.max_len() {
            return Err(BufferError::TooLarge { requested: len, max: self.max_len() });
        }
        Ok(BytesMut::with_capacity(len + DEFAULT_TAILROOM))
    }
}

/// Allocator with a fixed number of allocations, used to reproduce pool
/// exhaustion under load.
#[derive(Debug)]
pub struct BudgetAllocator {
    /// Allocations still permitted
    remaining: AtomicUsize,
    /// Total allocated
    allocated: AtomicUsize,
    max_len: usize,
}

impl BudgetAllocator {
    /// Create an allocator that serves `budget` allocations
    pub fn new(budget: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(budget),
            allocated: AtomicUsize::new(0),
            max_len: MAX_PACKET_SIZE,
        }
    }

    /// Allocations still available
    pub fn available(&self) -> usize {
        self.remaining.load(Ordering::Relaxed)
    }

    /// Allocations served so far
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl BufferAllocator for BudgetAllocator {
    fn allocate(&self, len: usize) -> Result<BytesMut, BufferError> {
        if len > self.max_len {
            return Err(BufferError::TooLarge { requested: len, max: self.max_len });
        }
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| BufferError::Exhausted)?;
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(BytesMut::with_capacity(len + DEFAULT_TAILROOM))
    }

    fn max_len(&self) -> usize {
        self.max_len
    }
}

#[derive(Debug)]
enum Repr {
    Shared(Bytes),
    Unique(BytesMut),
}

/// A packet handle
#[derive(Debug)]
pub struct Packet {
    repr: Repr,
}

impl Packet {
    /// Wrap a frame that may be referenced elsewhere
    pub fn shared(frame: Bytes) -> Self {
        Self { repr: Repr::Shared(frame) }
    }

    /// Wrap a buffer owned exclusively by this packet
    pub fn unique(buf: BytesMut) -> Self {
        Self { repr: Repr::Unique(buf) }
    }

    /// Copy `data` into a new unique packet
    pub fn from_slice(data: &[u8]) -> Self {
        Self::unique(BytesMut::from(data))
    }

    /// Get packet data slice
    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        match &self.repr {
            Repr::Shared(b) => b,
            Repr::Unique(b) => b,
        }
    }

    /// Get data length
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Check if empty
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while other holders may observe this frame
    #[inline(always)]
    pub fn is_shared(&self) -> bool {
        matches!(self.repr, Repr::Shared(_))
    }

    /// Explicit copy-free duplicate. Both handles become shared.
    pub fn share(&mut self) -> Packet {
        let frozen = match std::mem::replace(&mut self.repr, Repr::Shared(Bytes::new())) {
            Repr::Shared(b) => b,
            Repr::Unique(b) => b.freeze(),
        };
        self.repr = Repr::Shared(frozen.clone());
        Packet::shared(frozen)
    }

    /// Obtain exclusive write access, copying the frame if it is shared.
    pub fn uniqueify(&mut self, alloc: &dyn BufferAllocator) -> Result<(), BufferError> {
        if let Repr::Shared(frame) = &self.repr {
            let mut buf = alloc.allocate(frame.len())?;
            buf.extend_from_slice(frame);
            self.repr = Repr::Unique(buf);
        }
        Ok(())
    }

    /// Get mutable packet data. Fails if the packet has not been uniqueified.
    #[inline(always)]
    pub fn data_mut(&mut self) -> Result<&mut [u8], BufferError> {
        match &mut self.repr {
            Repr::Unique(b) => Ok(&mut b[..]),
            Repr::Shared(_) => Err(BufferError::Shared),
        }
    }

    /// Append `extra` zero bytes at the tail. Reallocates through `alloc`
    /// when the current buffer lacks tailroom.
    pub fn put(&mut self, extra: usize, alloc: &dyn BufferAllocator) -> Result<(), BufferError> {
        let new_len = self.len() + extra;
        if new_len > alloc.max_len() {
            return Err(BufferError::TooLarge { requested: new_len, max: alloc.max_len() });
        }
        let buf = match &mut self.repr {
            Repr::Unique(b) => b,
            Repr::Shared(_) => return Err(BufferError::Shared),
        };
        if buf.capacity() < new_len {
            let mut grown = alloc.allocate(new_len)?;
            grown.extend_from_slice(buf);
            *buf = grown;
        }
        buf.resize(new_len, 0);
        Ok(())
    }

    /// Hand the frame downstream as immutable bytes
    pub fn into_bytes(self) -> Bytes {
        match self.repr {
            Repr::Shared(b) => b,
            Repr::Unique(b) => b.freeze(),
        }
    }
}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        Self::unique(BytesMut::from(&data[..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniqueify_copies_shared_frame() {
        let frame = Bytes::from_static(&[1, 2, 3, 4]);
        let mut pkt = Packet::shared(frame.clone());
        assert!(pkt.is_shared());
        assert_eq!(pkt.data_mut(), Err(BufferError::Shared));

        pkt.uniqueify(&HeapAllocator).unwrap();
        assert!(!pkt.is_shared());
        pkt.data_mut().unwrap()[0] = 0xFF;

        assert_eq!(pkt.data(), &[0xFF, 2, 3, 4]);
        assert_eq!(&frame[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_uniqueify_unique_does_not_allocate() {
        let pool = BudgetAllocator::new(0);
        let mut pkt = Packet::from_slice(&[0; 60]);
        pkt.uniqueify(&pool).unwrap();
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_budget_exhaustion() {
        let pool = BudgetAllocator::new(1);
        let frame = Bytes::from_static(&[0; 60]);

        let mut a = Packet::shared(frame.clone());
        let mut b = Packet::shared(frame);
        assert!(a.uniqueify(&pool).is_ok());
        assert_eq!(b.uniqueify(&pool), Err(BufferError::Exhausted));
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_put_grows_with_zeros() {
        let mut pkt = Packet::from_slice(&[7; 60]);
        pkt.put(8, &HeapAllocator).unwrap();
        assert_eq!(pkt.len(), 68);
        assert_eq!(&pkt.data()[60..], &[0; 8]);
        assert_eq!(pkt.data()[59], 7);
    }

    #[test]
    fn test_put_rejects_oversized() {
        let mut pkt = Packet::from_slice(&[0; 64]);
        let err = pkt.put(MAX_PACKET_SIZE, &HeapAllocator).unwrap_err();
        assert!(matches!(err, BufferError::TooLarge { .. }));
        assert_eq!(pkt.len(), 64);
    }

    #[test]
    fn test_share_then_write_requires_copy() {
        let mut original = Packet::from_slice(&[9; 16]);
        let copy = original.share();
        assert!(original.is_shared());
        assert!(copy.is_shared());

        original.uniqueify(&HeapAllocator).unwrap();
        original.data_mut().unwrap()[0] = 0;
        assert_eq!(copy.data()[0], 9);
    }
}
