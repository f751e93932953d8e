//! Byte merging
//!
//! Overwrites a window of a packet with configured bytes, optionally through a
//! bitmask. Masked positions keep the original bits outside the mask; data
//! bytes past the end of the mask replace the original outright.

use crate::buffer::{BufferAllocator, BufferError, Packet};
use crate::config::ConfigError;

/// Immutable description of a byte merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteSpec {
    offset: usize,
    data: Vec<u8>,
    mask: Option<Vec<u8>>,
    grow: bool,
}

impl ByteSpec {
    /// Build a spec. The mask may not be longer than the data. Data bits
    /// outside the mask are cleared so they never reach the packet.
    pub fn new(
        offset: usize,
        mut data: Vec<u8>,
        mask: Option<Vec<u8>>,
        grow: bool,
    ) -> Result<Self, ConfigError> {
        if let Some(mask) = &mask {
            if mask.len() > data.len() {
                return Err(ConfigError::MaskTooLong { mask: mask.len(), data: data.len() });
            }
            for (d, m) in data.iter_mut().zip(mask) {
                *d &= *m;
            }
        }
        Ok(Self { offset, data, mask, grow })
    }

    /// Unmasked overwrite of `data` at `offset`
    pub fn replace(offset: usize, data: impl Into<Vec<u8>>) -> Self {
        Self { offset, data: data.into(), mask: None, grow: false }
    }

    /// Offset of the merge window
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Replacement bytes (already normalised against the mask)
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Optional bitmask
    pub fn mask(&self) -> Option<&[u8]> {
        self.mask.as_deref()
    }

    /// Whether the packet is extended to fit the whole of `data`
    pub fn grow(&self) -> bool {
        self.grow
    }
}

/// Merge `data` into `buf` starting at `offset`, clamped to the end of `buf`.
/// Returns the number of bytes written.
#[inline]
pub fn merge_into(buf: &mut [u8], offset: usize, data: &[u8], mask: Option<&[u8]>) -> usize {
    let avail = buf.len().saturating_sub(offset);
    let copy_len = data.len().min(avail);
    if copy_len == 0 {
        return 0;
    }
    let window = &mut buf[offset..offset + copy_len];

    match mask {
        Some(mask) => {
            for (i, (dst, &src)) in window.iter_mut().zip(data).enumerate() {
                let m = mask.get(i).copied().unwrap_or(0xFF);
                *dst = (*dst & !m) | src;
            }
        }
        None => window.copy_from_slice(&data[..copy_len]),
    }

    copy_len
}

/// Apply `spec` to a writable packet, growing it first when the spec asks
/// for it and the data runs past the end. Returns the number of bytes
/// written.
pub fn merge(
    pkt: &mut Packet,
    spec: &ByteSpec,
    alloc: &dyn BufferAllocator,
) -> Result<usize, BufferError> {
    // An end past usize::MAX cannot be grown to; the merge is then a no-op
    if let Some(needed) = spec.offset.checked_add(spec.data.len()) {
        if spec.grow && needed > pkt.len() {
            pkt.put(needed - pkt.len(), alloc)?;
        }
    }
    let buf = pkt.data_mut()?;
    Ok(merge_into(buf, spec.offset, &spec.data, spec.mask.as_deref()))
}
