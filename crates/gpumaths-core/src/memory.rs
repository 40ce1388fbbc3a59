//! Stream buffers and their layout.
//!
//! A stream owns one contiguous host buffer laid out as
//! `[constants][inputs x capacity][outputs x capacity]`. The offsets are a
//! pure function of the buffer length, the operation kind and the integer
//! width, computed once per chunked call by [`BufferLayout::new`] and then
//! accessed only through the bounds-checked [`StreamBuffer`] view.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt;
use std::ops::Range;
use std::ptr::NonNull;

use crate::error::{GpumathsError, Result};
use crate::sizes::{KernelSizes, OperationKind};

/// Alignment of host buffers. Matches a cache line and every device DMA rule we target.
pub const HOST_BUFFER_ALIGN: usize = 64;

/// Owned, zero-initialized, cache-line-aligned host byte buffer.
///
/// Used as the staging buffer of software devices. Hardware backends stage
/// through their own page-locked allocation instead.
pub struct HostBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

impl HostBuffer {
    /// Allocate `len` zeroed bytes.
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(GpumathsError::Configuration(
                "Cannot allocate zero-sized stream buffer".to_string(),
            ));
        }

        let layout = Layout::from_size_align(len, HOST_BUFFER_ALIGN).map_err(|e| {
            GpumathsError::Configuration(format!("Invalid buffer size {}: {}", len, e))
        })?;

        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            GpumathsError::Device(format!("Host allocation of {} bytes failed", len))
        })?;

        Ok(Self { ptr, len, layout })
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; zero-length buffers are rejected at allocation.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len initialized bytes for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Mutable buffer contents.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in new() with this exact layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer").field("len", &self.len).finish()
    }
}

// SAFETY: HostBuffer uniquely owns its allocation.
unsafe impl Send for HostBuffer {}
unsafe impl Sync for HostBuffer {}

/// Byte ranges of one operation kind inside a stream buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferLayout {
    kind: OperationKind,
    int_bytes: usize,
    capacity: usize,
    constants: Range<usize>,
    inputs: Range<usize>,
    outputs: Range<usize>,
}

impl BufferLayout {
    /// Lay out `kind` in a buffer of `buffer_len` bytes, packing as many
    /// slots as fit.
    pub fn new(sizes: &KernelSizes, kind: OperationKind, buffer_len: usize) -> Result<Self> {
        Self::with_capacity(sizes, kind, sizes.max_slots(buffer_len, kind), buffer_len)
    }

    /// Lay out `kind` with exactly `capacity` slots in a buffer of
    /// `buffer_len` bytes.
    pub fn with_capacity(
        sizes: &KernelSizes,
        kind: OperationKind,
        capacity: usize,
        buffer_len: usize,
    ) -> Result<Self> {
        let needed = sizes.stream_size_containing(capacity, kind);
        if needed > buffer_len {
            return Err(GpumathsError::LayoutOverflow {
                needed,
                available: buffer_len,
            });
        }

        let constants = 0..sizes.constants_size(kind);
        let inputs = constants.end..constants.end + capacity * sizes.input_size(kind);
        let outputs = inputs.end..inputs.end + capacity * sizes.output_size(kind);

        Ok(Self {
            kind,
            int_bytes: sizes.int_bytes(),
            capacity,
            constants,
            inputs,
            outputs,
        })
    }

    /// Operation kind this layout was computed for.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Bytes per integer.
    pub fn int_bytes(&self) -> usize {
        self.int_bytes
    }

    /// Slots the buffer holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Constants region.
    pub fn constants(&self) -> Range<usize> {
        self.constants.clone()
    }

    /// Inputs region for all `capacity` slots.
    pub fn inputs(&self) -> Range<usize> {
        self.inputs.clone()
    }

    /// Outputs region for all `capacity` slots.
    pub fn outputs(&self) -> Range<usize> {
        self.outputs.clone()
    }

    /// Bytes of inputs per slot.
    pub fn input_stride(&self) -> usize {
        self.kind.arity().inputs * self.int_bytes
    }

    /// Bytes of outputs per slot.
    pub fn output_stride(&self) -> usize {
        self.kind.arity().outputs * self.int_bytes
    }

    /// Inputs region for the first `slots` slots.
    pub fn inputs_used(&self, slots: usize) -> Range<usize> {
        self.inputs.start..self.inputs.start + slots.min(self.capacity) * self.input_stride()
    }

    /// Outputs region for the first `slots` slots.
    pub fn outputs_used(&self, slots: usize) -> Range<usize> {
        self.outputs.start..self.outputs.start + slots.min(self.capacity) * self.output_stride()
    }

    /// Range of constant `index`.
    pub fn constant(&self, index: usize) -> Range<usize> {
        assert!(
            index < self.kind.arity().constants,
            "{} has no constant {}",
            self.kind,
            index
        );
        let start = self.constants.start + index * self.int_bytes;
        start..start + self.int_bytes
    }

    /// Range of input operand `operand` of `slot`.
    pub fn input(&self, slot: usize, operand: usize) -> Range<usize> {
        assert!(slot < self.capacity, "slot {} out of {}", slot, self.capacity);
        assert!(
            operand < self.kind.arity().inputs,
            "{} has no input {}",
            self.kind,
            operand
        );
        let start = self.inputs.start + slot * self.input_stride() + operand * self.int_bytes;
        start..start + self.int_bytes
    }

    /// Range of output operand `operand` of `slot`.
    pub fn output(&self, slot: usize, operand: usize) -> Range<usize> {
        assert!(slot < self.capacity, "slot {} out of {}", slot, self.capacity);
        assert!(
            operand < self.kind.arity().outputs,
            "{} has no output {}",
            self.kind,
            operand
        );
        let start = self.outputs.start + slot * self.output_stride() + operand * self.int_bytes;
        start..start + self.int_bytes
    }
}

/// Bounds-checked view of a stream's host buffer under one layout.
pub struct StreamBuffer<'a> {
    bytes: &'a mut [u8],
    layout: &'a BufferLayout,
}

impl<'a> StreamBuffer<'a> {
    /// Wrap `bytes` with `layout`.
    pub fn new(bytes: &'a mut [u8], layout: &'a BufferLayout) -> Result<Self> {
        if layout.outputs.end > bytes.len() {
            return Err(GpumathsError::LayoutOverflow {
                needed: layout.outputs.end,
                available: bytes.len(),
            });
        }
        Ok(Self { bytes, layout })
    }

    /// Layout in use.
    pub fn layout(&self) -> &BufferLayout {
        self.layout
    }

    /// Constant slot `index`.
    pub fn constant_mut(&mut self, index: usize) -> &mut [u8] {
        let range = self.layout.constant(index);
        &mut self.bytes[range]
    }

    /// Input operand of a slot.
    pub fn input_mut(&mut self, slot: usize, operand: usize) -> &mut [u8] {
        let range = self.layout.input(slot, operand);
        &mut self.bytes[range]
    }

    /// Input operand of a slot, read-only.
    pub fn input(&self, slot: usize, operand: usize) -> &[u8] {
        &self.bytes[self.layout.input(slot, operand)]
    }

    /// Constant slot `index`, read-only.
    pub fn constant(&self, index: usize) -> &[u8] {
        &self.bytes[self.layout.constant(index)]
    }

    /// Output operand of a slot.
    pub fn output(&self, slot: usize, operand: usize) -> &[u8] {
        &self.bytes[self.layout.output(slot, operand)]
    }

    /// Output operand of a slot, writable.
    pub fn output_mut(&mut self, slot: usize, operand: usize) -> &mut [u8] {
        let range = self.layout.output(slot, operand);
        &mut self.bytes[range]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sizes::BnWidth;

    #[test]
    fn test_host_buffer_zeroed_and_aligned() {
        let mut buf = HostBuffer::new(4096).unwrap();
        assert_eq!(buf.len(), 4096);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
        assert_eq!(buf.as_slice().as_ptr() as usize % HOST_BUFFER_ALIGN, 0);
        buf.as_mut_slice()[4095] = 7;
        assert_eq!(buf.as_slice()[4095], 7);
    }

    #[test]
    fn test_host_buffer_zero_len() {
        assert!(HostBuffer::new(0).unwrap_err().is_configuration_error());
    }

    #[test]
    fn test_layout_regions_disjoint() {
        let sizes = KernelSizes::new(BnWidth::Bits2048);
        for kind in OperationKind::ALL {
            let layout = BufferLayout::new(&sizes, kind, 65536).unwrap();
            assert_eq!(layout.constants().start, 0);
            assert_eq!(layout.constants().end, layout.inputs().start);
            assert_eq!(layout.inputs().end, layout.outputs().start);
            assert!(layout.outputs().end <= 65536);
            assert_eq!(layout.capacity(), sizes.max_slots(65536, kind));
        }
    }

    #[test]
    fn test_layout_slot_offsets() {
        let sizes = KernelSizes::new(BnWidth::Bits2048);
        let layout = BufferLayout::with_capacity(&sizes, OperationKind::ElGamal, 4, 100_000).unwrap();
        // three constants, four inputs, two outputs of 256 bytes
        assert_eq!(layout.constant(2), 512..768);
        assert_eq!(layout.input(0, 0), 768..1024);
        assert_eq!(layout.input(1, 3), 768 + 1024 + 768..768 + 2048);
        assert_eq!(layout.outputs().start, 768 + 4 * 1024);
        assert_eq!(layout.output(3, 1).end, layout.outputs().end);
        assert_eq!(layout.outputs_used(2), layout.outputs().start..layout.outputs().start + 1024);
    }

    #[test]
    fn test_layout_overflow() {
        let sizes = KernelSizes::new(BnWidth::Bits4096);
        let err = BufferLayout::with_capacity(&sizes, OperationKind::Exp, 10, 4096).unwrap_err();
        assert!(matches!(err, GpumathsError::LayoutOverflow { available: 4096, .. }));
    }

    #[test]
    #[should_panic(expected = "out of")]
    fn test_slot_out_of_range() {
        let sizes = KernelSizes::new(BnWidth::Bits2048);
        let layout = BufferLayout::with_capacity(&sizes, OperationKind::Mul2, 2, 65536).unwrap();
        let _ = layout.input(2, 0);
    }

    #[test]
    fn test_stream_buffer_view() {
        let sizes = KernelSizes::new(BnWidth::Bits2048);
        let layout = BufferLayout::with_capacity(&sizes, OperationKind::Mul2, 2, 4096).unwrap();
        let mut bytes = vec![0u8; 4096];
        let mut view = StreamBuffer::new(&mut bytes, &layout).unwrap();
        view.input_mut(1, 1).fill(9);
        view.output_mut(1, 0)[0] = 3;
        assert!(view.input(1, 1).iter().all(|&b| b == 9));
        assert!(view.input(1, 0).iter().all(|&b| b == 0));
        assert_eq!(view.output(1, 0)[0], 3);
        drop(view);
        assert_eq!(bytes[layout.output(1, 0).start], 3);
    }
}
