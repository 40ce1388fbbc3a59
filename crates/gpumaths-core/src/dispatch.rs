//! Generic chunked dispatch.
//!
//! One algorithm serves every operation kind. A [`KernelBatch`] describes a
//! batch by its kind's arity and three callbacks (constant, input, output);
//! the [`Dispatcher`] checks out a stream, splits the batch into chunks that
//! fit the stream's buffer, encodes each chunk, runs it and decodes the
//! outputs back into the batch at their absolute indices.

use std::ops::Range;
use std::sync::Arc;

use num_bigint::BigUint;
use tracing::{debug, error, trace};

use crate::codec::{ByteOrder, Codec};
use crate::device::Launch;
use crate::error::{GpumathsError, Result};
use crate::memory::{BufferLayout, StreamBuffer};
use crate::sizes::{BnWidth, KernelSizes, OperationKind};
use crate::stream::{Stream, StreamGuard, StreamPool};

/// A batch of one operation kind: shared constants plus equal-length
/// per-slot operands.
///
/// Implementations guarantee every per-slot sequence has `len()` entries.
pub trait KernelBatch {
    /// Operation to run.
    fn kind(&self) -> OperationKind;

    /// Number of slots.
    fn len(&self) -> usize;

    /// Whether the batch has no slots.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared constant `index`, in the kind's constant order.
    fn constant(&self, index: usize) -> &BigUint;

    /// Input `operand` of `slot`, in the kind's input order.
    fn input(&self, slot: usize, operand: usize) -> &BigUint;

    /// Receive output `operand` of `slot`.
    fn store_output(&mut self, slot: usize, operand: usize, value: BigUint);
}

/// Runs batches on a stream pool for one integer width.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    sizes: Arc<KernelSizes>,
}

impl Dispatcher {
    /// Dispatcher sharing an existing size table.
    pub fn new(sizes: Arc<KernelSizes>) -> Self {
        Self { sizes }
    }

    /// Dispatcher for integers of `width`.
    pub fn for_width(width: BnWidth) -> Self {
        Self::new(Arc::new(KernelSizes::new(width)))
    }

    /// Dispatcher for the narrowest width that holds `modulus`.
    pub fn for_modulus(modulus: &BigUint) -> Result<Self> {
        Ok(Self::for_width(BnWidth::for_modulus(modulus)?))
    }

    /// Size table in use.
    pub fn sizes(&self) -> &Arc<KernelSizes> {
        &self.sizes
    }

    /// Integer width in use.
    pub fn width(&self) -> BnWidth {
        self.sizes.width()
    }

    pub(crate) fn codec(&self, order: ByteOrder) -> Codec {
        Codec::new(self.sizes.int_bytes(), order)
    }

    /// Slots of `kind` one stream of `pool` holds.
    pub fn max_slots(&self, pool: &StreamPool, kind: OperationKind) -> usize {
        self.sizes.max_slots(pool.capacity_bytes(), kind)
    }

    pub(crate) fn layout_for(&self, kind: OperationKind, capacity: usize) -> Result<BufferLayout> {
        let layout = BufferLayout::new(&self.sizes, kind, capacity)?;
        if layout.capacity() == 0 {
            return Err(GpumathsError::Configuration(format!(
                "{}-byte stream cannot hold a single {} slot ({} bytes needed)",
                capacity,
                kind,
                self.sizes.stream_size_containing(1, kind)
            )));
        }
        Ok(layout)
    }

    /// Run the whole batch, chunked to fit one stream.
    ///
    /// Blocks until a stream is free. If a chunk fails the remaining chunks
    /// are skipped and the error returned; outputs of chunks that already
    /// completed stay written.
    pub fn run_chunk<B>(&self, pool: &StreamPool, batch: &mut B) -> Result<()>
    where
        B: KernelBatch + ?Sized,
    {
        let n = batch.len();
        if n == 0 {
            return Ok(());
        }
        let kind = batch.kind();
        let mut stream = pool.take_stream();
        let layout = self.layout_for(kind, stream.capacity())?;
        let codec = self.codec(pool.device().wire_order());
        let max = layout.capacity();

        debug!(
            kernel = %kind,
            slots = n,
            max_slots = max,
            chunks = n.div_ceil(max),
            stream = stream.id(),
            "Dispatching batch"
        );

        for start in (0..n).step_by(max) {
            let end = (start + max).min(n);
            let launch = self.encode(&codec, &mut stream, &layout, batch, start..end)?;
            stream.enqueue(&launch)?;
            stream.get_results()?;
            self.decode(&codec, &stream, &launch, batch, start);
        }
        Ok(())
    }

    /// Run `range` of the batch on a stream the caller already holds, in a
    /// single launch.
    ///
    /// # Panics
    ///
    /// Panics if `range` has more slots than the stream holds. That can only
    /// come from a logic error in the caller. Release builds of this workspace
    /// set `panic = "abort"`, so there the panic ends the process; under the
    /// default unwinding strategy it ends only the calling thread, after the
    /// stream guard has been returned to the pool.
    pub fn run_direct<B>(
        &self,
        stream: &mut StreamGuard<'_>,
        batch: &mut B,
        range: Range<usize>,
    ) -> Result<()>
    where
        B: KernelBatch + ?Sized,
    {
        let kind = batch.kind();
        let layout = BufferLayout::new(&self.sizes, kind, stream.capacity())?;
        if range.len() > layout.capacity() {
            let misuse = GpumathsError::TooManySlots {
                kind,
                requested: range.len(),
                max: layout.capacity(),
            };
            error!(error = %misuse, "Direct launch misuse");
            panic!("{}", misuse);
        }
        if range.is_empty() {
            return Ok(());
        }
        let codec = self.codec(stream.pool().device().wire_order());
        let start = range.start;
        let launch = self.encode(&codec, stream, &layout, batch, range)?;
        stream.enqueue(&launch)?;
        stream.get_results()?;
        self.decode(&codec, stream, &launch, batch, start);
        Ok(())
    }

    /// Write constants and the inputs of `range` into the stream buffer.
    pub(crate) fn encode<B>(
        &self,
        codec: &Codec,
        stream: &mut Stream,
        layout: &BufferLayout,
        batch: &B,
        range: Range<usize>,
    ) -> Result<Launch>
    where
        B: KernelBatch + ?Sized,
    {
        let arity = layout.kind().arity();
        let mut view = StreamBuffer::new(stream.buffer_mut(), layout)?;

        // rewritten every chunk even though they never change within a batch
        for c in 0..arity.constants {
            codec.encode(batch.constant(c), view.constant_mut(c));
        }
        for (slot, index) in range.clone().enumerate() {
            for operand in 0..arity.inputs {
                codec.encode(batch.input(index, operand), view.input_mut(slot, operand));
            }
        }

        trace!(kernel = %layout.kind(), start = range.start, end = range.end, "Encoded chunk");
        Ok(Launch::new(layout.clone(), range.len()))
    }

    /// Read the outputs of a finished launch back into the batch, starting
    /// at absolute slot `start`.
    pub(crate) fn decode<B>(
        &self,
        codec: &Codec,
        stream: &Stream,
        launch: &Launch,
        batch: &mut B,
        start: usize,
    ) where
        B: KernelBatch + ?Sized,
    {
        let layout = launch.layout();
        let buffer = stream.buffer();
        for slot in 0..launch.slots() {
            for operand in 0..launch.kind().arity().outputs {
                let value = codec.decode(&buffer[layout.output(slot, operand)]);
                batch.store_output(start + slot, operand, value);
            }
        }
    }
}
