//! Device capability abstraction.
//!
//! A [`Device`] creates execution streams and owns the process-wide
//! accelerator state. A [`DeviceStream`] is one reusable execution context:
//! a host staging buffer plus whatever the backend needs to run kernels on
//! it. The dispatch engine only ever talks to these two traits, so real,
//! software and unsupported backends are chosen at runtime by injection.

use std::fmt;

use crate::codec::ByteOrder;
use crate::error::Result;
use crate::memory::BufferLayout;
use crate::sizes::OperationKind;

/// One kernel launch over the first `slots` slots of a stream buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    layout: BufferLayout,
    slots: usize,
}

impl Launch {
    /// Describe a launch of `slots` slots laid out by `layout`.
    ///
    /// # Panics
    ///
    /// Panics if `slots` exceeds the layout's capacity.
    pub fn new(layout: BufferLayout, slots: usize) -> Self {
        assert!(
            slots <= layout.capacity(),
            "launch of {} slots exceeds layout capacity {}",
            slots,
            layout.capacity()
        );
        Self { layout, slots }
    }

    /// Operation to run.
    pub fn kind(&self) -> OperationKind {
        self.layout.kind()
    }

    /// Number of slots to process.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Buffer layout the inputs were written with.
    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    /// Bytes to upload: constants plus the used input slots.
    pub fn upload_len(&self) -> usize {
        self.layout.inputs_used(self.slots).end
    }
}

/// A reusable accelerator execution context.
///
/// A stream is used by one thread at a time; the pool's take/return
/// protocol is what guarantees it. `enqueue` may return before the work is
/// done; the host buffer must not be touched again until `get_results`
/// returns.
pub trait DeviceStream: Send {
    /// Host buffer size in bytes.
    fn capacity(&self) -> usize {
        self.host_buffer().len()
    }

    /// Host staging buffer.
    fn host_buffer(&self) -> &[u8];

    /// Writable host staging buffer.
    fn host_buffer_mut(&mut self) -> &mut [u8];

    /// Upload the used region, run the kernel and download the outputs, as
    /// one unit of work.
    fn enqueue(&mut self, launch: &Launch) -> Result<()>;

    /// Block until the last enqueued unit is finished and its outputs are in
    /// the host buffer.
    fn get_results(&mut self) -> Result<()>;

    /// Release the device context and the host buffer.
    fn destroy(self: Box<Self>) -> Result<()>;
}

impl fmt::Debug for dyn DeviceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceStream")
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

/// Process-wide accelerator capability.
///
/// `reset_device` and the profiling hooks act on global state and must be
/// serialized by the caller. Resetting while streams are checked out is
/// undefined.
pub trait Device: Send + Sync + fmt::Debug {
    /// Human readable backend name.
    fn name(&self) -> &str;

    /// Byte order the kernels expect integers in.
    fn wire_order(&self) -> ByteOrder {
        ByteOrder::LittleEndian
    }

    /// Whether this device can run kernels at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Create one stream with a `capacity_bytes` host buffer. On failure
    /// everything allocated for the stream is released before returning.
    fn create_stream(&self, capacity_bytes: usize) -> Result<Box<dyn DeviceStream>>;

    /// Reset the whole device.
    fn reset_device(&self) -> Result<()>;

    /// Start the device profiler.
    fn start_profiling(&self) -> Result<()>;

    /// Stop the device profiler.
    fn stop_profiling(&self) -> Result<()>;
}
