//! Streams and the stream pool.
//!
//! A [`Stream`] is one device execution context with its host buffer. The
//! [`StreamPool`] owns a fixed set of them and hands them out one caller at a
//! time; a checked-out stream is held through a [`StreamGuard`] that puts it
//! back when dropped, on every exit path.

mod config;
mod pool;

pub use config::{PoolConfig, PoolConfigBuilder, DEFAULT_CAPACITY_BYTES, DEFAULT_NUM_STREAMS};
pub use pool::{StreamGuard, StreamPool, StreamPoolStats};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::device::{DeviceStream, Launch};
use crate::error::Result;

/// One pooled execution context.
pub struct Stream {
    id: usize,
    inner: Box<dyn DeviceStream>,
    launches: Arc<AtomicU64>,
}

impl Stream {
    pub(crate) fn new(id: usize, inner: Box<dyn DeviceStream>, launches: Arc<AtomicU64>) -> Self {
        Self {
            id,
            inner,
            launches,
        }
    }

    /// Index of this stream in its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Host buffer size in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Host staging buffer.
    pub fn buffer(&self) -> &[u8] {
        self.inner.host_buffer()
    }

    /// Writable host staging buffer.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.inner.host_buffer_mut()
    }

    /// Submit one unit of work. Returns once it is queued.
    pub fn enqueue(&mut self, launch: &Launch) -> Result<()> {
        trace!(
            stream = self.id,
            kernel = %launch.kind(),
            slots = launch.slots(),
            "Enqueue"
        );
        self.inner.enqueue(launch)?;
        self.launches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Wait for the last enqueued unit to finish.
    pub fn get_results(&mut self) -> Result<()> {
        let result = self.inner.get_results();
        trace!(stream = self.id, ok = result.is_ok(), "Results ready");
        result
    }

    pub(crate) fn destroy(self) -> Result<()> {
        self.inner.destroy()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .finish()
    }
}
