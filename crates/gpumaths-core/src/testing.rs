//! In-crate echo device for unit tests.
//!
//! Output operand `j` of every slot is a copy of input operand
//! `inputs - outputs + j`, so tests can check exactly which slots a kernel
//! saw without any arithmetic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::device::{Device, DeviceStream, Launch};
use crate::error::{GpumathsError, Result};

const NEVER: usize = usize::MAX;

#[derive(Debug)]
struct Counters {
    live: AtomicUsize,
    created: AtomicUsize,
    enqueued: AtomicUsize,
    fail_create_at: AtomicUsize,
    fail_enqueue_at: AtomicUsize,
}

#[derive(Debug, Clone)]
pub(crate) struct EchoDevice {
    counters: Arc<Counters>,
}

impl EchoDevice {
    pub(crate) fn new() -> Self {
        Self {
            counters: Arc::new(Counters {
                live: AtomicUsize::new(0),
                created: AtomicUsize::new(0),
                enqueued: AtomicUsize::new(0),
                fail_create_at: AtomicUsize::new(NEVER),
                fail_enqueue_at: AtomicUsize::new(NEVER),
            }),
        }
    }

    /// The `n`th stream creation (zero-based) fails.
    pub(crate) fn fail_create_at(&self, n: usize) {
        self.counters.created.store(0, Ordering::SeqCst);
        self.counters.fail_create_at.store(n, Ordering::SeqCst);
    }

    /// The `n`th enqueue (zero-based) fails.
    pub(crate) fn fail_enqueue_at(&self, n: usize) {
        self.counters.enqueued.store(0, Ordering::SeqCst);
        self.counters.fail_enqueue_at.store(n, Ordering::SeqCst);
    }

    pub(crate) fn live_streams(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub(crate) fn enqueued(&self) -> usize {
        self.counters.enqueued.load(Ordering::SeqCst)
    }
}

impl Device for EchoDevice {
    fn name(&self) -> &str {
        "echo"
    }

    fn create_stream(&self, capacity_bytes: usize) -> Result<Box<dyn DeviceStream>> {
        let n = self.counters.created.fetch_add(1, Ordering::SeqCst);
        if n == self.counters.fail_create_at.load(Ordering::SeqCst) {
            return Err(GpumathsError::Device("injected create failure".to_string()));
        }
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(EchoStream {
            buffer: vec![0; capacity_bytes],
            counters: Arc::clone(&self.counters),
            pending: Ok(()),
        }))
    }

    fn reset_device(&self) -> Result<()> {
        Ok(())
    }

    fn start_profiling(&self) -> Result<()> {
        Ok(())
    }

    fn stop_profiling(&self) -> Result<()> {
        Ok(())
    }
}

struct EchoStream {
    buffer: Vec<u8>,
    counters: Arc<Counters>,
    pending: Result<()>,
}

impl DeviceStream for EchoStream {
    fn host_buffer(&self) -> &[u8] {
        &self.buffer
    }

    fn host_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    fn enqueue(&mut self, launch: &Launch) -> Result<()> {
        let n = self.counters.enqueued.fetch_add(1, Ordering::SeqCst);
        if n == self.counters.fail_enqueue_at.load(Ordering::SeqCst) {
            return Err(GpumathsError::Device("injected launch failure".to_string()));
        }
        let layout = launch.layout();
        let arity = launch.kind().arity();
        for slot in 0..launch.slots() {
            for j in 0..arity.outputs {
                let src = layout.input(slot, arity.inputs - arity.outputs + j);
                let dst = layout.output(slot, j);
                self.buffer.copy_within(src, dst.start);
            }
        }
        self.pending = Ok(());
        Ok(())
    }

    fn get_results(&mut self) -> Result<()> {
        std::mem::replace(&mut self.pending, Ok(()))
    }

    fn destroy(self: Box<Self>) -> Result<()> {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
