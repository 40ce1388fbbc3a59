//! Software device that runs the kernels on the CPU.
//!
//! Each stream keeps a separate "device memory" copy of its buffer. Enqueue
//! uploads the constants and used inputs, then computes on a worker thread;
//! `get_results` joins the worker and downloads the used outputs. The split
//! is real, so the pipelined dispatcher genuinely overlaps two chunks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use num_bigint::BigUint;
use tracing::{debug, info, warn};

use gpumaths_core::codec::{ByteOrder, Codec};
use gpumaths_core::device::{Device, DeviceStream, Launch};
use gpumaths_core::error::{GpumathsError, Result};
use gpumaths_core::memory::HostBuffer;

use crate::reference;

const NEVER: usize = usize::MAX;

/// Configuration for the CPU device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuDeviceConfig {
    /// Name reported by the device.
    pub name: String,
    /// Most streams that may be alive at once, like a device memory limit.
    pub max_streams: Option<usize>,
    /// Byte order kernels read integers in.
    pub wire_order: ByteOrder,
}

impl Default for CpuDeviceConfig {
    fn default() -> Self {
        Self {
            name: "cpu".to_string(),
            max_streams: None,
            wire_order: ByteOrder::LittleEndian,
        }
    }
}

impl CpuDeviceConfig {
    /// Creates a builder starting from the default configuration.
    #[must_use]
    pub fn builder() -> CpuDeviceConfigBuilder {
        CpuDeviceConfigBuilder::default()
    }
}

/// Builder for CpuDeviceConfig.
#[derive(Debug, Default)]
pub struct CpuDeviceConfigBuilder {
    config: CpuDeviceConfig,
}

impl CpuDeviceConfigBuilder {
    /// Sets the device name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Limits how many streams may be alive at once.
    #[must_use]
    pub fn with_max_streams(mut self, max: usize) -> Self {
        self.config.max_streams = Some(max);
        self
    }

    /// Sets the wire byte order.
    #[must_use]
    pub fn with_wire_order(mut self, order: ByteOrder) -> Self {
        self.config.wire_order = order;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> CpuDeviceConfig {
        self.config
    }
}

#[derive(Debug)]
struct DeviceState {
    available: AtomicBool,
    live_streams: AtomicUsize,
    created: AtomicUsize,
    enqueued: AtomicUsize,
    fail_create_at: AtomicUsize,
    fail_enqueue_at: AtomicUsize,
    profiling: AtomicBool,
    resets: AtomicUsize,
}

/// CPU implementation of the device capability.
///
/// Primarily used for testing and as a fallback when no accelerator is
/// present. Cloning shares the device state.
#[derive(Debug, Clone)]
pub struct CpuDevice {
    config: Arc<CpuDeviceConfig>,
    state: Arc<DeviceState>,
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuDevice {
    /// CPU device with the default configuration.
    pub fn new() -> Self {
        Self::with_config(CpuDeviceConfig::default())
    }

    /// CPU device with an explicit configuration.
    pub fn with_config(config: CpuDeviceConfig) -> Self {
        info!(name = %config.name, max_streams = ?config.max_streams, "Initializing CPU device");
        Self {
            config: Arc::new(config),
            state: Arc::new(DeviceState {
                available: AtomicBool::new(true),
                live_streams: AtomicUsize::new(0),
                created: AtomicUsize::new(0),
                enqueued: AtomicUsize::new(0),
                fail_create_at: AtomicUsize::new(NEVER),
                fail_enqueue_at: AtomicUsize::new(NEVER),
                profiling: AtomicBool::new(false),
                resets: AtomicUsize::new(0),
            }),
        }
    }

    /// Device configuration.
    pub fn config(&self) -> &CpuDeviceConfig {
        &self.config
    }

    /// Make the device present or absent. Existing streams keep working.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Streams created and not yet destroyed.
    pub fn live_streams(&self) -> usize {
        self.state.live_streams.load(Ordering::SeqCst)
    }

    /// Kernel launches submitted since creation or the last injected failure.
    pub fn enqueued(&self) -> usize {
        self.state.enqueued.load(Ordering::SeqCst)
    }

    /// Device resets performed.
    pub fn resets(&self) -> usize {
        self.state.resets.load(Ordering::SeqCst)
    }

    /// Whether the profiler is running.
    pub fn is_profiling(&self) -> bool {
        self.state.profiling.load(Ordering::SeqCst)
    }

    /// Make the `n`th stream creation from now (zero-based) fail.
    pub fn fail_create_at(&self, n: usize) {
        self.state.created.store(0, Ordering::SeqCst);
        self.state.fail_create_at.store(n, Ordering::SeqCst);
    }

    /// Make the `n`th kernel launch from now (zero-based) fail.
    pub fn fail_enqueue_at(&self, n: usize) {
        self.state.enqueued.store(0, Ordering::SeqCst);
        self.state.fail_enqueue_at.store(n, Ordering::SeqCst);
    }

    /// Remove any injected failures.
    pub fn clear_faults(&self) {
        self.state.fail_create_at.store(NEVER, Ordering::SeqCst);
        self.state.fail_enqueue_at.store(NEVER, Ordering::SeqCst);
    }
}

impl Device for CpuDevice {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn wire_order(&self) -> ByteOrder {
        self.config.wire_order
    }

    fn is_available(&self) -> bool {
        self.state.available.load(Ordering::SeqCst)
    }

    fn create_stream(&self, capacity_bytes: usize) -> Result<Box<dyn DeviceStream>> {
        if !self.is_available() {
            return Err(GpumathsError::Device(format!(
                "{}: no device present",
                self.config.name
            )));
        }
        let n = self.state.created.fetch_add(1, Ordering::SeqCst);
        if n == self.state.fail_create_at.load(Ordering::SeqCst) {
            return Err(GpumathsError::Device(format!(
                "{}: stream {} allocation failed",
                self.config.name, n
            )));
        }
        if let Some(max) = self.config.max_streams {
            if self.live_streams() >= max {
                return Err(GpumathsError::Device(format!(
                    "{}: out of device memory ({} streams alive)",
                    self.config.name, max
                )));
            }
        }

        let host = HostBuffer::new(capacity_bytes)?;
        let device_mem = vec![0u8; capacity_bytes];
        let live = self.state.live_streams.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(capacity = capacity_bytes, live, "Created CPU stream");

        Ok(Box::new(CpuStream {
            id: n,
            host,
            device_mem: Some(device_mem),
            worker: None,
            wire_order: self.config.wire_order,
            state: Arc::clone(&self.state),
        }))
    }

    fn reset_device(&self) -> Result<()> {
        let live = self.live_streams();
        if live > 0 {
            warn!(live, "Resetting CPU device with live streams");
        }
        self.state.profiling.store(false, Ordering::SeqCst);
        self.state.resets.fetch_add(1, Ordering::SeqCst);
        info!(name = %self.config.name, "CPU device reset");
        Ok(())
    }

    fn start_profiling(&self) -> Result<()> {
        if self.state.profiling.swap(true, Ordering::SeqCst) {
            return Err(GpumathsError::Device("profiler already running".to_string()));
        }
        debug!("CPU profiler started");
        Ok(())
    }

    fn stop_profiling(&self) -> Result<()> {
        if !self.state.profiling.swap(false, Ordering::SeqCst) {
            return Err(GpumathsError::Device("profiler not running".to_string()));
        }
        debug!("CPU profiler stopped");
        Ok(())
    }
}

struct Finished {
    device_mem: Vec<u8>,
    launch: Launch,
    outcome: Result<()>,
}

/// One CPU stream: host staging buffer, device copy and in-flight worker.
struct CpuStream {
    id: usize,
    host: HostBuffer,
    device_mem: Option<Vec<u8>>,
    worker: Option<JoinHandle<Finished>>,
    wire_order: ByteOrder,
    state: Arc<DeviceState>,
}

impl DeviceStream for CpuStream {
    fn host_buffer(&self) -> &[u8] {
        self.host.as_slice()
    }

    fn host_buffer_mut(&mut self) -> &mut [u8] {
        self.host.as_mut_slice()
    }

    fn enqueue(&mut self, launch: &Launch) -> Result<()> {
        let n = self.state.enqueued.fetch_add(1, Ordering::SeqCst);
        if n == self.state.fail_enqueue_at.load(Ordering::SeqCst) {
            return Err(GpumathsError::Device(format!(
                "{} launch failed on stream {}",
                launch.kind(),
                self.id
            )));
        }
        let mut device_mem = self.device_mem.take().ok_or_else(|| {
            GpumathsError::Device(format!("stream {} already has work in flight", self.id))
        })?;

        // upload
        let upload = launch.upload_len();
        device_mem[..upload].copy_from_slice(&self.host.as_slice()[..upload]);

        let launch = launch.clone();
        let order = self.wire_order;
        let spawned = thread::Builder::new()
            .name(format!("gpumaths-cpu-{}", self.id))
            .spawn(move || {
                let outcome = execute(&launch, &mut device_mem, order);
                Finished {
                    device_mem,
                    launch,
                    outcome,
                }
            });
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                // the closure owned the device copy; replace it
                self.device_mem = Some(vec![0u8; self.host.len()]);
                Err(GpumathsError::Device(format!("worker spawn failed: {}", e)))
            }
        }
    }

    fn get_results(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let finished = match worker.join() {
            Ok(finished) => finished,
            Err(_) => {
                self.device_mem = Some(vec![0u8; self.host.len()]);
                return Err(GpumathsError::Device(format!(
                    "stream {} worker panicked",
                    self.id
                )));
            }
        };

        let Finished {
            device_mem,
            launch,
            outcome,
        } = finished;
        if outcome.is_ok() {
            // download
            let outputs = launch.layout().outputs_used(launch.slots());
            self.host.as_mut_slice()[outputs.clone()].copy_from_slice(&device_mem[outputs]);
        }
        self.device_mem = Some(device_mem);
        outcome
    }

    fn destroy(mut self: Box<Self>) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        let live = self.state.live_streams.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(stream = self.id, live, "Destroyed CPU stream");
        Ok(())
    }
}

/// Run one launch against a device memory image.
fn execute(launch: &Launch, mem: &mut [u8], order: ByteOrder) -> Result<()> {
    let layout = launch.layout();
    let kind = launch.kind();
    let arity = kind.arity();
    let codec = Codec::new(layout.int_bytes(), order);

    let constants: Vec<BigUint> = (0..arity.constants)
        .map(|c| codec.decode(&mem[layout.constant(c)]))
        .collect();

    for slot in 0..launch.slots() {
        let inputs: Vec<BigUint> = (0..arity.inputs)
            .map(|i| codec.decode(&mem[layout.input(slot, i)]))
            .collect();
        let outputs = reference::compute_slot(kind, &constants, &inputs).ok_or_else(|| {
            GpumathsError::Device(format!("{} slot {}: no inverse exists", kind, slot))
        })?;
        for (j, value) in outputs.iter().enumerate() {
            codec.encode(value, &mut mem[layout.output(slot, j)]);
        }
    }
    Ok(())
}
