//! CUDA device and streams.

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;

use cudarc::driver::sys as cuda_sys;
use cudarc::driver::{
    CudaContext, CudaFunction, CudaModule, CudaSlice, CudaStream, LaunchConfig, PushKernelArg,
};
use cudarc::nvrtc::Ptx;
use tracing::{debug, info, warn};

use gpumaths_core::device::{Device, DeviceStream, Launch};
use gpumaths_core::error::{GpumathsError, Result};
use gpumaths_core::sizes::{BnWidth, OperationKind};

use crate::config::{kernel_symbol, CudaConfig};

fn driver_error(call: &str, e: impl std::fmt::Display) -> GpumathsError {
    GpumathsError::Device(format!("{} failed: {}", call, e))
}

/// Page-locked host memory from `cuMemHostAlloc`.
struct PinnedBuffer {
    ctx: Arc<CudaContext>,
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the allocation is uniquely owned and only touched by the stream holder.
unsafe impl Send for PinnedBuffer {}

impl PinnedBuffer {
    fn new(ctx: &Arc<CudaContext>, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(GpumathsError::Configuration(
                "Cannot allocate zero-length stream buffer".to_string(),
            ));
        }
        ctx.bind_to_thread()
            .map_err(|e| driver_error("cuCtxSetCurrent", e))?;

        let mut host_ptr: *mut c_void = ptr::null_mut();
        // SAFETY: host_ptr is a valid out-pointer; len is non-zero.
        unsafe {
            let result = cuda_sys::cuMemHostAlloc(&mut host_ptr, len, 0);
            if result != cuda_sys::CUresult::CUDA_SUCCESS {
                return Err(GpumathsError::Device(format!(
                    "cuMemHostAlloc failed for {} bytes: {:?}",
                    len, result
                )));
            }
            ptr::write_bytes(host_ptr as *mut u8, 0, len);
        }

        Ok(Self {
            ctx: Arc::clone(ctx),
            ptr: host_ptr as *mut u8,
            len,
        })
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len bytes until drop.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, &mut self gives exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for PinnedBuffer {
    fn drop(&mut self) {
        let _ = self.ctx.bind_to_thread();
        // SAFETY: allocated by cuMemHostAlloc in new().
        unsafe {
            let result = cuda_sys::cuMemFreeHost(self.ptr as *mut c_void);
            if result != cuda_sys::CUresult::CUDA_SUCCESS {
                warn!(?result, "cuMemFreeHost failed");
            }
        }
    }
}

/// Loaded PTX module with every entry point it provides.
struct KernelModule {
    _module: Arc<CudaModule>,
    functions: HashMap<(OperationKind, BnWidth), CudaFunction>,
}

impl KernelModule {
    fn load(ctx: &Arc<CudaContext>, ptx: &str) -> Result<Self> {
        let module = ctx
            .load_module(Ptx::from_src(ptx))
            .map_err(|e| driver_error("cuModuleLoadData", e))?;

        let mut functions = HashMap::new();
        for width in BnWidth::ALL {
            for kind in OperationKind::ALL {
                let symbol = kernel_symbol(kind, width);
                match module.load_function(&symbol) {
                    Ok(func) => {
                        functions.insert((kind, width), func);
                    }
                    Err(e) => debug!(%symbol, error = %e, "Kernel entry point not in module"),
                }
            }
        }
        if functions.is_empty() {
            return Err(GpumathsError::Configuration(
                "PTX module has no gpumaths entry points".to_string(),
            ));
        }

        Ok(Self {
            _module: module,
            functions,
        })
    }

    fn function(&self, kind: OperationKind, width: BnWidth) -> Result<&CudaFunction> {
        self.functions.get(&(kind, width)).ok_or_else(|| {
            GpumathsError::Device(format!(
                "cuModuleGetFunction failed for '{}': not found",
                kernel_symbol(kind, width)
            ))
        })
    }
}

/// NVIDIA GPU behind the CUDA driver API.
pub struct CudaDevice {
    ctx: Arc<CudaContext>,
    module: Arc<KernelModule>,
    config: CudaConfig,
    name: String,
}

impl std::fmt::Debug for CudaDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaDevice")
            .field("name", &self.name)
            .field("ordinal", &self.config.ordinal)
            .finish()
    }
}

impl CudaDevice {
    /// Open device `config.ordinal` and load its kernel module.
    pub fn new(config: CudaConfig) -> Result<Self> {
        config.validate()?;
        let ptx = config.ptx.as_deref().ok_or_else(|| {
            GpumathsError::Configuration("CUDA device needs a PTX kernel module".to_string())
        })?;

        let ctx = CudaContext::new(config.ordinal).map_err(|e| {
            GpumathsError::Device(format!(
                "Failed to create CUDA device {}: {}",
                config.ordinal, e
            ))
        })?;
        let device_name = ctx
            .name()
            .map_err(|e| GpumathsError::Device(format!("Failed to get device name: {}", e)))?;
        let module = KernelModule::load(&ctx, ptx)?;

        let name = format!("CUDA:{} {}", config.ordinal, device_name);
        info!(
            device = %name,
            kernels = module.functions.len(),
            "Initialized CUDA device"
        );

        Ok(Self {
            ctx,
            module: Arc::new(module),
            config,
            name,
        })
    }

    /// Device configuration.
    pub fn config(&self) -> &CudaConfig {
        &self.config
    }

    /// Underlying cudarc context.
    pub fn inner(&self) -> &Arc<CudaContext> {
        &self.ctx
    }
}

impl Device for CudaDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_stream(&self, capacity_bytes: usize) -> Result<Box<dyn DeviceStream>> {
        // each step releases everything before it on failure
        let host = PinnedBuffer::new(&self.ctx, capacity_bytes)?;
        let stream = self
            .ctx
            .new_stream()
            .map_err(|e| driver_error("cuStreamCreate", e))?;
        let device_buf = stream
            .alloc_zeros::<u8>(capacity_bytes)
            .map_err(|e| driver_error("cuMemAlloc", e))?;

        debug!(capacity = capacity_bytes, "Created CUDA stream");
        Ok(Box::new(CudaDeviceStream {
            ctx: Arc::clone(&self.ctx),
            module: Arc::clone(&self.module),
            config: self.config.clone(),
            host,
            device_buf,
            stream,
        }))
    }

    fn reset_device(&self) -> Result<()> {
        // SAFETY: caller guarantees no stream is in use.
        unsafe {
            let result = cuda_sys::cuDevicePrimaryCtxReset_v2(self.ctx.cu_device());
            if result != cuda_sys::CUresult::CUDA_SUCCESS {
                return Err(GpumathsError::Device(format!(
                    "cuDevicePrimaryCtxReset failed: {:?}",
                    result
                )));
            }
        }
        info!(device = %self.name, "CUDA device reset");
        Ok(())
    }

    fn start_profiling(&self) -> Result<()> {
        self.ctx
            .bind_to_thread()
            .map_err(|e| driver_error("cuCtxSetCurrent", e))?;
        // SAFETY: no arguments; context is current.
        let result = unsafe { cuda_sys::cuProfilerStart() };
        if result != cuda_sys::CUresult::CUDA_SUCCESS {
            return Err(GpumathsError::Device(format!(
                "cuProfilerStart failed: {:?}",
                result
            )));
        }
        Ok(())
    }

    fn stop_profiling(&self) -> Result<()> {
        self.ctx
            .bind_to_thread()
            .map_err(|e| driver_error("cuCtxSetCurrent", e))?;
        // SAFETY: no arguments; context is current.
        let result = unsafe { cuda_sys::cuProfilerStop() };
        if result != cuda_sys::CUresult::CUDA_SUCCESS {
            return Err(GpumathsError::Device(format!(
                "cuProfilerStop failed: {:?}",
                result
            )));
        }
        Ok(())
    }
}

/// One CUDA stream with its pinned host buffer and device buffer.
struct CudaDeviceStream {
    ctx: Arc<CudaContext>,
    module: Arc<KernelModule>,
    config: CudaConfig,
    host: PinnedBuffer,
    device_buf: CudaSlice<u8>,
    stream: Arc<CudaStream>,
}

impl DeviceStream for CudaDeviceStream {
    fn host_buffer(&self) -> &[u8] {
        self.host.as_slice()
    }

    fn host_buffer_mut(&mut self) -> &mut [u8] {
        self.host.as_mut_slice()
    }

    fn enqueue(&mut self, launch: &Launch) -> Result<()> {
        let layout = launch.layout();
        let width = BnWidth::from_bytes(layout.int_bytes()).ok_or_else(|| {
            GpumathsError::Device(format!("No kernels for {}-byte integers", layout.int_bytes()))
        })?;
        let func = self.module.function(launch.kind(), width)?;
        self.ctx
            .bind_to_thread()
            .map_err(|e| driver_error("cuCtxSetCurrent", e))?;

        let upload = launch.upload_len();
        let outputs = layout.outputs_used(launch.slots());

        {
            let mut dst = self.device_buf.slice_mut(0..upload);
            self.stream
                .memcpy_htod(&self.host.as_slice()[..upload], &mut dst)
                .map_err(|e| driver_error("cuMemcpyHtoDAsync", e))?;
        }

        let slots = launch.slots() as u32;
        let inputs_offset = layout.inputs().start as u64;
        let outputs_offset = layout.outputs().start as u64;
        let cfg = LaunchConfig {
            grid_dim: (self.config.grid_size(launch.slots()), 1, 1),
            block_dim: (self.config.block_size, 1, 1),
            shared_mem_bytes: 0,
        };
        let mut builder = self.stream.launch_builder(func);
        builder
            .arg(&mut self.device_buf)
            .arg(&slots)
            .arg(&inputs_offset)
            .arg(&outputs_offset);
        // SAFETY: argument list matches the gpumaths entry point signature.
        unsafe { builder.launch(cfg) }
            .map(|_| ())
            .map_err(|e| driver_error("cuLaunchKernel", e))?;

        let src = self.device_buf.slice(outputs.clone());
        self.stream
            .memcpy_dtoh(&src, &mut self.host.as_mut_slice()[outputs])
            .map_err(|e| driver_error("cuMemcpyDtoHAsync", e))?;
        Ok(())
    }

    fn get_results(&mut self) -> Result<()> {
        self.stream
            .synchronize()
            .map_err(|e| driver_error("cuStreamSynchronize", e))
    }

    fn destroy(self: Box<Self>) -> Result<()> {
        let result = self
            .stream
            .synchronize()
            .map_err(|e| driver_error("cuStreamSynchronize", e));
        // device buffer, stream and pinned buffer are released on drop
        drop(self);
        result
    }
}
