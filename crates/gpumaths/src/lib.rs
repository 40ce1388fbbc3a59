//! # gpumaths
//!
//! Batched modular arithmetic (exponentiation, ElGamal, products, reveal and
//! strip) offloaded to an accelerator shared by many threads through a
//! bounded pool of streams.
//!
//! ## Quick Start
//!
//! ```ignore
//! use gpumaths::prelude::*;
//!
//! let maths = GpuMaths::builder()
//!     .backend(Backend::Auto)
//!     .for_modulus(&p)
//!     .build()?;
//!
//! maths.exp_chunk(&p, &bases, &exponents, &mut results)?;
//! ```
//!
//! ## Backends
//!
//! - **Cuda**: NVIDIA GPUs through the driver API (requires the `cuda` feature)
//! - **Cpu**: software reference device, for testing and fallback
//! - **Unsupported**: every operation returns the unsupported error
//!
//! `Auto` picks CUDA when a device is present. Otherwise it falls back to
//! the CPU device only if that was allowed on the builder, and is
//! unsupported if not.

#![warn(missing_docs)]

use std::sync::Arc;

use num_bigint::BigUint;
use tracing::info;

pub use gpumaths_core;
pub use gpumaths_cpu;
pub use gpumaths_cuda;

use gpumaths_core::backend_stub::unsupported::UnsupportedDevice;
use gpumaths_core::prelude::*;
use gpumaths_cpu::CpuDevice;
use gpumaths_cuda::CudaConfig;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{Backend, GpuMaths, GpuMathsBuilder};
    pub use gpumaths_core::prelude::*;
    pub use gpumaths_cpu::{reference, CpuDevice, CpuDeviceConfig};
    pub use gpumaths_cuda::{is_cuda_available, CudaConfig, CudaDevice};
}

/// Device backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// CUDA if present, otherwise CPU when allowed, otherwise unsupported.
    #[default]
    Auto,
    /// CUDA device; unsupported when none is present.
    Cuda,
    /// CPU reference device.
    Cpu,
    /// No accelerator: every operation is unsupported.
    Unsupported,
}

/// Handle to a stream pool on one device, exposing every chunk operation.
#[derive(Debug)]
pub struct GpuMaths {
    device: Arc<dyn Device>,
    pool: Option<StreamPool>,
    dispatcher: Dispatcher,
    pipelined: bool,
}

impl GpuMaths {
    /// Create a builder.
    pub fn builder() -> GpuMathsBuilder {
        GpuMathsBuilder::new()
    }

    /// Create with the default configuration.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create with a specific backend.
    pub fn with_backend(backend: Backend) -> Result<Self> {
        Self::builder().backend(backend).build()
    }

    /// Whether an accelerator (or the CPU device) backs this handle.
    pub fn is_supported(&self) -> bool {
        self.pool.is_some()
    }

    /// Device in use.
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// The stream pool, or the unsupported error.
    pub fn pool(&self) -> Result<&StreamPool> {
        self.pool.as_ref().ok_or_else(GpumathsError::unsupported)
    }

    /// Dispatcher in use.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Pool statistics, if there is a pool.
    pub fn stats(&self) -> Option<StreamPoolStats> {
        self.pool.as_ref().map(StreamPool::stats)
    }

    /// Run any batch, chunked to fit a stream.
    pub fn run<B>(&self, batch: &mut B) -> Result<()>
    where
        B: KernelBatch + ?Sized,
    {
        let pool = self.pool()?;
        if self.pipelined {
            self.dispatcher.run_pipelined(pool, batch)
        } else {
            self.dispatcher.run_chunk(pool, batch)
        }
    }

    /// `results[i] = bases[i]^exponents[i] mod modulus`.
    pub fn exp_chunk(
        &self,
        modulus: &BigUint,
        bases: &[BigUint],
        exponents: &[BigUint],
        results: &mut [BigUint],
    ) -> Result<()> {
        self.run(&mut ExpBatch::new(modulus, bases, exponents, results))
    }

    /// ElGamal transform, in place over `ecr_keys` and `cyphers`.
    #[allow(clippy::too_many_arguments)]
    pub fn elgamal_chunk(
        &self,
        generator: &BigUint,
        modulus: &BigUint,
        public_key: &BigUint,
        private_keys: &[BigUint],
        keys: &[BigUint],
        ecr_keys: &mut [BigUint],
        cyphers: &mut [BigUint],
    ) -> Result<()> {
        self.run(&mut ElGamalBatch::new(
            generator,
            modulus,
            public_key,
            private_keys,
            keys,
            ecr_keys,
            cyphers,
        ))
    }

    /// `results[i] = a[i] * b[i] mod modulus`.
    pub fn mul2_chunk(
        &self,
        modulus: &BigUint,
        a: &[BigUint],
        b: &[BigUint],
        results: &mut [BigUint],
    ) -> Result<()> {
        self.run(&mut Mul2Batch::new(modulus, a, b, results))
    }

    /// `results[i] = a[i] * b[i] * c[i] mod modulus`.
    pub fn mul3_chunk(
        &self,
        modulus: &BigUint,
        a: &[BigUint],
        b: &[BigUint],
        c: &[BigUint],
        results: &mut [BigUint],
    ) -> Result<()> {
        self.run(&mut Mul3Batch::new(modulus, a, b, c, results))
    }

    /// Reveal, in place over `cyphers`.
    pub fn reveal_chunk(
        &self,
        modulus: &BigUint,
        public_key: &BigUint,
        cyphers: &mut [BigUint],
    ) -> Result<()> {
        self.run(&mut RevealBatch::new(modulus, public_key, cyphers))
    }

    /// Strip precomputations off cyphers into `results`.
    pub fn strip_chunk(
        &self,
        modulus: &BigUint,
        public_key: &BigUint,
        precomputations: &[BigUint],
        cyphers: &[BigUint],
        results: &mut [BigUint],
    ) -> Result<()> {
        self.run(&mut StripBatch::new(
            modulus,
            public_key,
            precomputations,
            cyphers,
            results,
        ))
    }

    /// Reset the device. Caller-serialized; no stream may be in use.
    pub fn reset_device(&self) -> Result<()> {
        self.device.reset_device()
    }

    /// Start the device profiler.
    pub fn start_profiling(&self) -> Result<()> {
        self.device.start_profiling()
    }

    /// Stop the device profiler.
    pub fn stop_profiling(&self) -> Result<()> {
        self.device.stop_profiling()
    }

    /// Release every stream.
    pub fn destroy(self) -> Result<()> {
        match self.pool {
            Some(pool) => pool.destroy(),
            None => Ok(()),
        }
    }
}

/// Builder for [`GpuMaths`].
#[derive(Debug, Default)]
pub struct GpuMathsBuilder {
    backend: Backend,
    device: Option<Arc<dyn Device>>,
    pool: PoolConfig,
    width: Option<BnWidth>,
    modulus: Option<BigUint>,
    cuda: CudaConfig,
    cpu_fallback: bool,
    pipelined: bool,
}

impl GpuMathsBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend.
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Use this device instead of selecting one by backend.
    pub fn device(mut self, device: Arc<dyn Device>) -> Self {
        self.device = Some(device);
        self
    }

    /// Set the stream pool configuration.
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool = config;
        self
    }

    /// Set the integer width explicitly. Ignored if a modulus is also given
    /// through [`GpuMathsBuilder::for_modulus`].
    pub fn width(mut self, width: BnWidth) -> Self {
        self.width = Some(width);
        self
    }

    /// Pick the narrowest width that holds `modulus`. Takes precedence over
    /// [`GpuMathsBuilder::width`].
    pub fn for_modulus(mut self, modulus: &BigUint) -> Self {
        self.modulus = Some(modulus.clone());
        self
    }

    /// Set the CUDA configuration.
    pub fn cuda_config(mut self, config: CudaConfig) -> Self {
        self.cuda = config;
        self
    }

    /// Let `Auto` fall back to the CPU device when no accelerator is present.
    pub fn cpu_fallback(mut self, enabled: bool) -> Self {
        self.cpu_fallback = enabled;
        self
    }

    /// Overlap consecutive chunks on two streams.
    pub fn pipelined(mut self, enabled: bool) -> Self {
        self.pipelined = enabled;
        self
    }

    /// Build the handle.
    ///
    /// A selected backend with no accelerator still builds; its operations
    /// return the unsupported error. A device that is present but cannot be
    /// opened, or whose pool cannot be built, returns a configuration error.
    ///
    /// The width comes from the modulus if one was given, else from
    /// [`GpuMathsBuilder::width`], else 4096 bits.
    pub fn build(self) -> Result<GpuMaths> {
        let width = match (&self.modulus, self.width) {
            (Some(modulus), _) => BnWidth::for_modulus(modulus)?,
            (None, Some(width)) => width,
            (None, None) => BnWidth::Bits4096,
        };
        let dispatcher = Dispatcher::for_width(width);

        let injected = self.device.is_some();
        let device: Arc<dyn Device> = match self.device.clone() {
            Some(device) => device,
            None => self.select_device()?,
        };

        // an injected device always gets a pool, so its construction errors surface
        let pool = if injected || device.is_available() {
            Some(StreamPool::new(Arc::clone(&device), self.pool.clone())?)
        } else {
            info!(device = device.name(), "No accelerator, operations are unsupported");
            None
        };

        info!(
            device = device.name(),
            %width,
            pipelined = self.pipelined,
            "gpumaths ready"
        );

        Ok(GpuMaths {
            device,
            pool,
            dispatcher,
            pipelined: self.pipelined,
        })
    }

    fn select_device(&self) -> Result<Arc<dyn Device>> {
        match self.backend {
            Backend::Cpu => Ok(Arc::new(CpuDevice::new())),
            Backend::Cuda => {
                if !gpumaths_cuda::is_cuda_available() {
                    info!("No CUDA device present");
                    return Ok(Arc::new(UnsupportedDevice::stub()));
                }
                self.open_cuda()
            }
            Backend::Unsupported => Ok(Arc::new(UnsupportedDevice::stub())),
            Backend::Auto => {
                if gpumaths_cuda::is_cuda_available() && self.cuda.ptx.is_some() {
                    info!("Auto-selected CUDA backend");
                    return self.open_cuda();
                }
                if self.cpu_fallback {
                    info!("Auto-selected CPU backend");
                    return Ok(Arc::new(CpuDevice::new()));
                }
                Ok(Arc::new(UnsupportedDevice::stub()))
            }
        }
    }

    /// A CUDA device that is present but fails to open is a configuration error.
    fn open_cuda(&self) -> Result<Arc<dyn Device>> {
        let device = gpumaths_cuda::open_device(self.cuda.clone())
            .map_err(GpumathsError::into_configuration)?;
        Ok(Arc::new(device))
    }
}
