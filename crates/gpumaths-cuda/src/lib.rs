//! CUDA backend for gpumaths
//!
//! Drives the CUDA driver API through `cudarc`. Each stream owns a
//! page-locked host buffer from `cuMemHostAlloc`, a device buffer of the
//! same size and a CUDA stream; a launch is an async upload, one kernel
//! launch and an async download on that stream.
//!
//! # Kernels
//!
//! The kernels themselves are an external PTX module supplied through
//! [`CudaConfig`], with one entry point per operation kind and width (see
//! [`kernel_symbol`]).
//!
//! # Features
//!
//! Without the `cuda` feature this crate still exports [`CudaDevice`], but
//! every operation on it returns the unsupported error.

#![warn(missing_docs)]

mod config;
#[cfg(feature = "cuda")]
mod device;

pub use config::{
    kernel_symbol, CudaConfig, CudaConfigBuilder, DEFAULT_BLOCK_SIZE, DEFAULT_THREADS_PER_INSTANCE,
};
#[cfg(feature = "cuda")]
pub use device::CudaDevice;

#[cfg(not(feature = "cuda"))]
mod stub {
    gpumaths_core::unavailable_device!(CudaDevice, "CUDA");

    impl CudaDevice {
        /// Opening a device fails when CUDA support is not compiled in.
        pub fn open(_config: crate::CudaConfig) -> gpumaths_core::error::Result<Self> {
            Self::new()
        }
    }
}

#[cfg(not(feature = "cuda"))]
pub use stub::CudaDevice;

/// Open a CUDA device, whichever way this crate was built.
pub fn open_device(config: CudaConfig) -> gpumaths_core::error::Result<CudaDevice> {
    #[cfg(feature = "cuda")]
    {
        CudaDevice::new(config)
    }
    #[cfg(not(feature = "cuda"))]
    {
        CudaDevice::open(config)
    }
}

/// Check if CUDA is available at runtime.
///
/// False when the `cuda` feature is off, the driver library is missing or
/// no device is present. cudarc panics if the library cannot be loaded, so
/// that panic is caught here.
pub fn is_cuda_available() -> bool {
    cuda_device_count() > 0
}

/// Number of CUDA devices visible to the driver.
pub fn cuda_device_count() -> usize {
    #[cfg(feature = "cuda")]
    {
        std::panic::catch_unwind(|| {
            cudarc::driver::CudaContext::device_count()
                .map(|c| c.max(0) as usize)
                .unwrap_or(0)
        })
        .unwrap_or(0)
    }
    #[cfg(not(feature = "cuda"))]
    {
        0
    }
}
