//! Macro for generating unavailable device stubs.
//!
//! When a backend feature (e.g. `cuda`) is disabled the backend crate still
//! exports its device type, so callers never need to conditionally compile
//! against accelerator availability. Every operation of the stub returns the
//! fixed unsupported error.

/// Generate a stub device for an unavailable backend.
///
/// ```ignore
/// gpumaths_core::unavailable_device!(CudaDevice, "CUDA");
/// ```
#[macro_export]
macro_rules! unavailable_device {
    ($device:ident, $name:expr) => {
        /// Stub device when the backend feature is disabled.
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $device;

        impl $device {
            /// Creating the device always fails in this build.
            pub fn new() -> $crate::error::Result<Self> {
                Err($crate::error::GpumathsError::unsupported())
            }

            /// The stub device, for callers that want the error per operation.
            pub fn stub() -> Self {
                Self
            }
        }

        impl $crate::device::Device for $device {
            fn name(&self) -> &str {
                concat!($name, " (unavailable)")
            }

            fn is_available(&self) -> bool {
                false
            }

            fn create_stream(
                &self,
                _capacity_bytes: usize,
            ) -> $crate::error::Result<Box<dyn $crate::device::DeviceStream>> {
                Err($crate::error::GpumathsError::unsupported())
            }

            fn reset_device(&self) -> $crate::error::Result<()> {
                Err($crate::error::GpumathsError::unsupported())
            }

            fn start_profiling(&self) -> $crate::error::Result<()> {
                Err($crate::error::GpumathsError::unsupported())
            }

            fn stop_profiling(&self) -> $crate::error::Result<()> {
                Err($crate::error::GpumathsError::unsupported())
            }
        }
    };
}

/// Device used when no accelerator backend is present at all.
pub mod unsupported {
    crate::unavailable_device!(UnsupportedDevice, "accelerator");
}
