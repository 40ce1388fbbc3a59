//! CUDA device configuration.

use std::path::Path;

use gpumaths_core::error::{GpumathsError, Result};
use gpumaths_core::sizes::{BnWidth, OperationKind};

/// Threads cooperating on one big-integer instance.
pub const DEFAULT_THREADS_PER_INSTANCE: u32 = 32;

/// Threads per block.
pub const DEFAULT_BLOCK_SIZE: u32 = 128;

/// Configuration for the CUDA device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CudaConfig {
    /// Device ordinal.
    pub ordinal: usize,
    /// PTX module holding one entry point per operation kind and width.
    pub ptx: Option<String>,
    /// Threads cooperating on one slot.
    pub threads_per_instance: u32,
    /// Threads per block.
    pub block_size: u32,
}

impl Default for CudaConfig {
    fn default() -> Self {
        Self {
            ordinal: 0,
            ptx: None,
            threads_per_instance: DEFAULT_THREADS_PER_INSTANCE,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl CudaConfig {
    /// Creates a builder starting from the default configuration.
    #[must_use]
    pub fn builder() -> CudaConfigBuilder {
        CudaConfigBuilder::default()
    }

    /// Checks the launch geometry.
    pub fn validate(&self) -> Result<()> {
        if self.threads_per_instance == 0 || self.block_size == 0 {
            return Err(GpumathsError::Configuration(
                "threads per instance and block size must be non-zero".to_string(),
            ));
        }
        if self.block_size % self.threads_per_instance != 0 {
            return Err(GpumathsError::Configuration(format!(
                "block size {} is not a multiple of {} threads per instance",
                self.block_size, self.threads_per_instance
            )));
        }
        Ok(())
    }

    /// Blocks needed to run `slots` instances.
    pub fn grid_size(&self, slots: usize) -> u32 {
        let threads = slots as u64 * u64::from(self.threads_per_instance);
        threads.div_ceil(u64::from(self.block_size)) as u32
    }
}

/// Builder for CudaConfig.
#[derive(Debug, Default)]
pub struct CudaConfigBuilder {
    config: CudaConfig,
}

impl CudaConfigBuilder {
    /// Sets the device ordinal.
    #[must_use]
    pub fn with_ordinal(mut self, ordinal: usize) -> Self {
        self.config.ordinal = ordinal;
        self
    }

    /// Sets the PTX module source.
    #[must_use]
    pub fn with_ptx(mut self, ptx: impl Into<String>) -> Self {
        self.config.ptx = Some(ptx.into());
        self
    }

    /// Reads the PTX module source from a file.
    pub fn with_ptx_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ptx = std::fs::read_to_string(path).map_err(|e| {
            GpumathsError::Configuration(format!("Failed to read PTX {}: {}", path.display(), e))
        })?;
        self.config.ptx = Some(ptx);
        Ok(self)
    }

    /// Sets threads per slot.
    #[must_use]
    pub fn with_threads_per_instance(mut self, threads: u32) -> Self {
        self.config.threads_per_instance = threads;
        self
    }

    /// Sets threads per block.
    #[must_use]
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.config.block_size = block_size;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> CudaConfig {
        self.config
    }
}

/// PTX entry point for `kind` at `width`, e.g. `gpumaths_exp_2048`.
///
/// Every entry point takes `(u8* buffer, u32 slots, u64 inputs_offset,
/// u64 outputs_offset)` and reads constants from the start of `buffer`.
pub fn kernel_symbol(kind: OperationKind, width: BnWidth) -> String {
    let stem = match kind {
        OperationKind::Exp => "exp",
        OperationKind::ElGamal => "elgamal",
        OperationKind::Mul2 => "mul2",
        OperationKind::Mul3 => "mul3",
        OperationKind::Reveal => "reveal",
        OperationKind::Strip => "strip",
    };
    format!("gpumaths_{}_{}", stem, width.bits())
}
