//! Stream pool configuration.

use crate::error::{GpumathsError, Result};
use crate::sizes::{KernelSizes, OperationKind};

/// Host buffer size of each stream in the default pool.
pub const DEFAULT_CAPACITY_BYTES: usize = 65536;

/// Number of streams in the default pool.
pub const DEFAULT_NUM_STREAMS: usize = 2;

/// Configuration for a stream pool. All sizes are in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of streams, and so the maximum number of concurrent chunks.
    pub num_streams: usize,
    /// Host buffer size of every stream.
    pub capacity_bytes: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_streams: DEFAULT_NUM_STREAMS,
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
        }
    }
}

impl PoolConfig {
    /// Creates a configuration with explicit values.
    #[must_use]
    pub fn new(num_streams: usize, capacity_bytes: usize) -> Self {
        Self {
            num_streams,
            capacity_bytes,
        }
    }

    /// Creates a minimal configuration (single stream).
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            num_streams: 1,
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
        }
    }

    /// Creates a configuration whose streams each hold `slots` slots of
    /// `kind` in one chunk.
    #[must_use]
    pub fn containing(
        num_streams: usize,
        slots: usize,
        kind: OperationKind,
        sizes: &KernelSizes,
    ) -> Self {
        Self {
            num_streams,
            capacity_bytes: sizes.stream_size_containing(slots, kind),
        }
    }

    /// Creates a builder starting from the default configuration.
    #[must_use]
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// Checks the configuration can build a pool.
    pub fn validate(&self) -> Result<()> {
        if self.num_streams == 0 {
            return Err(GpumathsError::Configuration(
                "Stream pool needs at least one stream".to_string(),
            ));
        }
        if self.capacity_bytes == 0 {
            return Err(GpumathsError::Configuration(
                "Stream capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for PoolConfig.
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Creates a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a minimal configuration builder.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            config: PoolConfig::minimal(),
        }
    }

    /// Sets the number of streams.
    #[must_use]
    pub fn with_num_streams(mut self, count: usize) -> Self {
        self.config.num_streams = count;
        self
    }

    /// Sets the host buffer size of every stream.
    #[must_use]
    pub fn with_capacity_bytes(mut self, bytes: usize) -> Self {
        self.config.capacity_bytes = bytes;
        self
    }

    /// Sizes every stream to hold `slots` slots of `kind`.
    #[must_use]
    pub fn with_capacity_for(mut self, slots: usize, kind: OperationKind, sizes: &KernelSizes) -> Self {
        self.config.capacity_bytes = sizes.stream_size_containing(slots, kind);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> PoolConfig {
        self.config
    }
}
