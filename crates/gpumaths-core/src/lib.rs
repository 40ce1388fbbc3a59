//! # gpumaths core
//!
//! Stream-pool dispatch engine for batched modular arithmetic on a shared
//! accelerator.
//!
//! ## Core Abstractions
//!
//! - [`Codec`] - fixed-width wire format for arbitrary-precision integers
//! - [`KernelSizes`] - per-kind sizing and capacity arithmetic
//! - [`Device`] / [`DeviceStream`] - accelerator capability, injected at runtime
//! - [`StreamPool`] - bounded set of streams with blocking checkout
//! - [`Dispatcher`] - one generic chunk / encode / run / decode path for every kind
//!
//! ## Example
//!
//! ```ignore
//! use gpumaths_core::prelude::*;
//!
//! let dispatcher = Dispatcher::for_modulus(&p)?;
//! let pool = StreamPool::new(device, PoolConfig::default())?;
//! dispatcher.exp_chunk(&pool, &p, &bases, &exponents, &mut results)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod backend_stub;
pub mod codec;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod ops;
pub mod pipeline;
pub mod sizes;
pub mod stream;

#[cfg(test)]
mod testing;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::backend_stub::unsupported::UnsupportedDevice;
    pub use crate::codec::{ByteOrder, Codec};
    pub use crate::device::{Device, DeviceStream, Launch};
    pub use crate::dispatch::{Dispatcher, KernelBatch};
    pub use crate::error::*;
    pub use crate::memory::{BufferLayout, HostBuffer, StreamBuffer};
    pub use crate::ops::{ElGamalBatch, ExpBatch, Mul2Batch, Mul3Batch, RevealBatch, StripBatch};
    pub use crate::sizes::{Arity, BnWidth, KernelSizes, OperationKind};
    pub use crate::stream::{
        PoolConfig, PoolConfigBuilder, Stream, StreamGuard, StreamPool, StreamPoolStats,
    };
}

pub use codec::{ByteOrder, Codec};
pub use device::{Device, DeviceStream, Launch};
pub use dispatch::{Dispatcher, KernelBatch};
pub use error::{GpumathsError, Result};
pub use sizes::{BnWidth, KernelSizes, OperationKind};
pub use stream::{PoolConfig, StreamPool};
