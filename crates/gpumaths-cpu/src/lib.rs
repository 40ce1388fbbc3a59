//! # gpumaths CPU backend
//!
//! A software device that honours the same stream contract as an
//! accelerator: a host staging buffer, an upload, an asynchronous kernel
//! run and a download. It runs the reference arithmetic in [`reference`],
//! which is also the oracle accelerator results are checked against.
//!
//! Used for testing and as a fallback when no accelerator is present.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod device;
pub mod reference;

pub use device::{CpuDevice, CpuDeviceConfig, CpuDeviceConfigBuilder};
