//! Error types for accelerator dispatch.

use thiserror::Error;

use crate::sizes::OperationKind;

/// Message carried by every error raised because no accelerator is present.
pub const UNSUPPORTED_MESSAGE: &str = "gpumaths build doesn't support an accelerator stream pool";

/// Result type for gpumaths operations.
pub type Result<T> = std::result::Result<T, GpumathsError>;

/// Errors raised by the dispatch engine and its device backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpumathsError {
    /// Accelerator allocation, execution or transfer failure.
    #[error("Device error: {0}")]
    Device(String),

    /// No accelerator is present in this build or on this host.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Pool or stream construction failed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A direct primitive was handed more slots than one stream holds.
    #[error("{requested} slots is more than this stream's max of {max} for {kind} kernel")]
    TooManySlots {
        /// Operation being launched.
        kind: OperationKind,
        /// Slots the caller asked for.
        requested: usize,
        /// Slots the stream can hold.
        max: usize,
    },

    /// A buffer region does not fit inside the stream buffer.
    #[error("Buffer layout needs {needed} bytes but only {available} are available")]
    LayoutOverflow {
        /// Bytes required by the layout.
        needed: usize,
        /// Bytes in the stream buffer.
        available: usize,
    },
}

impl GpumathsError {
    /// The fixed error returned by every operation when no accelerator exists.
    pub fn unsupported() -> Self {
        Self::Unsupported(UNSUPPORTED_MESSAGE.to_string())
    }

    /// Whether this error came from the device (recoverable by retry or CPU fallback).
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::Device(_) | Self::Unsupported(_))
    }

    /// Whether this error came from pool or stream construction.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::LayoutOverflow { .. })
    }

    /// Re-labels a device failure hit during construction as a configuration error.
    pub fn into_configuration(self) -> Self {
        match self {
            Self::Configuration(_) => self,
            other => Self::Configuration(other.to_string()),
        }
    }
}
