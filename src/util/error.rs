//! Error types for the shadow pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for shadow pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Shadow map resolution is zero or larger than the device allows
    #[error("Invalid shadow map resolution {size} (device maximum: {max})")]
    InvalidResolution { size: u32, max: u32 },

    /// Scan work-group size is not a power of two or exceeds device limits
    #[error("Invalid work-group size {size} (device maximum: {max})")]
    InvalidWorkgroupSize { size: u32, max: u32 },

    /// A tunable parameter is out of its accepted range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The adapter lacks a texture usage or downlevel capability the pipeline needs
    #[error("Unsupported by this adapter: {0}")]
    Unsupported(String),

    /// No GPU adapter matched the request
    #[error("No suitable GPU adapter: {0}")]
    NoAdapter(String),

    /// Adapter refused the device request
    #[error("Failed to create GPU device: {0}")]
    RequestDevice(String),

    /// The device was lost; GPU resources must be recreated
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    /// Out-of-memory or validation error raised while encoding/submitting work
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Mapping a staging buffer back to the host failed
    #[error("Readback failed: {0}")]
    Readback(String),

    /// Writing a debug image failed
    #[error("Export to {path} failed: {reason}")]
    Export { path: PathBuf, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid parameter error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// True for failures that invalidate the device and every resource on it.
    pub fn is_device_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost(_) | Self::Gpu(_))
    }
}

/// Result type alias for shadow pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
