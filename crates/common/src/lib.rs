/// Common types and errors for the image-ingest pipeline
use thiserror::Error;

/// Configuration errors, rejected before any worker is touched
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("packed output requires a fixed resize shape")]
    PackedNeedsFixedResize,

    #[error("{option} out of range: {value} (expected {expected})")]
    OutOfRange {
        option: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("invalid {option}: {reason}")]
    Invalid {
        option: &'static str,
        reason: String,
    },

    #[error("configuration cannot change while a batch is registered")]
    BatchActive,
}

/// Per-file probe/decode errors
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to read image file: {0}")]
    Read(String),

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("image changed between probe and fetch: {0}")]
    ShapeChanged(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Device transfer errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device unavailable: {0}")]
    Unavailable(String),

    #[error("device allocation failed: {0}")]
    AllocFailed(String),

    #[error("device copy failed: {0}")]
    CopyFailed(String),
}

/// Top-level pipeline error
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("read error: {0}")]
    Read(#[from] ReadError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error("{0}")]
    Other(String),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Dimensions of a decoded image: rows, columns, planes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageShape {
    #[must_use]
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Number of pixel positions (rows x columns)
    #[must_use]
    pub fn num_pixels(&self) -> usize {
        self.height * self.width
    }

    /// Total number of scalar elements across all planes
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.height * self.width * self.channels
    }
}

impl std::fmt::Display for ImageShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}
