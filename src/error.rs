use std::path::PathBuf;

use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration Error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Capture Error: {0}")]
    Capture(#[from] CaptureError),
    #[error("Detector Error: {0}")]
    Detection(#[from] DetectionError),
    #[error("Session Error: {0}")]
    Session(#[from] SessionError),
    #[error("Output Error: {0}")]
    Output(String),
    #[error("Runtime Error: {0}")]
    Runtime(#[from] std::io::Error),
}

// Capture device errors. Recoverable errors only cost the current frame.
#[derive(Error, Debug, Clone)]
pub enum CaptureError {
    #[error("No usable capture device: {0}")]
    DeviceUnavailable(String),
    #[error("Capture device {0} is not open")]
    NotOpen(String),
    #[error("Failed to read directory {path:?}: {reason}")]
    Directory { path: PathBuf, reason: String },
    #[error("Failed to decode {path:?}: {reason}")]
    Decode { path: PathBuf, reason: String },
    #[error("Frame buffer unavailable: {0}")]
    FrameUnavailable(String),
    #[error("Capture device lost: {0}")]
    DeviceLost(String),
}

impl CaptureError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CaptureError::Decode { .. } | CaptureError::FrameUnavailable(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Frame has zero area ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
    #[error("Row stride {stride} is smaller than a row of {width} pixels at {bytes_per_pixel} bytes")]
    StrideTooSmall {
        stride: usize,
        width: u32,
        bytes_per_pixel: usize,
    },
    #[error("Pixel buffer holds {actual} bytes, expected at least {expected}")]
    BufferTooShort { expected: usize, actual: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("Frame {width}x{height} is too small for detection")]
    FrameTooSmall { width: u32, height: u32 },
    #[error("Invalid detector parameter: {0}")]
    InvalidParameter(String),
    #[error("Detector task failed: {0}")]
    TaskFailed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("Cannot allocate a drawing surface for an empty frame")]
    EmptySurface,
    #[error("Drawing surface of {pixels} pixels exceeds the limit of {limit}")]
    SurfaceTooLarge { pixels: u64, limit: u64 },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session is missing its {0}")]
    Incomplete(&'static str),
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
    #[error("Processing stage failed: {0}")]
    Processing(String),
}
