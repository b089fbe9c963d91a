// THEORY:
// A single error type for the whole library. Inside a tick only a frame whose
// shape does not match the configured sensor is an error; a configuration the
// engine cannot run with is rejected at construction. The remaining variants
// wrap file loading and the blocking detection workers. No frame, or no match,
// is a normal branch of the data flow and never surfaces as an `Err`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FloorError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("frame is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    FrameSize {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    BufferLength { expected: usize, actual: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("detection worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, FloorError>;
