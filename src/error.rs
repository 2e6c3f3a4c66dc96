//! Error taxonomy of the image API.
//!
//! Every failure is recovered at the transport boundary and surfaced as a
//! structured response, so each variant maps to one HTTP status.

use thiserror::Error;

use crate::jpeg_preflight::PreflightError;

#[derive(Debug, Error)]
pub enum ImageApiError {
    /// Bad magic bytes, length mismatch, broken JPEG structure
    #[error("malformed upload: {0}")]
    Malformed(String),

    /// Valid JPEG the decoder cannot handle (progressive, subsampling, dimensions)
    #[error("unsupported image: {0}")]
    Unsupported(String),

    #[error("image too large: {size} bytes (max {max} bytes)")]
    TooLarge { size: usize, max: usize },

    /// Not enough memory headroom, or a working buffer could not be allocated
    #[error("insufficient resources: {0}")]
    InsufficientResources(String),

    /// Entropy-coded data broken or an output bounds violation; earlier rows stay on screen
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("upload conflict: {0}")]
    Conflict(String),

    #[error("firmware update in progress, try again later")]
    Busy,
}

impl ImageApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ImageApiError::Malformed(_) | ImageApiError::Unsupported(_) => 400,
            ImageApiError::TooLarge { .. } => 413,
            ImageApiError::InsufficientResources(_) => 507,
            ImageApiError::Decode(_) => 500,
            ImageApiError::Conflict(_) => 409,
            ImageApiError::Busy => 503,
        }
    }
}

impl From<PreflightError> for ImageApiError {
    fn from(err: PreflightError) -> Self {
        match err {
            PreflightError::NoFrameHeader => ImageApiError::Malformed(err.to_string()),
            _ => ImageApiError::Unsupported(err.to_string()),
        }
    }
}

impl From<tjpgd::Error> for ImageApiError {
    fn from(err: tjpgd::Error) -> Self {
        match err {
            tjpgd::Error::InsufficientMemory => ImageApiError::InsufficientResources(err.to_string()),
            _ => ImageApiError::Decode(err.to_string()),
        }
    }
}
