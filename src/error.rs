//! Error types shared across the editor.
//!
//! Each module owns a `thiserror` enum; `EditorError` wraps them for the
//! async workflows that cross module boundaries. Every error exposes a
//! stable machine code through [`ErrorCode`] so notifications and logs can
//! be grouped without matching on display strings.

use crate::raster::RasterError;
use crate::remote::RemoteError;
use crate::session::SessionError;

/// Stable error codes for structured logs and user notifications.
pub trait ErrorCode {
    /// Short upper-case identifier such as `E_LAYER_NOT_FOUND`.
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same operation might succeed.
    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// LAYER ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayerError {
    #[error("layer not found: {0}")]
    NotFound(String),
    #[error("layer already exists: {0}")]
    DuplicateId(String),
    #[error("invalid layer: {0}")]
    Invalid(String),
    #[error("merge requires at least two layers, got {0}")]
    TooFewLayers(usize),
    #[error("invalid mask for layer {0}")]
    InvalidMask(String),
}

impl ErrorCode for LayerError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_LAYER_NOT_FOUND",
            Self::DuplicateId(_) => "E_LAYER_DUPLICATE",
            Self::Invalid(_) => "E_LAYER_INVALID",
            Self::TooFewLayers(_) => "E_MERGE_TOO_FEW",
            Self::InvalidMask(_) => "E_MASK_INVALID",
        }
    }
}

// =============================================================================
// EDITOR ERROR
// =============================================================================

/// Errors surfaced by multi-step workflows.
#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error(transparent)]
    Layer(#[from] LayerError),
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Another operation is in progress")]
    Busy,
}

impl ErrorCode for EditorError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Layer(e) => e.error_code(),
            Self::Raster(e) => e.error_code(),
            Self::Remote(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::Busy => "E_BUSY",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Remote(e) => e.retryable(),
            Self::Busy => true,
            Self::Layer(_) | Self::Raster(_) | Self::Session(_) => false,
        }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
