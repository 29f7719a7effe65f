//! Slide-related types and error definitions

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur when working with slides
#[derive(Debug, Error)]
pub enum SlideError {
    /// The path does not resolve to a readable regular file
    #[error("Slide not found: {0}")]
    NotFound(String),

    /// Neither the pyramid nor the plain-image detector accepts the file
    #[error("Unsupported slide format: {0}")]
    UnsupportedFormat(String),

    /// An underlying decode call failed and could not be degraded locally
    #[error("Failed to decode slide: {0}")]
    Decode(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The cache was shut down and opens no more slides
    #[error("Slide cache is shut down")]
    ShutDown,
}

impl SlideError {
    /// Short machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            SlideError::NotFound(_) => "not_found",
            SlideError::UnsupportedFormat(_) => "unsupported_format",
            SlideError::Decode(_) => "decode_failure",
            SlideError::InvalidArgument(_) => "invalid_argument",
            SlideError::ShutDown => "shut_down",
        }
    }
}

/// Which capability implementation backs a slide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlideVariant {
    /// Multi-resolution pyramid read through OpenSlide
    Pyramid,
    /// Single-resolution image decoded fully into memory
    PlainImage,
}

/// A region request in absolute level-0 pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionRequest {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
    /// Longer side of the output raster
    pub size: u32,
}

impl RegionRequest {
    pub fn new(x: i64, y: i64, width: u32, height: u32, size: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            size,
        }
    }
}

/// Width and height of one pyramid level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelDimensions {
    pub width: u64,
    pub height: u64,
}
