//! slideserve library
//!
//! Cached access to whole-slide images: scaled regions, thumbnails, label
//! and macro previews, and slide metadata. Exported for the CLI, integration
//! tests and external tooling.

pub mod config;
pub mod slide;

mod test_utils;

// Re-export commonly used types
pub use config::{CacheConfig, Config};
pub use slide::{SlideCache, SlideError, SlideInfo, SlideService};
