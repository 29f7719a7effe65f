//! Path-addressed slide operations
//!
//! `SlideService` is the entry point callers use: every operation takes a
//! slide path, borrows the cached slide for the duration of the call and
//! returns a raster or metadata. All methods block on decoding and are meant
//! to be called from worker threads (or `spawn_blocking`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;

use super::cache::{SlideCache, SlideRef, SweepReport, spawn_sweeper};
use super::decoder::PyramidFormat;
use super::metadata::SlideInfo;
use super::types::{RegionRequest, SlideError};

/// Slide operations over a shared [`SlideCache`]
#[derive(Clone)]
pub struct SlideService {
    root: PathBuf,
    cache: Arc<SlideCache>,
}

impl SlideService {
    /// Create a service that opens pyramids with OpenSlide
    pub fn new(config: &Config) -> Self {
        Self::with_cache(&config.slides_dir, Arc::new(SlideCache::new(&config.cache)))
    }

    /// Create a service with a custom pyramid backend
    pub fn with_format(config: &Config, pyramid: Arc<dyn PyramidFormat>) -> Self {
        Self::with_cache(
            &config.slides_dir,
            Arc::new(SlideCache::with_format(&config.cache, pyramid)),
        )
    }

    pub fn with_cache(root: &Path, cache: Arc<SlideCache>) -> Self {
        info!("Slide service rooted at {:?}", root);
        Self {
            root: root.to_path_buf(),
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<SlideCache> {
        &self.cache
    }

    /// Start the periodic idle sweep
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        spawn_sweeper(&self.cache)
    }

    /// Metadata of the slide at `path`
    pub fn info(&self, path: impl AsRef<Path>) -> Result<Arc<SlideInfo>, SlideError> {
        Ok(self.slide(path.as_ref())?.info())
    }

    /// Region `(x, y, width, height)` in level-0 pixels, longest side scaled to `size`
    pub fn region(
        &self,
        path: impl AsRef<Path>,
        x: i64,
        y: i64,
        width: u32,
        height: u32,
        size: u32,
    ) -> Result<RgbImage, SlideError> {
        let request = RegionRequest::new(x, y, width, height, size);
        self.slide(path.as_ref())?.region(&request)
    }

    pub fn thumbnail(&self, path: impl AsRef<Path>, size: u32) -> Result<RgbImage, SlideError> {
        self.slide(path.as_ref())?.thumbnail(size)
    }

    /// Label image; `None` size keeps the native size
    pub fn label(
        &self,
        path: impl AsRef<Path>,
        size: Option<u32>,
    ) -> Result<Option<RgbImage>, SlideError> {
        self.slide(path.as_ref())?.label(size)
    }

    /// Macro image; `None` size keeps the native size
    pub fn macro_image(
        &self,
        path: impl AsRef<Path>,
        size: Option<u32>,
    ) -> Result<Option<RgbImage>, SlideError> {
        self.slide(path.as_ref())?.macro_image(size)
    }

    /// Release every cached slide
    pub fn shutdown(&self) -> SweepReport {
        self.cache.shutdown()
    }

    fn slide(&self, path: &Path) -> Result<SlideRef, SlideError> {
        self.cache.get(&self.resolve(path))
    }

    /// Relative paths are taken from the slides directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
