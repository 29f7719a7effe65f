//! Common Test Utilities for Integration Tests
//!
//! A synthetic pyramid backend that paints real pixels, plus slide fixtures.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{DynamicImage, Rgb, RgbImage};
use indexmap::IndexMap;
use slideserve::slide::{DecodeError, PyramidDecoder, PyramidFormat, blank_raster};
use slideserve::{CacheConfig, Config, SlideService};

/// Color of the left half of every synthetic slide
pub const LEFT: Rgb<u8> = Rgb([0, 0, 200]);
/// Color of the right half of every synthetic slide
pub const RIGHT: Rgb<u8> = Rgb([200, 0, 0]);

/// Extension recognized by [`SyntheticFormat`]
pub const SLIDE_EXTENSION: &str = "syn";

/// Description of a synthetic slide
#[derive(Clone)]
pub struct SyntheticSlide {
    pub width: u64,
    pub height: u64,
    pub levels: u32,
    pub properties: IndexMap<String, String>,
    pub associated: HashMap<String, RgbImage>,
}

impl SyntheticSlide {
    pub fn new(width: u64, height: u64) -> Self {
        Self {
            width,
            height,
            levels: 3,
            properties: IndexMap::new(),
            associated: HashMap::new(),
        }
    }

    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn associated(mut self, name: &str, image: RgbImage) -> Self {
        self.associated.insert(name.to_string(), image);
        self
    }

    fn color_at(&self, x: f64, y: f64) -> Option<Rgb<u8>> {
        if x < 0.0 || y < 0.0 || x >= self.width as f64 || y >= self.height as f64 {
            return None;
        }
        if x < self.width as f64 / 2.0 {
            Some(LEFT)
        } else {
            Some(RIGHT)
        }
    }
}

/// Opens every `*.syn` file as the registered synthetic slide
#[derive(Default)]
pub struct SyntheticFormat {
    slides: HashMap<String, SyntheticSlide>,
    open_delay: Duration,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl SyntheticFormat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `slide` under a file name
    pub fn with_slide(mut self, file_name: &str, slide: SyntheticSlide) -> Self {
        self.slides.insert(file_name.to_string(), slide);
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn opened(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opened)
    }

    pub fn released(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.released)
    }

    fn lookup(&self, path: &Path) -> Option<&SyntheticSlide> {
        let name = path.file_name()?.to_str()?;
        self.slides.get(name)
    }
}

impl PyramidFormat for SyntheticFormat {
    fn detect(&self, path: &Path) -> Option<String> {
        let is_synthetic = path
            .extension()
            .is_some_and(|ext| ext == SLIDE_EXTENSION);
        (is_synthetic && self.lookup(path).is_some()).then(|| "synthetic".to_string())
    }

    fn open(&self, path: &Path) -> Result<Box<dyn PyramidDecoder>, DecodeError> {
        let slide = self
            .lookup(path)
            .cloned()
            .ok_or_else(|| DecodeError::Backend(format!("no synthetic slide at {:?}", path)))?;
        std::thread::sleep(self.open_delay);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticDecoder {
            slide,
            released: Arc::clone(&self.released),
        }))
    }
}

/// Decoder whose pixels are a function of level-0 coordinates
pub struct SyntheticDecoder {
    slide: SyntheticSlide,
    released: Arc<AtomicUsize>,
}

impl Drop for SyntheticDecoder {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl PyramidDecoder for SyntheticDecoder {
    fn level_count(&self) -> u32 {
        self.slide.levels
    }

    fn level_dimensions(&self, level: u32) -> Option<(u64, u64)> {
        (level < self.slide.levels).then(|| {
            let factor = 1u64 << (2 * level);
            (
                (self.slide.width / factor).max(1),
                (self.slide.height / factor).max(1),
            )
        })
    }

    fn associated_image_names(&self) -> Vec<String> {
        self.slide.associated.keys().cloned().collect()
    }

    fn read_associated_image(&self, name: &str) -> Result<DynamicImage, DecodeError> {
        self.slide
            .associated
            .get(name)
            .cloned()
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| DecodeError::MissingAssociated(name.to_string()))
    }

    fn paint_region(
        &self,
        target: &mut RgbImage,
        dst: (u32, u32),
        src: (i64, i64),
        size: (u32, u32),
        downsample: f64,
    ) -> Result<(), DecodeError> {
        for j in 0..size.1 {
            for i in 0..size.0 {
                let x = (src.0 + i as i64) as f64 * downsample;
                let y = (src.1 + j as i64) as f64 * downsample;
                let (tx, ty) = (dst.0 + i, dst.1 + j);
                if tx >= target.width() || ty >= target.height() {
                    continue;
                }
                if let Some(color) = self.slide.color_at(x, y) {
                    target.put_pixel(tx, ty, color);
                }
            }
        }
        Ok(())
    }

    fn thumbnail(&self, max_dimension: u32) -> Result<RgbImage, DecodeError> {
        let (w, h) = (self.slide.width as u32, self.slide.height as u32);
        let (tw, th) = slideserve::slide::fit_longest_side(w, h, max_dimension.min(w.max(h)));
        let mut thumb = blank_raster(tw, th);
        let downsample = w.max(h) as f64 / tw.max(th) as f64;
        self.paint_region(&mut thumb, (0, 0), (0, 0), (tw, th), downsample)?;
        Ok(thumb)
    }

    fn properties(&self) -> IndexMap<String, String> {
        self.slide.properties.clone()
    }
}

/// Configuration rooted at `dir` with a long idle TTL
pub fn test_config(dir: &Path) -> Config {
    Config {
        slides_dir: dir.to_path_buf(),
        thumbnail_size: 256,
        cache: CacheConfig {
            idle_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(180),
            suppress_labels: false,
            placeholder_labels: true,
        },
    }
}

/// Service over `format` rooted at `dir`
pub fn test_service(dir: &Path, config: Config, format: SyntheticFormat) -> SlideService {
    SlideService::with_format(&Config { slides_dir: dir.to_path_buf(), ..config }, Arc::new(format))
}

/// Create the on-disk file a synthetic slide is read from
pub fn touch_slide(dir: &Path, file_name: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, b"synthetic slide").expect("failed to write slide file");
    path
}

/// Macro image with a distinct color in each quadrant
pub fn quadrant_macro(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| match (x < width / 2, y < height / 2) {
        (true, true) => Rgb([255, 0, 0]),
        (false, true) => Rgb([0, 255, 0]),
        (true, false) => Rgb([0, 0, 255]),
        (false, false) => Rgb([255, 255, 0]),
    })
}

/// Install a test subscriber once; honors `RUST_LOG`
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
