//! Test Utilities Module
//!
//! Mock decoders and slide fixtures shared by the unit tests.
//! This module is only compiled when running tests.

#![cfg(test)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{DynamicImage, RgbImage};
use indexmap::IndexMap;

use crate::slide::{DecodeError, PyramidDecoder, PyramidFormat};

// ============================================================================
// Mock pyramid decoder
// ============================================================================

/// Arguments of one `paint_region` call
#[derive(Debug, Clone, PartialEq)]
pub struct PaintCall {
    pub dst: (u32, u32),
    pub src: (i64, i64),
    pub size: (u32, u32),
    pub downsample: f64,
}

/// In-memory pyramid that records how it is used
///
/// `paint_region` paints nothing (the slide has no pixel data), so painted
/// rasters stay at their background color.
#[derive(Clone)]
pub struct MockPyramid {
    levels: Vec<(u64, u64)>,
    properties: IndexMap<String, String>,
    associated: HashMap<String, RgbImage>,
    failing_associated: HashSet<String>,
    fail_paint: bool,
    paint_calls: Arc<Mutex<Vec<PaintCall>>>,
    property_reads: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    /// Whether dropping this value counts as releasing a handle
    counts_release: bool,
}

impl MockPyramid {
    pub fn new(levels: &[(u64, u64)]) -> Self {
        Self {
            levels: levels.to_vec(),
            properties: IndexMap::new(),
            associated: HashMap::new(),
            failing_associated: HashSet::new(),
            fail_paint: false,
            paint_calls: Arc::new(Mutex::new(Vec::new())),
            property_reads: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
            counts_release: true,
        }
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_associated(mut self, name: &str, image: RgbImage) -> Self {
        self.associated.insert(name.to_string(), image);
        self
    }

    pub fn failing_associated(mut self, name: &str) -> Self {
        self.failing_associated.insert(name.to_string());
        self
    }

    pub fn failing_paint(mut self) -> Self {
        self.fail_paint = true;
        self
    }

    pub fn paint_calls(&self) -> Arc<Mutex<Vec<PaintCall>>> {
        Arc::clone(&self.paint_calls)
    }

    pub fn property_reads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.property_reads)
    }

    /// Counter of dropped (released) handles
    pub fn released(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.released)
    }
}

impl Drop for MockPyramid {
    fn drop(&mut self) {
        if self.counts_release {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl PyramidDecoder for MockPyramid {
    fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    fn level_dimensions(&self, level: u32) -> Option<(u64, u64)> {
        self.levels.get(level as usize).copied()
    }

    fn associated_image_names(&self) -> Vec<String> {
        self.associated
            .keys()
            .chain(self.failing_associated.iter())
            .cloned()
            .collect()
    }

    fn read_associated_image(&self, name: &str) -> Result<DynamicImage, DecodeError> {
        if self.failing_associated.contains(name) {
            return Err(DecodeError::Backend(format!("corrupt {}", name)));
        }
        self.associated
            .get(name)
            .cloned()
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| DecodeError::MissingAssociated(name.to_string()))
    }

    fn paint_region(
        &self,
        _target: &mut RgbImage,
        dst: (u32, u32),
        src: (i64, i64),
        size: (u32, u32),
        downsample: f64,
    ) -> Result<(), DecodeError> {
        self.paint_calls.lock().unwrap().push(PaintCall {
            dst,
            src,
            size,
            downsample,
        });
        if self.fail_paint {
            return Err(DecodeError::Backend("paint failed".to_string()));
        }
        Ok(())
    }

    fn thumbnail(&self, max_dimension: u32) -> Result<RgbImage, DecodeError> {
        let (w, h) = self.dimensions();
        let (tw, th) = crate::slide::fit_longest_side(w as u32, h as u32, max_dimension);
        Ok(crate::slide::blank_raster(tw, th))
    }

    fn properties(&self) -> IndexMap<String, String> {
        self.property_reads.fetch_add(1, Ordering::SeqCst);
        self.properties.clone()
    }
}

// ============================================================================
// Mock pyramid format
// ============================================================================

/// Pyramid detector that either accepts every file or none
pub struct MockFormat {
    template: Option<MockPyramid>,
    open_delay: Duration,
    opened: Arc<AtomicUsize>,
}

impl MockFormat {
    /// Accepts every file, opening copies of `template`
    pub fn accepting(mut template: MockPyramid) -> Self {
        template.counts_release = false;
        Self {
            template: Some(template),
            open_delay: Duration::ZERO,
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Accepts nothing, so only plain images can be opened
    pub fn rejecting() -> Self {
        Self {
            template: None,
            open_delay: Duration::ZERO,
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every open take at least `delay`
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn opened(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opened)
    }

    /// Counter of released handles opened by this format
    pub fn released(&self) -> Option<Arc<AtomicUsize>> {
        self.template.as_ref().map(|t| t.released())
    }
}

impl PyramidFormat for MockFormat {
    fn detect(&self, _path: &Path) -> Option<String> {
        self.template.as_ref().map(|_| "mock".to_string())
    }

    fn open(&self, _path: &Path) -> Result<Box<dyn PyramidDecoder>, DecodeError> {
        let template = self
            .template
            .as_ref()
            .ok_or_else(|| DecodeError::Backend("not a pyramid".to_string()))?;
        std::thread::sleep(self.open_delay);
        self.opened.fetch_add(1, Ordering::SeqCst);
        let mut decoder = template.clone();
        decoder.counts_release = true;
        Ok(Box::new(decoder))
    }
}
