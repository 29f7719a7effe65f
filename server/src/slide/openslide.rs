//! Pyramidal slides read through OpenSlide

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage, RgbaImage};
use indexmap::IndexMap;
use openslide_rs::{Address, OpenSlide, Region, Size};
use tracing::debug;

use super::decoder::{DecodeError, PyramidDecoder, PyramidFormat, blank_raster, flatten};
use super::region::fit_longest_side;

/// OpenSlide-backed pyramid detection
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenSlideFormat;

impl PyramidFormat for OpenSlideFormat {
    fn detect(&self, path: &Path) -> Option<String> {
        OpenSlide::detect_vendor(path).ok()
    }

    fn open(&self, path: &Path) -> Result<Box<dyn PyramidDecoder>, DecodeError> {
        let slide = OpenSlide::new(path)
            .map_err(|e| DecodeError::Backend(format!("Failed to open {:?}: {}", path, e)))?;
        Ok(Box::new(OpenSlideDecoder { slide }))
    }
}

/// One open OpenSlide handle; closed when dropped
pub struct OpenSlideDecoder {
    slide: OpenSlide,
}

impl OpenSlideDecoder {
    /// Level with the largest downsample not exceeding `downsample`
    fn best_level(&self, downsample: f64) -> (u32, f64) {
        let level_count = self.slide.get_level_count().unwrap_or(1);
        let mut best_level = 0u32;
        let mut best_downsample = 1.0f64;

        for level in 0..level_count {
            let ds = self.slide.get_level_downsample(level).unwrap_or(1.0);
            if ds <= downsample && ds >= best_downsample {
                best_level = level;
                best_downsample = ds;
            }
        }
        (best_level, best_downsample)
    }
}

impl PyramidDecoder for OpenSlideDecoder {
    fn level_count(&self) -> u32 {
        self.slide.get_level_count().unwrap_or(0)
    }

    fn level_dimensions(&self, level: u32) -> Option<(u64, u64)> {
        self.slide
            .get_level_dimensions(level)
            .ok()
            .map(|d| (d.w as u64, d.h as u64))
    }

    fn associated_image_names(&self) -> Vec<String> {
        self.slide.get_associated_image_names().unwrap_or_default()
    }

    fn read_associated_image(&self, name: &str) -> Result<DynamicImage, DecodeError> {
        if !self.associated_image_names().iter().any(|n| n == name) {
            return Err(DecodeError::MissingAssociated(name.to_string()));
        }
        let rgba = self
            .slide
            .read_associated_image_rgba(name)
            .map_err(|e| DecodeError::Backend(format!("associated image {}: {}", name, e)))?;
        Ok(DynamicImage::ImageRgba8(rgba))
    }

    fn paint_region(
        &self,
        target: &mut RgbImage,
        dst: (u32, u32),
        src: (i64, i64),
        size: (u32, u32),
        downsample: f64,
    ) -> Result<(), DecodeError> {
        if !(downsample.is_finite() && downsample > 0.0) {
            return Err(DecodeError::Backend(format!(
                "invalid downsample {}",
                downsample
            )));
        }

        // OpenSlide addresses are unsigned; trim the part left/above the origin
        let (mut dst_x, mut dst_y) = (dst.0 as i64, dst.1 as i64);
        let (mut src_x, mut src_y) = src;
        let (mut width, mut height) = (size.0 as i64, size.1 as i64);
        if src_x < 0 {
            dst_x -= src_x;
            width += src_x;
            src_x = 0;
        }
        if src_y < 0 {
            dst_y -= src_y;
            height += src_y;
            src_y = 0;
        }
        if width <= 0 || height <= 0 {
            return Ok(());
        }

        let (level, level_downsample) = self.best_level(downsample);
        let level_scale = downsample / level_downsample;
        let read_w = (width as f64 * level_scale).ceil() as u32;
        let read_h = (height as f64 * level_scale).ceil() as u32;

        let region = Region {
            address: Address {
                x: (src_x as f64 * downsample).round() as u32,
                y: (src_y as f64 * downsample).round() as u32,
            },
            level,
            size: Size {
                w: read_w.max(1),
                h: read_h.max(1),
            },
        };
        debug!(
            "Reading region: level={}, pos=({},{}), read={}x{}, out={}x{}",
            level, region.address.x, region.address.y, read_w, read_h, width, height
        );

        let rgba: RgbaImage = self
            .slide
            .read_image_rgba(&region)
            .map_err(|e| DecodeError::Backend(format!("read_region failed: {}", e)))?;

        let rgba = if rgba.dimensions() != (width as u32, height as u32) {
            imageops::resize(&rgba, width as u32, height as u32, FilterType::Triangle)
        } else {
            rgba
        };

        // Transparent pixels lie outside the scanned area and keep the background
        let flattened = flatten(DynamicImage::ImageRgba8(rgba));
        imageops::replace(target, &flattened, dst_x, dst_y);
        Ok(())
    }

    fn thumbnail(&self, max_dimension: u32) -> Result<RgbImage, DecodeError> {
        let (width, height) = self.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::Backend("slide has no level 0".to_string()));
        }
        let (tw, th) = if width.max(height) <= max_dimension as u64 {
            (width as u32, height as u32)
        } else {
            fit_longest_side(width as u32, height as u32, max_dimension)
        };
        let downsample = width.max(height) as f64 / tw.max(th) as f64;

        let mut thumb = blank_raster(tw, th);
        self.paint_region(&mut thumb, (0, 0), (0, 0), (tw, th), downsample)?;
        Ok(thumb)
    }

    fn properties(&self) -> IndexMap<String, String> {
        self.slide
            .get_property_names()
            .into_iter()
            .filter_map(|name| {
                self.slide
                    .get_property_value(&name)
                    .ok()
                    .map(|value| (name, value))
            })
            .collect()
    }

    fn property(&self, name: &str) -> Option<String> {
        self.slide.get_property_value(name).ok()
    }
}
