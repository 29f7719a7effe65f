//! Decoder seam for pyramidal slide formats
//!
//! The pixel decoding itself lives in a native library. These traits describe
//! the small surface the cache needs from it, so the OpenSlide binding and
//! test doubles are interchangeable.

use std::path::Path;

use image::{DynamicImage, Rgb, RgbImage};
use indexmap::IndexMap;
use thiserror::Error;

/// Associated image holding the slide label
pub const LABEL_IMAGE: &str = "label";
/// Associated image holding the low-resolution overview
pub const MACRO_IMAGE: &str = "macro";

/// Background used for areas without pixel data
pub const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Errors raised by a decoder backend
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decoder error: {0}")]
    Backend(String),

    #[error("associated image not present: {0}")]
    MissingAssociated(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recognizes and opens pyramidal slide files
pub trait PyramidFormat: Send + Sync {
    /// Returns a format tag if the file is a slide this backend can open
    fn detect(&self, path: &Path) -> Option<String>;

    /// Open a decoder handle for the file
    fn open(&self, path: &Path) -> Result<Box<dyn PyramidDecoder>, DecodeError>;
}

/// One open pyramidal slide
///
/// Dropping the decoder releases the native handle.
pub trait PyramidDecoder: Send + Sync {
    fn level_count(&self) -> u32;

    fn level_dimensions(&self, level: u32) -> Option<(u64, u64)>;

    fn associated_image_names(&self) -> Vec<String>;

    fn read_associated_image(&self, name: &str) -> Result<DynamicImage, DecodeError>;

    /// Paint a region onto `target` at `dst`.
    ///
    /// `src` is expressed in the coordinate space of the slide as seen after
    /// downsampling by `downsample`, and `size` is the painted extent in that
    /// same space. Areas without slide data are left untouched.
    fn paint_region(
        &self,
        target: &mut RgbImage,
        dst: (u32, u32),
        src: (i64, i64),
        size: (u32, u32),
        downsample: f64,
    ) -> Result<(), DecodeError>;

    /// Thumbnail whose longest side is at most `max_dimension`
    fn thumbnail(&self, max_dimension: u32) -> Result<RgbImage, DecodeError>;

    /// Raw vendor properties, keys already namespaced by the backend
    fn properties(&self) -> IndexMap<String, String>;

    fn property(&self, name: &str) -> Option<String> {
        self.properties().get(name).cloned()
    }

    /// Level-0 dimensions, or (0, 0) if the backend reports none
    fn dimensions(&self) -> (u64, u64) {
        self.level_dimensions(0).unwrap_or((0, 0))
    }
}

/// A white raster of the given size
pub fn blank_raster(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, BACKGROUND)
}

/// Convert any decoded raster to opaque RGB.
///
/// Rasters with an alpha channel are composited over the white background.
pub fn flatten(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other if !other.color().has_alpha() => other.into_rgb8(),
        other => {
            let rgba = other.into_rgba8();
            let mut rgb = blank_raster(rgba.width(), rgba.height());
            for (x, y, pixel) in rgba.enumerate_pixels() {
                let alpha = pixel[3] as u32;
                if alpha == 0 {
                    continue;
                }
                let out = rgb.get_pixel_mut(x, y);
                for c in 0..3 {
                    let src = pixel[c] as u32;
                    let dst = out[c] as u32;
                    out[c] = ((src * alpha + dst * (255 - alpha) + 127) / 255) as u8;
                }
            }
            rgb
        }
    }
}
