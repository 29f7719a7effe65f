//! Single-resolution images decoded with the `image` crate
//!
//! Used when OpenSlide does not recognize a file. The whole bitmap is held in
//! memory and every operation works on it directly, so thumbnails and large
//! regions cost a full-resolution resample. There is no pyramid to help.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::imageops;
use image::{ColorType, DynamicImage, ImageFormat, ImageReader, RgbImage};
use indexmap::IndexMap;
use tracing::debug;

use super::decoder::{DecodeError, flatten};
use super::metadata::{SlideInfo, TILE_SIZE};
use super::region::{SCALE_FILTER, shrink_to_fit};
use super::types::{LevelDimensions, SlideVariant};
use super::vendor::PixelSize;

/// Vendor reported for plain images
pub const PLAIN_VENDOR: &str = "image";

/// A fully decoded single-resolution image
pub struct PlainImage {
    pixels: RgbImage,
    format: ImageFormat,
    color: ColorType,
}

impl PlainImage {
    /// Identify a readable raster format from the file contents.
    ///
    /// The extension is ignored; only the leading magic bytes count.
    pub fn detect(path: &Path) -> Option<ImageFormat> {
        let reader = content_reader(path).ok()?;
        reader.format().filter(|f| f.reading_enabled())
    }

    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let reader = content_reader(path)?;
        let format = reader
            .format()
            .ok_or_else(|| DecodeError::Backend(format!("unrecognized image {:?}", path)))?;
        let image = reader.decode()?;
        debug!(
            "Decoded plain image {:?}: {}x{} {:?}",
            path,
            image.width(),
            image.height(),
            format
        );
        Ok(Self::from_image(image, format))
    }

    pub fn from_image(image: DynamicImage, format: ImageFormat) -> Self {
        let color = image.color();
        Self {
            pixels: flatten(image),
            format,
            color,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn format_label(&self) -> &'static str {
        format_label(self.format)
    }

    /// Paint with the same contract as [`PyramidDecoder::paint_region`].
    ///
    /// [`PyramidDecoder::paint_region`]: super::decoder::PyramidDecoder::paint_region
    pub fn paint_region(
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
        let (img_w, img_h) = self.pixels.dimensions();

        // Requested window in level-0 pixels
        let x0 = src.0 as f64 * downsample;
        let y0 = src.1 as f64 * downsample;
        let x1 = x0 + size.0 as f64 * downsample;
        let y1 = y0 + size.1 as f64 * downsample;

        // Part of the window backed by pixel data
        let cx0 = x0.max(0.0).floor();
        let cy0 = y0.max(0.0).floor();
        let cx1 = x1.min(img_w as f64).ceil();
        let cy1 = y1.min(img_h as f64).ceil();
        if cx1 <= cx0 || cy1 <= cy0 {
            return Ok(());
        }

        // Where that part lands in the output
        let dx0 = ((cx0 - x0) / downsample).round().max(0.0) as u32;
        let dy0 = ((cy0 - y0) / downsample).round().max(0.0) as u32;
        let dx1 = (((cx1 - x0) / downsample).round() as u32).min(size.0);
        let dy1 = (((cy1 - y0) / downsample).round() as u32).min(size.1);
        let out_w = dx1.saturating_sub(dx0).max(1);
        let out_h = dy1.saturating_sub(dy0).max(1);

        let crop = imageops::crop_imm(
            &self.pixels,
            cx0 as u32,
            cy0 as u32,
            (cx1 - cx0) as u32,
            (cy1 - cy0) as u32,
        )
        .to_image();
        let scaled = if crop.dimensions() == (out_w, out_h) {
            crop
        } else {
            imageops::resize(&crop, out_w, out_h, SCALE_FILTER)
        };

        imageops::replace(
            target,
            &scaled,
            (dst.0 + dx0) as i64,
            (dst.1 + dy0) as i64,
        );
        Ok(())
    }

    /// Scale the full bitmap down to `max_dimension`
    pub fn thumbnail(&self, max_dimension: u32) -> RgbImage {
        shrink_to_fit(self.pixels.clone(), max_dimension)
    }

    pub fn info(&self, name: &str, file_size: u64) -> SlideInfo {
        let (width, height) = self.pixels.dimensions();
        let label = self.format_label();

        let mut properties = IndexMap::new();
        properties.insert(
            "image.depth".to_string(),
            self.color.bits_per_pixel().to_string(),
        );
        let mode = if self.color.has_color() {
            "color"
        } else {
            "grayscale"
        };
        properties.insert("image.mode".to_string(), mode.to_string());
        properties.insert(
            "image.meta.color_type".to_string(),
            format!("{:?}", self.color).to_lowercase(),
        );
        properties.insert(
            "image.meta.extension".to_string(),
            self.format
                .extensions_str()
                .first()
                .copied()
                .unwrap_or_default()
                .to_string(),
        );

        SlideInfo {
            name: name.to_string(),
            variant: SlideVariant::PlainImage,
            width: width as u64,
            height: height as u64,
            tile_width: TILE_SIZE,
            tile_height: TILE_SIZE,
            file_size,
            pixel_size: PixelSize::Unknown,
            levels: vec![LevelDimensions {
                width: width as u64,
                height: height as u64,
            }],
            vendor: PLAIN_VENDOR.to_string(),
            format: label.to_string(),
            properties,
        }
    }
}

/// Reader whose format comes from the file contents alone
fn content_reader(path: &Path) -> Result<ImageReader<BufReader<File>>, DecodeError> {
    let file = File::open(path)?;
    Ok(ImageReader::new(BufReader::new(file)).with_guessed_format()?)
}

/// Human-readable container name
pub fn format_label(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Tiff => "TIFF",
        ImageFormat::Jpeg => "JPEG",
        ImageFormat::Png => "PNG",
        ImageFormat::Gif => "GIF",
        ImageFormat::Bmp => "BMP",
        ImageFormat::Pnm => "PNM",
        ImageFormat::WebP => "WEBP",
        ImageFormat::Tga => "TGA",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb};

    use crate::slide::decoder::{BACKGROUND, blank_raster};

    /// 200x100 image, left half red, right half blue
    fn two_tone() -> PlainImage {
        let img = RgbImage::from_fn(200, 100, |x, _| {
            if x < 100 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        PlainImage::from_image(DynamicImage::ImageRgb8(img), ImageFormat::Png)
    }

    #[test]
    fn test_paint_full_image_downsampled() {
        let plain = two_tone();
        let mut target = blank_raster(100, 50);
        plain
            .paint_region(&mut target, (0, 0), (0, 0), (100, 50), 2.0)
            .unwrap();
        assert_eq!(target.get_pixel(10, 25), &Rgb([255, 0, 0]));
        assert_eq!(target.get_pixel(90, 25), &Rgb([0, 0, 255]));
    }

    #[test]
    fn test_paint_partially_outside_keeps_white() {
        let plain = two_tone();
        let mut target = blank_raster(100, 100);
        // Level-0 window (150..250, 0..100): half over the blue side, half outside
        plain
            .paint_region(&mut target, (0, 0), (150, 0), (100, 100), 1.0)
            .unwrap();
        assert_eq!(target.get_pixel(10, 10), &Rgb([0, 0, 255]));
        assert_eq!(target.get_pixel(90, 10), &BACKGROUND);
    }

    #[test]
    fn test_paint_entirely_outside_is_noop() {
        let plain = two_tone();
        let mut target = blank_raster(20, 20);
        plain
            .paint_region(&mut target, (0, 0), (-500, -500), (20, 20), 1.0)
            .unwrap();
        assert!(target.pixels().all(|p| *p == BACKGROUND));
    }

    #[test]
    fn test_thumbnail_scales_full_bitmap() {
        let plain = two_tone();
        assert_eq!(plain.thumbnail(50).dimensions(), (50, 25));
        assert_eq!(plain.thumbnail(1000).dimensions(), (200, 100));
    }

    #[test]
    fn test_info_for_grayscale() {
        let gray = GrayImage::from_pixel(30, 20, Luma([5]));
        let plain = PlainImage::from_image(DynamicImage::ImageLuma8(gray), ImageFormat::Tiff);
        let info = plain.info("scan.tif", 600);

        assert_eq!(info.variant, SlideVariant::PlainImage);
        assert_eq!((info.width, info.height), (30, 20));
        assert_eq!(info.levels.len(), 1);
        assert_eq!(info.format, "TIFF");
        assert_eq!(info.vendor, "image");
        assert_eq!(info.properties["image.mode"], "grayscale");
        assert_eq!(info.properties["image.depth"], "8");
        assert_eq!(info.pixel_size, PixelSize::Unknown);
    }

    #[test]
    fn test_detect_and_open_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        RgbImage::from_pixel(4, 3, Rgb([9, 9, 9])).save(&path).unwrap();

        assert_eq!(PlainImage::detect(&path), Some(ImageFormat::Png));
        let plain = PlainImage::open(&path).unwrap();
        assert_eq!(plain.dimensions(), (4, 3));
        assert_eq!(plain.format_label(), "PNG");
    }

    #[test]
    fn test_detect_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.bin");
        std::fs::write(&path, b"definitely not an image").unwrap();
        assert_eq!(PlainImage::detect(&path), None);
    }

    #[test]
    fn test_detect_ignores_image_extension_on_text() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["notes.png", "notes.tif", "notes.jpg"] {
            let path = dir.path().join(name);
            std::fs::write(&path, b"meeting notes, not pixels").unwrap();
            assert_eq!(PlainImage::detect(&path), None, "{}", name);
        }
    }

    #[test]
    fn test_detect_png_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("tiny.png");
        RgbImage::from_pixel(2, 2, Rgb([1, 1, 1])).save(&png).unwrap();
        let renamed = dir.path().join("scan");
        std::fs::rename(&png, &renamed).unwrap();

        assert_eq!(PlainImage::detect(&renamed), Some(ImageFormat::Png));
        assert_eq!(PlainImage::open(&renamed).unwrap().dimensions(), (2, 2));
    }
}
