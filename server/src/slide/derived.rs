//! Label and macro preview images
//!
//! Formats disagree on whether a label is exposed at all, so label resolution
//! walks a fallback chain: the real label, a square cut from the macro
//! overview, then a synthetic placeholder.

use image::imageops;
use image::{Rgb, RgbImage};

use super::decoder::{BACKGROUND, LABEL_IMAGE, MACRO_IMAGE};
use super::region::scale_to;
use super::vendor::{LabelCorner, VendorPolicy};

/// Edge length of the placeholder label
pub const PLACEHOLDER_SIZE: u32 = 150;
/// Stroke width of the placeholder drawing
pub const PLACEHOLDER_STROKE: u32 = 3;
/// Color of the placeholder cross and border
pub const PLACEHOLDER_INK: Rgb<u8> = Rgb([128, 128, 128]);

/// Source of associated images for one slide
///
/// Implementations report decode failures as `None`.
pub trait AssociatedImages {
    fn associated(&self, name: &str) -> Option<RgbImage>;
}

/// Label-related switches for one slide
#[derive(Debug, Clone, Copy)]
pub struct LabelPolicy<'a> {
    pub vendor: &'a VendorPolicy,
    pub label_allowed: bool,
    pub placeholder: bool,
}

/// Resolve the label image, scaled to `size` if given
pub fn resolve_label(
    source: &dyn AssociatedImages,
    policy: LabelPolicy<'_>,
    size: Option<u32>,
) -> Option<RgbImage> {
    let mut label = None;

    if policy.label_allowed {
        label = source.associated(LABEL_IMAGE).or_else(|| {
            source
                .associated(MACRO_IMAGE)
                .map(|m| crop_label_from_macro(&m, policy.vendor.label_corner))
        });
    }

    if label.is_none() && policy.placeholder {
        label = Some(placeholder_label());
    }

    label.map(|img| resize_if_requested(img, size))
}

/// Resolve the macro image, scaled to `size` if given
pub fn resolve_macro(
    source: &dyn AssociatedImages,
    policy: LabelPolicy<'_>,
    size: Option<u32>,
) -> Option<RgbImage> {
    let mut macro_image = source.associated(MACRO_IMAGE)?;

    if !policy.label_allowed && policy.vendor.macro_embeds_label {
        macro_image = strip_label_from_macro(&macro_image);
    }

    Some(resize_if_requested(macro_image, size))
}

/// Cut the square label region out of a macro image
pub fn crop_label_from_macro(macro_image: &RgbImage, corner: LabelCorner) -> RgbImage {
    let (width, height) = macro_image.dimensions();
    let side = width.min(height);
    let y = match corner {
        LabelCorner::TopLeft => 0,
        LabelCorner::BottomLeft => height - side,
    };
    imageops::crop_imm(macro_image, 0, y, side, side).to_image()
}

/// Remove the left-hand square occupied by the label.
///
/// Only landscape macros carry an embedded label; others pass through.
pub fn strip_label_from_macro(macro_image: &RgbImage) -> RgbImage {
    let (width, height) = macro_image.dimensions();
    if width <= height {
        return macro_image.clone();
    }
    imageops::crop_imm(macro_image, height, 0, width - height, height).to_image()
}

/// Fixed stand-in for slides without a label: a gray cross in a gray frame
pub fn placeholder_label() -> RgbImage {
    let size = PLACEHOLDER_SIZE;
    let half = (PLACEHOLDER_STROKE / 2) as i64;
    let last = (size - 1) as i64;

    RgbImage::from_fn(size, size, |x, y| {
        let (x, y) = (x as i64, y as i64);
        let border = x <= half || y <= half || x >= last - half || y >= last - half;
        let diagonal = (x - y).abs() <= half || (x + y - last).abs() <= half;
        if border || diagonal {
            PLACEHOLDER_INK
        } else {
            BACKGROUND
        }
    })
}

fn resize_if_requested(image: RgbImage, size: Option<u32>) -> RgbImage {
    match size {
        Some(size) => scale_to(image, size),
        None => image,
    }
}
