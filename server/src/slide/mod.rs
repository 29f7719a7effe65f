//! Slide module for reading whole-slide images
//!
//! This module provides:
//! - `SlideCache` keeping one decoder handle per slide file, released when idle
//! - `SlideResource` dispatching to a pyramid decoder or a plain raster image
//! - `RegionPlan` mapping level-0 regions onto scaled output rasters
//! - Label and macro derivation driven by per-vendor policies
//! - `SlideInfo` metadata with physical pixel sizes
//! - `SlideService` tying these together behind path-based operations

mod cache;
mod decoder;
mod derived;
mod metadata;
mod openslide;
mod plain;
mod region;
mod resource;
mod service;
mod types;
mod vendor;

pub use cache::{ReleaseHook, SlideCache, SlideRef, SweepReport, normalize_key, spawn_sweeper};
pub use decoder::{
    BACKGROUND, DecodeError, LABEL_IMAGE, MACRO_IMAGE, PyramidDecoder, PyramidFormat,
    blank_raster, flatten,
};
pub use derived::{
    AssociatedImages, LabelPolicy, PLACEHOLDER_SIZE, placeholder_label, resolve_label,
    resolve_macro,
};
pub use metadata::{SlideInfo, TILE_SIZE};
pub use openslide::{OpenSlideDecoder, OpenSlideFormat};
pub use plain::{PLAIN_VENDOR, PlainImage};
pub use region::{RegionPlan, fit_longest_side, scale_to};
pub use resource::{NO_LABEL_MARKER, ResourceOptions, SlideBacking, SlideResource};
pub use service::SlideService;
pub use types::{LevelDimensions, RegionRequest, SlideError, SlideVariant};
pub use vendor::{LabelCorner, PixelSize, VENDOR_POLICIES, VendorPolicy, policy_for};
