//! One open slide and the state derived from it

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use image::RgbImage;
use metrics::{counter, histogram};
use tracing::{debug, error, warn};

use super::decoder::{DecodeError, PyramidDecoder, PyramidFormat, blank_raster, flatten};
use super::derived::{self, AssociatedImages, LabelPolicy};
use super::metadata::{self, SlideInfo};
use super::plain::PlainImage;
use super::region::{RegionPlan, fit_longest_side};
use super::types::{RegionRequest, SlideError, SlideVariant};
use super::vendor::policy_for;

/// Marker file that suppresses labels for every slide in its directory
pub const NO_LABEL_MARKER: &str = ".nolabel";

/// Server-wide switches applied when a slide is opened
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceOptions {
    pub suppress_labels: bool,
    pub placeholder_labels: bool,
}

/// Decoder state behind a slide
pub enum SlideBacking {
    Pyramid {
        decoder: Box<dyn PyramidDecoder>,
        format: String,
    },
    PlainImage(PlainImage),
}

impl SlideBacking {
    pub fn variant(&self) -> SlideVariant {
        match self {
            SlideBacking::Pyramid { .. } => SlideVariant::Pyramid,
            SlideBacking::PlainImage(_) => SlideVariant::PlainImage,
        }
    }
}

impl AssociatedImages for SlideBacking {
    fn associated(&self, name: &str) -> Option<RgbImage> {
        let SlideBacking::Pyramid { decoder, .. } = self else {
            return None;
        };
        match decoder.read_associated_image(name) {
            Ok(image) => Some(flatten(image)),
            Err(DecodeError::MissingAssociated(_)) => None,
            Err(e) => {
                warn!("Treating associated image {} as absent: {}", name, e);
                counter!("slideserve_decode_failures_total", "op" => "associated").increment(1);
                None
            }
        }
    }
}

/// A cached slide: decoder handle plus memoized metadata and access time
pub struct SlideResource {
    key: String,
    path: PathBuf,
    backing: SlideBacking,
    label_allowed: bool,
    placeholder_labels: bool,
    file_size: u64,
    opened_at: Instant,
    /// Nanoseconds after `opened_at`; only ever moves forward
    last_access: AtomicU64,
    info: OnceLock<Arc<SlideInfo>>,
}

impl SlideResource {
    /// Validate the file and open it with the first variant that accepts it.
    ///
    /// The pyramid backend is tried first; plain images are the fallback.
    pub fn open(
        key: &str,
        path: &Path,
        pyramid: &dyn PyramidFormat,
        options: ResourceOptions,
    ) -> Result<Self, SlideError> {
        let meta = std::fs::metadata(path)
            .map_err(|e| SlideError::NotFound(format!("{}: {}", path.display(), e)))?;
        if !meta.is_file() {
            return Err(SlideError::NotFound(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        File::open(path)
            .map_err(|e| SlideError::NotFound(format!("{}: {}", path.display(), e)))?;

        let backing = if let Some(format) = pyramid.detect(path) {
            debug!("Opening pyramid slide {:?} ({})", path, format);
            let decoder = pyramid
                .open(path)
                .map_err(|e| SlideError::Decode(e.to_string()))?;
            SlideBacking::Pyramid { decoder, format }
        } else if PlainImage::detect(path).is_some() {
            debug!("Opening plain image {:?}", path);
            // Magic bytes alone do not make a readable image
            let plain = PlainImage::open(path).map_err(|e| {
                SlideError::UnsupportedFormat(format!("{}: {}", path.display(), e))
            })?;
            SlideBacking::PlainImage(plain)
        } else {
            return Err(SlideError::UnsupportedFormat(path.display().to_string()));
        };

        let label_allowed = !options.suppress_labels && !has_no_label_marker(path);
        Ok(Self::new(key, path, backing, meta.len(), label_allowed, options))
    }

    pub fn new(
        key: &str,
        path: &Path,
        backing: SlideBacking,
        file_size: u64,
        label_allowed: bool,
        options: ResourceOptions,
    ) -> Self {
        Self {
            key: key.to_string(),
            path: path.to_path_buf(),
            backing,
            label_allowed,
            placeholder_labels: options.placeholder_labels,
            file_size,
            opened_at: Instant::now(),
            last_access: AtomicU64::new(0),
            info: OnceLock::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directories
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.key.clone())
    }

    pub fn variant(&self) -> SlideVariant {
        self.backing.variant()
    }

    pub fn label_allowed(&self) -> bool {
        self.label_allowed
    }

    /// Record a read access
    pub fn touch(&self) {
        let now = self.opened_at.elapsed().as_nanos() as u64;
        self.last_access.fetch_max(now, Ordering::Relaxed);
    }

    pub fn last_access(&self) -> Instant {
        self.opened_at + Duration::from_nanos(self.last_access.load(Ordering::Relaxed))
    }

    /// Time since the last read access
    pub fn idle_for(&self) -> Duration {
        self.last_access().elapsed()
    }

    /// Metadata, computed on first use and kept for the resource's lifetime
    pub fn info(&self) -> Arc<SlideInfo> {
        self.touch();
        Arc::clone(self.info.get_or_init(|| {
            let name = self.name();
            let info = match &self.backing {
                SlideBacking::Pyramid { decoder, format } => {
                    metadata::pyramid_info(&name, self.file_size, format, decoder.as_ref())
                }
                SlideBacking::PlainImage(plain) => plain.info(&name, self.file_size),
            };
            Arc::new(info)
        }))
    }

    /// Thumbnail whose longest side is `max_dimension`, or the full image if smaller.
    ///
    /// Pyramids read from their best pre-computed level. Plain images resample
    /// the whole full-resolution bitmap, which is much slower on large files.
    pub fn thumbnail(&self, max_dimension: u32) -> Result<RgbImage, SlideError> {
        if max_dimension == 0 {
            return Err(SlideError::InvalidArgument(
                "thumbnail size must be positive".to_string(),
            ));
        }
        self.touch();

        match &self.backing {
            SlideBacking::Pyramid { decoder, .. } => match decoder.thumbnail(max_dimension) {
                Ok(thumb) => Ok(thumb),
                Err(e) => {
                    error!("Failed to create thumbnail for {}: {}", self.key, e);
                    counter!("slideserve_decode_failures_total", "op" => "thumbnail")
                        .increment(1);
                    let (w, h) = decoder.dimensions();
                    let (tw, th) = if w.max(h) <= max_dimension as u64 && w > 0 && h > 0 {
                        (w as u32, h as u32)
                    } else {
                        fit_longest_side(w as u32, h as u32, max_dimension)
                    };
                    Ok(blank_raster(tw, th))
                }
            },
            SlideBacking::PlainImage(plain) => Ok(plain.thumbnail(max_dimension)),
        }
    }

    /// Region in absolute level-0 coordinates, scaled so its longer side is `request.size`
    pub fn region(&self, request: &RegionRequest) -> Result<RgbImage, SlideError> {
        let plan = RegionPlan::compute(request)?;
        self.touch();

        let start = Instant::now();
        let raster = plan.render(|target, plan| {
            let src = (plan.source_x, plan.source_y);
            let size = (plan.output_width, plan.output_height);
            match &self.backing {
                SlideBacking::Pyramid { decoder, .. } => {
                    decoder.paint_region(target, (0, 0), src, size, plan.downsample)
                }
                SlideBacking::PlainImage(plain) => {
                    plain.paint_region(target, (0, 0), src, size, plan.downsample)
                }
            }
        });
        histogram!("slideserve_region_duration_seconds").record(start.elapsed());

        Ok(raster)
    }

    /// Label image, or `None` when there is none and placeholders are disabled
    pub fn label(&self, size: Option<u32>) -> Result<Option<RgbImage>, SlideError> {
        check_size(size)?;
        let vendor = self.info().vendor.clone();
        let label = derived::resolve_label(&self.backing, self.label_policy(&vendor), size);
        self.touch();
        Ok(label)
    }

    /// Macro overview image, or `None` if the slide has none
    pub fn macro_image(&self, size: Option<u32>) -> Result<Option<RgbImage>, SlideError> {
        check_size(size)?;
        let vendor = self.info().vendor.clone();
        let macro_image = derived::resolve_macro(&self.backing, self.label_policy(&vendor), size);
        self.touch();
        Ok(macro_image)
    }

    /// Release the decoder handle
    pub fn dispose(self) {
        debug!("Disposing slide {} ({:?})", self.key, self.variant());
        counter!("slideserve_slides_disposed_total").increment(1);
        drop(self.backing);
    }

    fn label_policy(&self, vendor: &str) -> LabelPolicy<'static> {
        LabelPolicy {
            vendor: policy_for(vendor),
            label_allowed: self.label_allowed,
            placeholder: self.placeholder_labels,
        }
    }
}

fn check_size(size: Option<u32>) -> Result<(), SlideError> {
    match size {
        Some(0) => Err(SlideError::InvalidArgument(
            "image size must be positive".to_string(),
        )),
        _ => Ok(()),
    }
}

fn has_no_label_marker(path: &Path) -> bool {
    path.parent()
        .map(|dir| dir.join(NO_LABEL_MARKER).exists())
        .unwrap_or(false)
}
