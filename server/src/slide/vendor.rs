//! Vendor-specific heuristics
//!
//! Scanner vendors disagree on where they store the physical pixel size and
//! on how the label relates to the macro overview. Each vendor gets one row
//! in [`VENDOR_POLICIES`]; anything unlisted falls back to [`DEFAULT_POLICY`].

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

/// Generic micrometers-per-pixel property exposed by OpenSlide
pub const GENERIC_MPP_PROPERTY: &str = "openslide.mpp-x";
/// Property naming the scanner vendor
pub const VENDOR_PROPERTY: &str = "openslide.vendor";

/// Rendered value of an unknown pixel size
pub const UNKNOWN_PIXEL_SIZE: &str = "?";

const MICRONS_TO_MM: f64 = 0.001;
const NANOMETERS_TO_MM: f64 = 0.000_001;

/// How a vendor records its pixel size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelSizeFormula {
    /// Property holds micrometers per pixel
    MicronsPerPixel(&'static str),
    /// Property holds the physical width of level 0 in nanometers
    PhysicalWidthNanometers(&'static str),
}

/// Corner of the macro image the label square is cut from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelCorner {
    TopLeft,
    BottomLeft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorPolicy {
    pub vendor: &'static str,
    pub pixel_size: Option<PixelSizeFormula>,
    pub label_corner: LabelCorner,
    /// Macro image includes the label on its left side
    pub macro_embeds_label: bool,
}

pub const DEFAULT_POLICY: VendorPolicy = VendorPolicy {
    vendor: "",
    pixel_size: None,
    label_corner: LabelCorner::TopLeft,
    macro_embeds_label: false,
};

pub const VENDOR_POLICIES: &[VendorPolicy] = &[
    VendorPolicy {
        vendor: "hamamatsu",
        pixel_size: Some(PixelSizeFormula::PhysicalWidthNanometers(
            "hamamatsu.PhysicalWidth",
        )),
        label_corner: LabelCorner::TopLeft,
        macro_embeds_label: true,
    },
    VendorPolicy {
        vendor: "aperio",
        pixel_size: Some(PixelSizeFormula::MicronsPerPixel("aperio.MPP")),
        label_corner: LabelCorner::TopLeft,
        macro_embeds_label: false,
    },
    VendorPolicy {
        vendor: "trestle",
        pixel_size: Some(PixelSizeFormula::MicronsPerPixel("tiff.YResolution")),
        label_corner: LabelCorner::TopLeft,
        macro_embeds_label: false,
    },
    VendorPolicy {
        vendor: "mirax",
        pixel_size: Some(PixelSizeFormula::MicronsPerPixel(
            "mirax.LAYER_0_LEVEL_0_SECTION.MICROMETER_PER_PIXEL_X",
        )),
        label_corner: LabelCorner::TopLeft,
        macro_embeds_label: false,
    },
    // Leica macros are portrait with the label at the bottom
    VendorPolicy {
        vendor: "leica",
        pixel_size: None,
        label_corner: LabelCorner::BottomLeft,
        macro_embeds_label: false,
    },
];

/// Look up the policy for a vendor, ignoring case
pub fn policy_for(vendor: &str) -> &'static VendorPolicy {
    VENDOR_POLICIES
        .iter()
        .find(|p| p.vendor.eq_ignore_ascii_case(vendor))
        .unwrap_or(&DEFAULT_POLICY)
}

/// Physical size of one pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PixelSize {
    Millimeters(f64),
    Unknown,
}

impl PixelSize {
    pub fn millimeters(&self) -> Option<f64> {
        match self {
            PixelSize::Millimeters(mm) => Some(*mm),
            PixelSize::Unknown => None,
        }
    }
}

impl std::fmt::Display for PixelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelSize::Millimeters(mm) => write!(f, "{}", mm),
            PixelSize::Unknown => f.write_str(UNKNOWN_PIXEL_SIZE),
        }
    }
}

impl Serialize for PixelSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PixelSize::Millimeters(mm) => serializer.serialize_f64(*mm),
            PixelSize::Unknown => serializer.serialize_str(UNKNOWN_PIXEL_SIZE),
        }
    }
}

/// Pixel size from raw properties.
///
/// The generic property wins; otherwise the vendor formula applies. Missing
/// or unparsable values give [`PixelSize::Unknown`].
pub fn pixel_size(
    properties: &IndexMap<String, String>,
    vendor: &str,
    level0_width: u64,
) -> PixelSize {
    if let Some(raw) = properties.get(GENERIC_MPP_PROPERTY) {
        return parse_positive(raw)
            .map(|mpp| PixelSize::Millimeters(mpp * MICRONS_TO_MM))
            .unwrap_or(PixelSize::Unknown);
    }

    let Some(formula) = policy_for(vendor).pixel_size else {
        return PixelSize::Unknown;
    };

    let mm = match formula {
        PixelSizeFormula::MicronsPerPixel(key) => properties
            .get(key)
            .and_then(|raw| parse_positive(raw))
            .map(|mpp| mpp * MICRONS_TO_MM),
        PixelSizeFormula::PhysicalWidthNanometers(key) => properties
            .get(key)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|_| level0_width > 0)
            .map(|nm| nm as f64 * NANOMETERS_TO_MM / level0_width as f64),
    };

    mm.filter(|v| v.is_finite() && *v > 0.0)
        .map(PixelSize::Millimeters)
        .unwrap_or(PixelSize::Unknown)
}

fn parse_positive(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_policy_lookup_is_case_insensitive() {
        assert!(policy_for("Hamamatsu").macro_embeds_label);
        assert_eq!(policy_for("LEICA").label_corner, LabelCorner::BottomLeft);
        assert_eq!(policy_for("unknown-vendor"), &DEFAULT_POLICY);
    }

    #[test]
    fn test_generic_mpp_wins() {
        let p = props(&[("openslide.mpp-x", "0.25"), ("aperio.MPP", "0.5")]);
        assert_eq!(pixel_size(&p, "aperio", 1000), PixelSize::Millimeters(0.00025));
    }

    #[test]
    fn test_aperio_formula() {
        let p = props(&[("aperio.MPP", "0.4990")]);
        let mm = pixel_size(&p, "aperio", 1000).millimeters().unwrap();
        assert!((mm - 0.000499).abs() < 1e-12);
    }

    #[test]
    fn test_hamamatsu_formula() {
        // 20 mm wide slide spread across 40000 pixels
        let p = props(&[("hamamatsu.PhysicalWidth", "20000000")]);
        let mm = pixel_size(&p, "HAMAMATSU", 40000).millimeters().unwrap();
        assert!((mm - 0.0005).abs() < 1e-12);
    }

    #[test]
    fn test_mirax_and_trestle_formulas() {
        let mirax = props(&[(
            "mirax.LAYER_0_LEVEL_0_SECTION.MICROMETER_PER_PIXEL_X",
            "0.2325",
        )]);
        assert!(pixel_size(&mirax, "mirax", 10).millimeters().is_some());

        let trestle = props(&[("tiff.YResolution", "0.5")]);
        assert_eq!(
            pixel_size(&trestle, "trestle", 10),
            PixelSize::Millimeters(0.0005)
        );
    }

    #[test]
    fn test_unknown_sentinel() {
        let p = props(&[("tiff.ImageDescription", "x")]);
        let size = pixel_size(&p, "generic-tiff", 1000);
        assert_eq!(size, PixelSize::Unknown);
        assert_eq!(size.to_string(), "?");
        assert_ne!(size.to_string(), "0");
    }

    #[test]
    fn test_parse_failure_falls_through_to_unknown() {
        let p = props(&[("aperio.MPP", "not-a-number")]);
        assert_eq!(pixel_size(&p, "aperio", 1000), PixelSize::Unknown);

        let p = props(&[("hamamatsu.PhysicalWidth", "20000000")]);
        assert_eq!(pixel_size(&p, "hamamatsu", 0), PixelSize::Unknown);
    }
}
