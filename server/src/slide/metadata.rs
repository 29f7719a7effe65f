//! Slide metadata aggregation

use indexmap::IndexMap;
use serde::Serialize;

use super::decoder::PyramidDecoder;
use super::types::{LevelDimensions, SlideVariant};
use super::vendor::{self, PixelSize, VENDOR_PROPERTY};

/// Tile edge advertised to tiling clients, independent of the file's own tiling
pub const TILE_SIZE: u32 = 256;

/// Metadata for one slide
#[derive(Debug, Clone, Serialize)]
pub struct SlideInfo {
    /// File name without directories
    pub name: String,
    pub variant: SlideVariant,
    /// Level-0 width in pixels
    pub width: u64,
    /// Level-0 height in pixels
    pub height: u64,
    pub tile_width: u32,
    pub tile_height: u32,
    /// File size in bytes
    pub file_size: u64,
    pub pixel_size: PixelSize,
    pub levels: Vec<LevelDimensions>,
    pub vendor: String,
    pub format: String,
    /// Raw vendor properties plus any variant-specific extras
    pub properties: IndexMap<String, String>,
}

impl SlideInfo {
    /// Flatten into the `key=value` property set served to clients
    pub fn to_properties(&self) -> IndexMap<String, String> {
        let mut props = IndexMap::new();
        props.insert("name".to_string(), self.name.clone());
        props.insert("comment".to_string(), String::new());
        props.insert("image.width".to_string(), self.width.to_string());
        props.insert("image.height".to_string(), self.height.to_string());
        props.insert("tile.width".to_string(), self.tile_width.to_string());
        props.insert("tile.height".to_string(), self.tile_height.to_string());
        props.insert("layer.count".to_string(), self.levels.len().to_string());
        for (i, level) in self.levels.iter().enumerate() {
            props.insert(format!("layer.{}.width", i), level.width.to_string());
            props.insert(format!("layer.{}.height", i), level.height.to_string());
        }
        props.insert("image.size".to_string(), self.file_size.to_string());
        props.insert("pixel.size".to_string(), self.pixel_size.to_string());
        for (key, value) in &self.properties {
            props.insert(key.clone(), value.clone());
        }
        props.insert("image.vendor".to_string(), self.vendor.clone());
        props.insert("image.format".to_string(), self.format.clone());
        props
    }
}

/// Metadata of a pyramidal slide
pub fn pyramid_info(
    name: &str,
    file_size: u64,
    format: &str,
    decoder: &dyn PyramidDecoder,
) -> SlideInfo {
    let properties = decoder.properties();
    let (width, height) = decoder.dimensions();

    let levels = (0..decoder.level_count())
        .filter_map(|level| decoder.level_dimensions(level))
        .map(|(width, height)| LevelDimensions { width, height })
        .collect();

    let vendor = properties
        .get(VENDOR_PROPERTY)
        .cloned()
        .unwrap_or_else(|| format.to_string());

    SlideInfo {
        name: name.to_string(),
        variant: SlideVariant::Pyramid,
        width,
        height,
        tile_width: TILE_SIZE,
        tile_height: TILE_SIZE,
        file_size,
        pixel_size: vendor::pixel_size(&properties, &vendor, width),
        levels,
        vendor,
        format: format.to_string(),
        properties,
    }
}
