/*!
 * Slicing tall pages into overlapping bands and mapping detections back.
 *
 * Pages taller than the tiling threshold are cut into bands of a fixed
 * height with a clamped overlap. The last band is moved up so it ends
 * exactly at the page bottom. Two edge bands covering the top and bottom
 * of the page are planned separately so that text near page boundaries is
 * recognised with full context for cross-page continuity.
 */

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::page::{BBox, Region};

use super::ocr::RawDetection;

/// Tiling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileConfig {
    /// Pages taller than this are split into bands
    #[serde(default = "default_tiling_threshold")]
    pub tiling_threshold: u32,

    /// Height of each band
    #[serde(default = "default_tile_height")]
    pub tile_height: u32,

    /// Requested overlap between consecutive bands, clamped on use
    #[serde(default = "default_overlap")]
    pub overlap: u32,

    /// Height of the top and bottom edge bands, zero disables them
    #[serde(default = "default_edge_band_height")]
    pub edge_band_height: u32,

    /// Slices recognised concurrently
    #[serde(default = "default_max_parallel_slices")]
    pub max_parallel_slices: usize,
}

fn default_tiling_threshold() -> u32 {
    2400
}

fn default_tile_height() -> u32 {
    1600
}

fn default_overlap() -> u32 {
    160
}

fn default_edge_band_height() -> u32 {
    400
}

fn default_max_parallel_slices() -> usize {
    4
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            tiling_threshold: default_tiling_threshold(),
            tile_height: default_tile_height(),
            overlap: default_overlap(),
            edge_band_height: default_edge_band_height(),
            max_parallel_slices: default_max_parallel_slices(),
        }
    }
}

/// What part of the page a slice covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceKind {
    Band,
    TopEdge,
    BottomEdge,
}

impl SliceKind {
    pub fn is_edge(&self) -> bool {
        !matches!(self, Self::Band)
    }
}

/// Geometry of one slice in page coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceSpec {
    pub index: usize,
    pub kind: SliceKind,
    pub y_offset: u32,
    pub width: u32,
    pub height: u32,
}

impl SliceSpec {
    /// The slice area as a page-space box
    pub fn page_box(&self) -> BBox {
        BBox::new(
            0.0,
            self.y_offset as f32,
            self.width as f32,
            (self.y_offset + self.height) as f32,
        )
    }
}

/// A slice together with its cropped pixels
#[derive(Debug, Clone)]
pub struct PageSlice {
    /// Page the slice was cut from
    pub page_id: String,
    pub spec: SliceSpec,
    pub image: Option<DynamicImage>,
}

impl PageSlice {
    /// Tag the slice with its page
    pub fn for_page(mut self, page_id: &str) -> Self {
        self.page_id = page_id.to_string();
        self
    }
}

/// Clamp the overlap into `[min(32, tile_height / 4), tile_height / 2]`
pub fn clamp_overlap(tile_height: u32, overlap: u32) -> u32 {
    let lower = 32.min(tile_height / 4);
    let upper = tile_height / 2;
    overlap.clamp(lower, upper.max(lower))
}

/// Plan the main bands for a page of the given size
pub fn plan_slices(width: u32, height: u32, config: &TileConfig) -> Vec<SliceSpec> {
    let tile_height = config.tile_height.max(1);
    if height <= config.tiling_threshold || height <= tile_height {
        return vec![SliceSpec {
            index: 0,
            kind: SliceKind::Band,
            y_offset: 0,
            width,
            height,
        }];
    }

    let overlap = clamp_overlap(tile_height, config.overlap);
    let stride = (tile_height - overlap).max(1);
    let mut slices = Vec::new();
    let mut y = 0u32;

    loop {
        let index = slices.len();
        if y + tile_height >= height {
            slices.push(SliceSpec {
                index,
                kind: SliceKind::Band,
                y_offset: height - tile_height,
                width,
                height: tile_height,
            });
            break;
        }
        slices.push(SliceSpec {
            index,
            kind: SliceKind::Band,
            y_offset: y,
            width,
            height: tile_height,
        });
        y += stride;
    }

    slices
}

/// Plan the top and bottom edge bands, numbered after `first_index`
pub fn plan_edge_bands(
    width: u32,
    height: u32,
    first_index: usize,
    config: &TileConfig,
) -> Vec<SliceSpec> {
    let band = config.edge_band_height;
    if band == 0 || height <= band {
        return Vec::new();
    }
    vec![
        SliceSpec {
            index: first_index,
            kind: SliceKind::TopEdge,
            y_offset: 0,
            width,
            height: band,
        },
        SliceSpec {
            index: first_index + 1,
            kind: SliceKind::BottomEdge,
            y_offset: height - band,
            width,
            height: band,
        },
    ]
}

/// Plan every slice for a page, bands first then edge bands
pub fn plan_page(width: u32, height: u32, config: &TileConfig) -> Vec<SliceSpec> {
    let mut specs = plan_slices(width, height, config);
    let edges = plan_edge_bands(width, height, specs.len(), config);
    specs.extend(edges);
    specs
}

/// Cut an image into slices
pub fn tile(image: &DynamicImage, config: &TileConfig) -> Vec<PageSlice> {
    plan_page(image.width(), image.height(), config)
        .into_iter()
        .map(|spec| PageSlice {
            page_id: String::new(),
            image: Some(image.crop_imm(0, spec.y_offset, spec.width, spec.height)),
            spec,
        })
        .collect()
}

/// Plan slices for a page whose pixels are not loaded
pub fn tile_dimensions(width: u32, height: u32, config: &TileConfig) -> Vec<PageSlice> {
    plan_page(width, height, config)
        .into_iter()
        .map(|spec| PageSlice {
            page_id: String::new(),
            spec,
            image: None,
        })
        .collect()
}

/// Map slice-local detections to page-space regions
pub fn remap(detections: Vec<RawDetection>, spec: &SliceSpec) -> Vec<Region> {
    detections
        .into_iter()
        .enumerate()
        .map(|(n, detection)| {
            let bbox = detection.bbox.translate(0.0, spec.y_offset as f32);
            Region::new(
                format!("s{}-{}", spec.index, n),
                bbox,
                detection.text,
                detection.confidence,
            )
        })
        .collect()
}
