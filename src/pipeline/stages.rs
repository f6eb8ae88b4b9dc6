/*!
 * Stage identifiers and the image collaborators consumed by the pipeline.
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::page::Region;

/// Pipeline stages in execution order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Detect,
    Translate,
    Erase,
    Render,
    Upscale,
}

impl Stage {
    /// All stages in the order they run
    pub const ORDER: [Stage; 5] = [
        Stage::Detect,
        Stage::Translate,
        Stage::Erase,
        Stage::Render,
        Stage::Upscale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detect => "detect",
            Self::Translate => "translate",
            Self::Erase => "erase",
            Self::Render => "render",
            Self::Upscale => "upscale",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Removes original glyphs from the page image
///
/// Receives the regions selected by [`erase_targets`].
#[async_trait]
pub trait Eraser: Send + Sync {
    async fn erase(&self, image: DynamicImage, regions: &[Region]) -> Result<DynamicImage>;
}

/// Draws translated text into the page image
///
/// Receives only the regions selected by [`render_targets`]: each has
/// renderable target text and its `bbox` is the layout box to fill.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, image: DynamicImage, regions: &[Region]) -> Result<DynamicImage>;
}

/// Regions whose original glyphs are removed, erase-only ones included
pub fn erase_targets(regions: &[Region]) -> Vec<Region> {
    regions.iter().filter(|r| r.should_erase()).cloned().collect()
}

/// Regions with text to draw, boxed by their layout box
///
/// Failed translations, silenced group members and erase-only regions
/// stay as erased placeholders.
pub fn render_targets(regions: &[Region]) -> Vec<Region> {
    regions
        .iter()
        .filter(|r| r.is_renderable())
        .map(|r| Region {
            bbox: r.layout_box(),
            ..r.clone()
        })
        .collect()
}

/// Upscales the finished page image
#[async_trait]
pub trait Upscaler: Send + Sync {
    async fn upscale(&self, image: DynamicImage) -> Result<DynamicImage>;
}

/// Eraser that paints every erasable box with a flat colour
#[derive(Debug, Clone)]
pub struct BoxFillEraser {
    colour: Rgba<u8>,
    padding: u32,
}

impl BoxFillEraser {
    pub fn new(colour: [u8; 4], padding: u32) -> Self {
        Self {
            colour: Rgba(colour),
            padding,
        }
    }

    fn fill(&self, mut canvas: RgbaImage, regions: &[Region]) -> RgbaImage {
        let (width, height) = canvas.dimensions();
        for region in regions.iter().filter(|r| r.should_erase()) {
            let pad = self.padding as f32;
            let x1 = (region.bbox.x1 - pad).floor().max(0.0) as u32;
            let y1 = (region.bbox.y1 - pad).floor().max(0.0) as u32;
            let x2 = ((region.bbox.x2 + pad).ceil().max(0.0) as u32).min(width);
            let y2 = ((region.bbox.y2 + pad).ceil().max(0.0) as u32).min(height);
            for y in y1..y2 {
                for x in x1..x2 {
                    canvas.put_pixel(x, y, self.colour);
                }
            }
        }
        canvas
    }
}

impl Default for BoxFillEraser {
    fn default() -> Self {
        Self::new([255, 255, 255, 255], 2)
    }
}

#[async_trait]
impl Eraser for BoxFillEraser {
    async fn erase(&self, image: DynamicImage, regions: &[Region]) -> Result<DynamicImage> {
        let eraser = self.clone();
        let regions = regions.to_vec();
        tokio::task::spawn_blocking(move || {
            let canvas = eraser.fill(image.to_rgba8(), &regions);
            DynamicImage::ImageRgba8(canvas)
        })
        .await
        .context("Failed to spawn blocking task for box erasure")
    }
}
