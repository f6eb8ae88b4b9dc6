/*!
 * Common test utilities for the inkbridge test suite
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use image::{Rgb, RgbImage};
use tempfile::TempDir;

use inkbridge::detection::{sidecar_path, RawDetection};
use inkbridge::page::{BBox, LanguagePair, PageContext, Region};
use inkbridge::providers::mock::MockProvider;
use inkbridge::providers::Provider;
use inkbridge::translation::{BatchTranslator, BatchingConfig, FallbackChain};

// Stub OCR engines
pub mod stub_ocr;

/// Route crate logs through env_logger once per test binary
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

pub fn ja_en() -> LanguagePair {
    LanguagePair::new("ja", "en")
}

/// An 800x1000 page with pre-detected regions
pub fn page(id: &str, index: usize, regions: Vec<Region>) -> PageContext {
    PageContext::new(id, index, ja_en())
        .with_dimensions(800, 1000)
        .with_regions(regions)
}

pub fn region(id: &str, x1: f32, y1: f32, x2: f32, y2: f32, text: &str) -> Region {
    Region::new(id, BBox::new(x1, y1, x2, y2), text, 0.9)
}

/// Translator over the given providers, in fallback order
pub fn translator(providers: Vec<MockProvider>, config: BatchingConfig) -> Arc<BatchTranslator> {
    let slots: Vec<Arc<dyn Provider>> = providers
        .into_iter()
        .map(|p| Arc::new(p) as Arc<dyn Provider>)
        .collect();
    Arc::new(BatchTranslator::new(Arc::new(FallbackChain::new(slots)), config))
}

pub fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Write a blank PNG page and its OCR sidecar
pub fn write_page(dir: &Path, name: &str, width: u32, height: u32, detections: &[RawDetection]) -> Result<PathBuf> {
    let path = dir.join(name);
    RgbImage::from_pixel(width, height, Rgb([250, 250, 250])).save(&path)?;
    std::fs::write(sidecar_path(&path), serde_json::to_string(detections)?)?;
    Ok(path)
}
