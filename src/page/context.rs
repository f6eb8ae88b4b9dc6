use std::collections::BTreeMap;
use std::path::PathBuf;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::errors::ErrorCode;
use crate::pipeline::{PageMetrics, Stage};

use super::region::Region;

/// Lifecycle status of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Source and target language codes for a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Per-page working state, mutated in place by every stage
#[derive(Debug, Clone)]
pub struct PageContext {
    pub id: String,
    pub page_index: usize,
    pub languages: LanguagePair,
    pub regions: Vec<Region>,
    pub width: u32,
    pub height: u32,
    pub image_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub intermediate_paths: BTreeMap<String, PathBuf>,
    pub image: Option<DynamicImage>,
    pub status: PageStatus,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub timings: BTreeMap<Stage, f64>,
    pub continuity_debug: serde_json::Value,
    pub metrics: PageMetrics,
    /// Detection already ran, the stage becomes a no-op
    pub detected: bool,
}

impl PageContext {
    pub fn new(id: impl Into<String>, page_index: usize, languages: LanguagePair) -> Self {
        Self {
            id: id.into(),
            page_index,
            languages,
            regions: Vec::new(),
            width: 0,
            height: 0,
            image_path: None,
            output_path: None,
            intermediate_paths: BTreeMap::new(),
            image: None,
            status: PageStatus::Pending,
            error_code: None,
            error_message: None,
            timings: BTreeMap::new(),
            continuity_debug: serde_json::Value::Null,
            metrics: PageMetrics::default(),
            detected: false,
        }
    }

    /// Attach a working image and take its dimensions
    pub fn with_image(mut self, image: DynamicImage) -> Self {
        self.width = image.width();
        self.height = image.height();
        self.image = Some(image);
        self
    }

    pub fn with_image_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_path = Some(path.into());
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Preset regions, marking detection done
    pub fn with_regions(mut self, regions: Vec<Region>) -> Self {
        self.regions = regions;
        self.sort_regions();
        self.detected = true;
        self
    }

    /// Stable top-to-bottom, left-to-right order
    pub fn sort_regions(&mut self) {
        self.regions.sort_by(|a, b| {
            a.bbox
                .y1
                .total_cmp(&b.bbox.y1)
                .then(a.bbox.x1.total_cmp(&b.bbox.x1))
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    pub fn region(&self, id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn region_mut(&mut self, id: &str) -> Option<&mut Region> {
        self.regions.iter_mut().find(|r| r.id == id)
    }

    pub fn fail(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.status = PageStatus::Failed;
        self.error_code = Some(code);
        self.error_message = Some(message.into());
    }

    /// Merge a key into the continuity debug payload
    pub fn record_continuity(&mut self, key: &str, value: serde_json::Value) {
        if !self.continuity_debug.is_object() {
            self.continuity_debug = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.continuity_debug.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }

    /// Succeeded and failed region counts among regions that wanted a translation
    pub fn translation_counts(&self) -> (usize, usize) {
        self.regions
            .iter()
            .filter(|r| r.inpaint_mode == super::InpaintMode::Replace || r.is_failed())
            .fold((0, 0), |(ok, failed), r| {
                if r.is_failed() {
                    (ok, failed + 1)
                } else if r.is_renderable() {
                    (ok + 1, failed)
                } else {
                    (ok, failed)
                }
            })
    }
}
