/*!
 * OCR engine that replays page-level detections from sidecar files.
 *
 * A sidecar sits next to a page image as `<image>.ocr.json` and holds a
 * JSON array of `{"text", "confidence", "box": {"x1", "y1", "x2", "y2"}}`
 * entries in page coordinates. Each slice receives the detections that
 * fall inside it; a detection whose center is inside but which crosses the
 * slice edge is clipped and its confidence reduced.
 */

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;

use crate::errors::OcrError;

use super::ocr::{OcrEngine, OcrEngineFactory, RawDetection};
use super::tiling::PageSlice;

/// Confidence multiplier applied to detections clipped at a slice edge
const CLIPPED_CONFIDENCE_FACTOR: f32 = 0.9;

/// Sidecar path for a page image
pub fn sidecar_path(image_path: &Path) -> PathBuf {
    let mut name = image_path.as_os_str().to_os_string();
    name.push(".ocr.json");
    PathBuf::from(name)
}

/// Page-level detections shared by every sidecar engine
#[derive(Debug, Default)]
pub struct SidecarStore {
    pages: RwLock<HashMap<String, Arc<Vec<RawDetection>>>>,
}

impl SidecarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register detections for a page directly
    pub fn insert(&self, page_id: impl Into<String>, detections: Vec<RawDetection>) {
        self.pages.write().insert(page_id.into(), Arc::new(detections));
    }

    /// Load `<image>.ocr.json` for a page, returning the detection count
    pub fn load(&self, page_id: &str, image_path: &Path) -> Result<usize, OcrError> {
        let path = sidecar_path(image_path);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| OcrError::Input(format!("{}: {}", path.display(), e)))?;
        let detections: Vec<RawDetection> = serde_json::from_str(&content)
            .map_err(|e| OcrError::Input(format!("{}: {}", path.display(), e)))?;
        let count = detections.len();
        self.insert(page_id, detections);
        debug!("Loaded {} sidecar detections for page {}", count, page_id);
        Ok(count)
    }

    fn page(&self, page_id: &str) -> Option<Arc<Vec<RawDetection>>> {
        self.pages.read().get(page_id).cloned()
    }
}

/// Replays sidecar detections clipped to each slice
pub struct SidecarOcr {
    store: Arc<SidecarStore>,
    language: Option<String>,
}

impl SidecarOcr {
    pub fn new(store: Arc<SidecarStore>) -> Self {
        Self {
            store,
            language: None,
        }
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    fn slice_detections(detections: &[RawDetection], slice: &PageSlice) -> Vec<RawDetection> {
        let bounds = slice.spec.page_box();
        let dy = -(slice.spec.y_offset as f32);

        detections
            .iter()
            .filter_map(|d| {
                let inside = bounds.contains_point(d.bbox.x1, d.bbox.y1)
                    && bounds.contains_point(d.bbox.x2, d.bbox.y2);
                if inside {
                    return Some(RawDetection::new(
                        d.text.clone(),
                        d.confidence,
                        d.bbox.translate(0.0, dy),
                    ));
                }
                let (cx, cy) = d.bbox.center();
                if !bounds.contains_point(cx, cy) {
                    return None;
                }
                let clipped = d.bbox.clip(&bounds);
                if clipped.is_degenerate() {
                    return None;
                }
                Some(RawDetection::new(
                    d.text.clone(),
                    d.confidence * CLIPPED_CONFIDENCE_FACTOR,
                    clipped.translate(0.0, dy),
                ))
            })
            .collect()
    }
}

#[async_trait]
impl OcrEngine for SidecarOcr {
    async fn activate(&mut self, language: &str) -> Result<(), OcrError> {
        self.language = Some(language.to_string());
        Ok(())
    }

    async fn recognize(&mut self, slice: &PageSlice) -> Result<Vec<RawDetection>, OcrError> {
        match self.store.page(&slice.page_id) {
            Some(detections) => Ok(Self::slice_detections(&detections, slice)),
            None => {
                debug!("No sidecar detections for page {}", slice.page_id);
                Ok(Vec::new())
            }
        }
    }
}

/// Builds sidecar engines over one shared store
#[derive(Clone)]
pub struct SidecarOcrFactory {
    store: Arc<SidecarStore>,
}

impl SidecarOcrFactory {
    pub fn new(store: Arc<SidecarStore>) -> Self {
        Self { store }
    }
}

impl OcrEngineFactory for SidecarOcrFactory {
    fn create(&self, _language: &str) -> Result<Box<dyn OcrEngine>, OcrError> {
        Ok(Box::new(SidecarOcr::new(self.store.clone())))
    }
}
