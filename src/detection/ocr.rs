/*!
 * OCR engine capability and the registry that owns every engine.
 *
 * Engines are created lazily per language by a factory and live inside a
 * single async mutex. Band recognition, edge recognition and language
 * re-initialisation all go through that gate; nothing else can reach an
 * engine.
 */

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::errors::OcrError;
use crate::page::BBox;

use super::tiling::PageSlice;

/// A single detection in slice-local coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub text: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BBox,
}

impl RawDetection {
    pub fn new(text: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox,
        }
    }
}

/// A text detection and recognition engine
#[async_trait]
pub trait OcrEngine: Send {
    /// Switch the engine to a source language
    async fn activate(&mut self, language: &str) -> Result<(), OcrError>;

    /// Recognise text in one slice
    async fn recognize(&mut self, slice: &PageSlice) -> Result<Vec<RawDetection>, OcrError>;
}

/// Creates engines for the registry
pub trait OcrEngineFactory: Send + Sync {
    fn create(&self, language: &str) -> Result<Box<dyn OcrEngine>, OcrError>;
}

/// Owns every OCR engine behind one async mutex
pub struct OcrRegistry {
    factory: Arc<dyn OcrEngineFactory>,
    engines: Mutex<HashMap<String, Box<dyn OcrEngine>>>,
}

impl OcrRegistry {
    pub fn new(factory: Arc<dyn OcrEngineFactory>) -> Self {
        Self {
            factory,
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// Recognise a main band
    pub async fn recognize_band(
        &self,
        slice: &PageSlice,
        language: &str,
    ) -> Result<Vec<RawDetection>, OcrError> {
        let mut engines = self.engines.lock().await;
        let engine = self.engine_for(&mut engines, language).await?;
        let detections = engine.recognize(slice).await?;
        debug!(
            "Band {} at y={} yielded {} detections",
            slice.spec.index,
            slice.spec.y_offset,
            detections.len()
        );
        Ok(detections)
    }

    /// Recognise a top or bottom edge band
    ///
    /// Edge bands feed cross-page continuity, so a failed attempt rebuilds
    /// the engine once and tries again before giving up.
    pub async fn recognize_edge(
        &self,
        slice: &PageSlice,
        language: &str,
    ) -> Result<Vec<RawDetection>, OcrError> {
        let mut engines = self.engines.lock().await;
        let first = {
            let engine = self.engine_for(&mut engines, language).await?;
            engine.recognize(slice).await
        };
        match first {
            Ok(detections) => {
                debug!(
                    "Edge band {:?} yielded {} detections",
                    slice.spec.kind,
                    detections.len()
                );
                Ok(detections)
            }
            Err(e) => {
                warn!("Edge band {:?} failed ({}), rebuilding engine", slice.spec.kind, e);
                engines.remove(language);
                let engine = self.engine_for(&mut engines, language).await?;
                engine.recognize(slice).await
            }
        }
    }

    /// Drop and rebuild the engine for a language
    pub async fn reinitialize(&self, language: &str) -> Result<(), OcrError> {
        let mut engines = self.engines.lock().await;
        engines.remove(language);
        self.engine_for(&mut engines, language).await?;
        info!("OCR engine for '{}' reinitialised", language);
        Ok(())
    }

    /// Number of live engines
    pub async fn engine_count(&self) -> usize {
        self.engines.lock().await.len()
    }

    async fn engine_for<'a>(
        &self,
        engines: &'a mut HashMap<String, Box<dyn OcrEngine>>,
        language: &str,
    ) -> Result<&'a mut Box<dyn OcrEngine>, OcrError> {
        if !engines.contains_key(language) {
            let mut engine = self.factory.create(language)?;
            engine.activate(language).await?;
            debug!("Created OCR engine for '{}'", language);
            engines.insert(language.to_string(), engine);
        }
        engines
            .get_mut(language)
            .ok_or_else(|| OcrError::Initialisation {
                language: language.to_string(),
                message: "engine missing after creation".to_string(),
            })
    }
}
