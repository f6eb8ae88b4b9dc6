/*!
 * Stub OCR engines for detection tests
 *
 * `StubOcr` knows the page-space boxes of a synthetic page and reports the
 * ones lying fully inside each slice, in slice coordinates. Engines can
 * be given a latency and track how many recognise calls overlap.
 */

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use inkbridge::detection::{OcrEngine, OcrEngineFactory, PageSlice, RawDetection};
use inkbridge::errors::OcrError;

pub struct StubOcr {
    detections: Arc<Vec<RawDetection>>,
    failing_slices: Arc<HashSet<usize>>,
    calls: Arc<AtomicUsize>,
    latency: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl OcrEngine for StubOcr {
    async fn activate(&mut self, _language: &str) -> Result<(), OcrError> {
        Ok(())
    }

    async fn recognize(&mut self, slice: &PageSlice) -> Result<Vec<RawDetection>, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_slices.contains(&slice.spec.index) {
            return Err(OcrError::Recognition {
                slice: slice.spec.index,
                message: "unreadable".to_string(),
            });
        }
        let top = slice.spec.y_offset as f32;
        let bottom = (slice.spec.y_offset + slice.spec.height) as f32;
        Ok(self
            .detections
            .iter()
            .filter(|d| d.bbox.y1 >= top && d.bbox.y2 <= bottom)
            .map(|d| RawDetection::new(d.text.clone(), d.confidence, d.bbox.translate(0.0, -top)))
            .collect())
    }
}

/// Factory handing out stub engines that share one synthetic page
#[derive(Clone, Default)]
pub struct StubOcrFactory {
    detections: Arc<Vec<RawDetection>>,
    failing_slices: Arc<HashSet<usize>>,
    calls: Arc<AtomicUsize>,
    latency: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl StubOcrFactory {
    pub fn new(detections: Vec<RawDetection>) -> Self {
        Self {
            detections: Arc::new(detections),
            ..Self::default()
        }
    }

    /// Make the slices with these indices fail
    pub fn failing(mut self, slices: &[usize]) -> Self {
        self.failing_slices = Arc::new(slices.iter().copied().collect());
        self
    }

    /// Sleep this long inside every recognise call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Recognise calls across every engine
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most recognise calls ever running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl OcrEngineFactory for StubOcrFactory {
    fn create(&self, _language: &str) -> Result<Box<dyn OcrEngine>, OcrError> {
        Ok(Box::new(StubOcr {
            detections: self.detections.clone(),
            failing_slices: self.failing_slices.clone(),
            calls: self.calls.clone(),
            latency: self.latency,
            in_flight: self.in_flight.clone(),
            max_in_flight: self.max_in_flight.clone(),
        }))
    }
}
