use std::sync::Arc;

use futures::stream::{self, StreamExt};
use image::DynamicImage;
use log::{debug, info, warn};

use crate::page::PageContext;

use super::consolidate::{consolidate, ConsolidationConfig};
use super::merge::{merge, MergeConfig};
use super::ocr::OcrRegistry;
use super::tiling::{remap, tile, tile_dimensions, PageSlice, TileConfig};

/// Counts produced by one detection run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionSummary {
    pub slices_total: usize,
    pub slices_failed: usize,
    pub raw_detections: usize,
    pub after_merge: usize,
    pub after_consolidation: usize,
}

/// Tiles a page, recognises every slice and consolidates the result
pub struct TiledDetector {
    registry: Arc<OcrRegistry>,
    tiling: TileConfig,
    merge: MergeConfig,
    consolidation: ConsolidationConfig,
}

impl TiledDetector {
    pub fn new(
        registry: Arc<OcrRegistry>,
        tiling: TileConfig,
        merge: MergeConfig,
        consolidation: ConsolidationConfig,
    ) -> Self {
        Self {
            registry,
            tiling,
            merge,
            consolidation,
        }
    }

    pub fn registry(&self) -> &Arc<OcrRegistry> {
        &self.registry
    }

    /// Populate `context.regions` from the page image
    ///
    /// Without an image the slices are planned from the context
    /// dimensions, which is enough for engines that do not read pixels.
    /// A failing slice contributes nothing and is counted; an empty result
    /// is not an error here.
    pub async fn detect(
        &self,
        context: &mut PageContext,
        image: Option<&DynamicImage>,
    ) -> DetectionSummary {
        let slices: Vec<PageSlice> = match image {
            Some(image) => tile(image, &self.tiling),
            None => tile_dimensions(context.width, context.height, &self.tiling),
        }
        .into_iter()
        .map(|s| s.for_page(&context.id))
        .collect();

        let language = context.languages.source.clone();
        let slices_total = slices.len();
        let parallel = self.tiling.max_parallel_slices.max(1);

        let results: Vec<_> = stream::iter(slices)
            .map(|slice| {
                let registry = self.registry.clone();
                let language = language.clone();
                async move {
                    let result = if slice.spec.kind.is_edge() {
                        registry.recognize_edge(&slice, &language).await
                    } else {
                        registry.recognize_band(&slice, &language).await
                    };
                    (slice.spec, result)
                }
            })
            .buffer_unordered(parallel)
            .collect()
            .await;

        let mut slices_failed = 0;
        let mut raw = Vec::new();
        for (spec, result) in results {
            match result {
                Ok(detections) => raw.extend(remap(detections, &spec)),
                Err(e) => {
                    slices_failed += 1;
                    warn!("Page {}: slice {} ({:?}) failed: {}", context.id, spec.index, spec.kind, e);
                }
            }
        }

        let raw_detections = raw.len();
        let merged = merge(raw, &self.merge);
        let after_merge = merged.len();
        let mut regions = consolidate(merged, &self.consolidation);
        for (n, region) in regions.iter_mut().enumerate() {
            region.id = format!("{}-{:03}", context.id, n);
        }
        let after_consolidation = regions.len();

        context.regions = regions;
        context.sort_regions();
        context.detected = true;

        let summary = DetectionSummary {
            slices_total,
            slices_failed,
            raw_detections,
            after_merge,
            after_consolidation,
        };
        context.metrics.slices_total = summary.slices_total;
        context.metrics.slices_failed = summary.slices_failed;
        context.metrics.raw_detections = summary.raw_detections;
        context.metrics.regions_after_merge = summary.after_merge;
        context.metrics.regions_after_consolidation = summary.after_consolidation;

        debug!("Page {}: {:?}", context.id, summary);
        info!(
            "Page {}: detected {} regions from {} slices",
            context.id, after_consolidation, slices_total
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::ocr::RawDetection;
    use crate::detection::sidecar::{SidecarOcrFactory, SidecarStore};
    use crate::page::{BBox, LanguagePair};

    fn detector(store: Arc<SidecarStore>, tile_height: u32) -> TiledDetector {
        let registry = Arc::new(OcrRegistry::new(Arc::new(SidecarOcrFactory::new(store))));
        TiledDetector::new(
            registry,
            TileConfig {
                tiling_threshold: 1000,
                tile_height,
                overlap: 200,
                edge_band_height: 300,
                max_parallel_slices: 3,
            },
            MergeConfig::default(),
            ConsolidationConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_detect_shouldReproduceKnownBoxesForAnyBandHeight() {
        let known = vec![
            RawDetection::new("first line here", 0.95, BBox::new(40.0, 100.0, 400.0, 140.0)),
            RawDetection::new("second bubble", 0.9, BBox::new(100.0, 980.0, 500.0, 1030.0)),
            RawDetection::new("third bubble", 0.92, BBox::new(60.0, 1890.0, 300.0, 1940.0)),
            RawDetection::new("last words", 0.88, BBox::new(200.0, 2900.0, 600.0, 2950.0)),
        ];

        for tile_height in [800, 1000, 1500] {
            let store = Arc::new(SidecarStore::new());
            store.insert("page", known.clone());
            let detector = detector(store, tile_height);
            let mut context = PageContext::new("page", 0, LanguagePair::new("en", "fr"))
                .with_dimensions(800, 3000);

            let summary = detector.detect(&mut context, None).await;

            assert_eq!(summary.slices_failed, 0);
            let boxes: Vec<BBox> = context.regions.iter().map(|r| r.bbox).collect();
            let expected: Vec<BBox> = known.iter().map(|d| d.bbox).collect();
            assert_eq!(boxes, expected, "tile height {}", tile_height);
            assert_eq!(context.regions[0].id, "page-000");
        }
    }
}
