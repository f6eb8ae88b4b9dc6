/*!
 * Detection tests: tiling, remapping and merging over synthetic pages
 */

use std::sync::Arc;
use std::time::Duration;

use inkbridge::detection::tiling::tile_dimensions;
use inkbridge::detection::{
    merge, remap, ConsolidationConfig, MergeConfig, OcrEngine, OcrEngineFactory, OcrRegistry, RawDetection, TileConfig,
    TiledDetector,
};
use inkbridge::page::{BBox, PageContext, Region};

use crate::common::stub_ocr::StubOcrFactory;
use crate::common::{init_logging, ja_en};

const PAGE_WIDTH: u32 = 800;
const PAGE_HEIGHT: u32 = 2600;

/// Non-overlapping 30px lines spread down a tall page
fn synthetic_page() -> Vec<RawDetection> {
    let lines = ["一行目", "二行目です", "三", "四行目", "五行目の台詞", "六", "七行目", "八行目だ", "九", "十行目"];
    lines
        .iter()
        .enumerate()
        .map(|(n, text)| {
            let y = 40.0 + n as f32 * 250.0;
            let x = if n % 2 == 0 { 60.0 } else { 420.0 };
            RawDetection::new(*text, 0.9, BBox::new(x, y, x + 240.0, y + 30.0))
        })
        .collect()
}

fn tiling(tile_height: u32) -> TileConfig {
    TileConfig {
        tiling_threshold: 1000,
        tile_height,
        overlap: 100,
        edge_band_height: 200,
        max_parallel_slices: 3,
    }
}

/// Tiny deterministic generator for box layouts
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u32) -> f32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) % bound as u64) as f32
    }
}

#[tokio::test]
async fn test_tileRemapMerge_shouldReproduceBoxesForAnyBandHeight() {
    init_logging();
    let page = synthetic_page();
    let mut expected: Vec<(BBox, String)> = page.iter().map(|d| (d.bbox, d.text.clone())).collect();
    expected.sort_by(|a, b| a.0.y1.total_cmp(&b.0.y1).then(a.0.x1.total_cmp(&b.0.x1)));

    let factory = StubOcrFactory::new(page);
    for tile_height in [300, 500, 700, 1200] {
        let mut engine = factory.create("ja").unwrap();
        let mut raw = Vec::new();
        for slice in tile_dimensions(PAGE_WIDTH, PAGE_HEIGHT, &tiling(tile_height)) {
            let detections = engine.recognize(&slice).await.unwrap();
            raw.extend(remap(detections, &slice.spec));
        }

        let merged = merge(raw, &MergeConfig::default());
        let actual: Vec<(BBox, String)> = merged.into_iter().map(|r| (r.bbox, r.source_text)).collect();
        assert_eq!(actual, expected, "tile height {}", tile_height);
    }
}

#[test]
fn test_merge_denseLayout_shouldLeaveNoOverlapAndBeIdempotent() {
    let mut rng = Lcg(7);
    let regions: Vec<Region> = (0..120)
        .map(|n| {
            let x = rng.next(600);
            let y = rng.next(900);
            let w = 20.0 + rng.next(180);
            let h = 10.0 + rng.next(60);
            let confidence = 0.5 + rng.next(50) / 100.0;
            Region::new(format!("r{}", n), BBox::new(x, y, x + w, y + h), "テキスト".repeat(1 + n % 3), confidence)
        })
        .collect();

    let config = MergeConfig::default();
    let merged = merge(regions, &config);
    assert!(!merged.is_empty());
    for (i, a) in merged.iter().enumerate() {
        for b in merged.iter().skip(i + 1) {
            assert!(!config.overlaps(a, b), "{} overlaps {}", a.id, b.id);
        }
    }

    let again = merge(merged.clone(), &config);
    assert_eq!(again, merged);
}

#[tokio::test]
async fn test_tiledDetector_failingSlice_shouldCountAndContinue() {
    init_logging();
    let factory = StubOcrFactory::new(synthetic_page()).failing(&[1]);
    let registry = Arc::new(OcrRegistry::new(Arc::new(factory.clone())));
    let detector = TiledDetector::new(
        registry.clone(),
        tiling(500),
        MergeConfig::default(),
        ConsolidationConfig::default(),
    );

    let mut context = PageContext::new("p", 0, ja_en()).with_dimensions(PAGE_WIDTH, PAGE_HEIGHT);
    let summary = detector.detect(&mut context, None).await;

    assert_eq!(summary.slices_failed, 1);
    assert_eq!(context.metrics.slices_failed, 1);
    assert!(summary.slices_total > 2);
    assert!(!context.regions.is_empty());
    assert!(context.detected);
    assert!(context.regions.iter().all(|r| r.id.starts_with("p-")));
    assert_eq!(registry.engine_count().await, 1);
    assert!(factory.calls() >= summary.slices_total);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tiledDetector_concurrentPagesWithEdgeBands_shouldRunOneRecognitionAtATime() {
    init_logging();
    let factory = StubOcrFactory::new(synthetic_page()).with_latency(Duration::from_millis(5));
    let registry = Arc::new(OcrRegistry::new(Arc::new(factory.clone())));
    let detector = TiledDetector::new(
        registry.clone(),
        tiling(500),
        MergeConfig::default(),
        ConsolidationConfig::default(),
    );

    let mut first = PageContext::new("a", 0, ja_en()).with_dimensions(PAGE_WIDTH, PAGE_HEIGHT);
    let mut second = PageContext::new("b", 1, ja_en()).with_dimensions(PAGE_WIDTH, PAGE_HEIGHT);
    let (a, b) = tokio::join!(detector.detect(&mut first, None), detector.detect(&mut second, None));

    assert_eq!(a.slices_failed + b.slices_failed, 0);
    assert_eq!(factory.calls(), a.slices_total + b.slices_total);
    assert_eq!(factory.max_in_flight(), 1);
    assert_eq!(registry.engine_count().await, 1);
    assert_eq!(first.regions.len(), second.regions.len());
}

#[tokio::test]
async fn test_tiledDetector_shortPage_shouldUseSingleBand() {
    let detections = vec![RawDetection::new("やあ", 0.95, BBox::new(100.0, 300.0, 260.0, 340.0))];
    let factory = StubOcrFactory::new(detections);
    let registry = Arc::new(OcrRegistry::new(Arc::new(factory)));
    let config = TileConfig {
        edge_band_height: 0,
        ..tiling(500)
    };
    let detector = TiledDetector::new(registry, config, MergeConfig::default(), ConsolidationConfig::default());

    let mut context = PageContext::new("short", 0, ja_en()).with_dimensions(PAGE_WIDTH, 900);
    let summary = detector.detect(&mut context, None).await;

    assert_eq!(summary.slices_total, 1);
    assert_eq!(context.regions.len(), 1);
    assert_eq!(context.regions[0].source_text, "やあ");
    assert_eq!(context.regions[0].bbox, BBox::new(100.0, 300.0, 260.0, 340.0));
}
