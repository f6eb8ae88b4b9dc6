/*!
 * Pipeline tests: sidecar detection on real page images, fail-on-empty,
 * cancellation and directory runs through the controller
 */

use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};
use parking_lot::Mutex;
use tokio::sync::watch;

use inkbridge::app_config::Config;
use inkbridge::app_controller::Controller;
use inkbridge::detection::{
    ConsolidationConfig, MergeConfig, OcrRegistry, RawDetection, SidecarOcrFactory, SidecarStore, TileConfig,
    TiledDetector,
};
use inkbridge::errors::{ErrorCode, ProviderError};
use inkbridge::page::{BBox, PageContext, PageStatus, Region, FAILED_TRANSLATION};
use inkbridge::pipeline::{
    BoxFillEraser, Eraser, PagePipeline, PipelineConfig, Renderer, Stage, StatusCallback, StatusUpdate,
};
use inkbridge::providers::mock::MockProvider;
use inkbridge::translation::BatchingConfig;

use crate::common::{create_temp_dir, init_logging, ja_en, page, region, translator, write_page};

fn sidecar_detector(store: Arc<SidecarStore>) -> Arc<TiledDetector> {
    let registry = Arc::new(OcrRegistry::new(Arc::new(SidecarOcrFactory::new(store))));
    Arc::new(TiledDetector::new(
        registry,
        TileConfig::default(),
        MergeConfig::default(),
        ConsolidationConfig::default(),
    ))
}

/// Keeps the regions each image collaborator was handed
#[derive(Default)]
struct RecordingPainter {
    erased: Mutex<Vec<Region>>,
    rendered: Mutex<Vec<Region>>,
}

#[async_trait]
impl Eraser for RecordingPainter {
    async fn erase(&self, image: DynamicImage, regions: &[Region]) -> anyhow::Result<DynamicImage> {
        self.erased.lock().extend_from_slice(regions);
        Ok(image)
    }
}

#[async_trait]
impl Renderer for RecordingPainter {
    async fn render(&self, image: DynamicImage, regions: &[Region]) -> anyhow::Result<DynamicImage> {
        self.rendered.lock().extend_from_slice(regions);
        Ok(image)
    }
}

fn painted_pipeline(provider: MockProvider, painter: &Arc<RecordingPainter>) -> PagePipeline {
    PagePipeline::new(PipelineConfig::default())
        .with_translator(translator(vec![provider], BatchingConfig::default()))
        .with_eraser(painter.clone())
        .with_renderer(painter.clone())
}

fn recorder() -> (StatusCallback, Arc<Mutex<Vec<StatusUpdate>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: StatusCallback = Arc::new(move |update: &StatusUpdate| sink.lock().push(update.clone()));
    (callback, seen)
}

#[tokio::test]
async fn test_process_sidecarPage_shouldDetectTranslateAndErase() {
    init_logging();
    let dir = create_temp_dir().unwrap();
    let detections = vec![
        RawDetection::new("おはよう", 0.95, BBox::new(100.0, 200.0, 300.0, 240.0)),
        RawDetection::new("また明日", 0.9, BBox::new(400.0, 600.0, 600.0, 640.0)),
    ];
    let path = write_page(dir.path(), "001.png", 800, 1000, &detections).unwrap();

    let store = Arc::new(SidecarStore::new());
    assert_eq!(store.load("001", &path).unwrap(), 2);

    let pipeline = PagePipeline::new(PipelineConfig::default())
        .with_detector(sidecar_detector(store))
        .with_translator(translator(vec![MockProvider::working()], BatchingConfig::default()))
        .with_eraser(Arc::new(BoxFillEraser::new([0, 0, 0, 255], 0)));

    let mut context = PageContext::new("001", 0, ja_en()).with_image_path(&path);
    let result = pipeline.process(&mut context, None).await;

    assert!(result.is_success());
    assert_eq!(result.succeeded_regions, 2);
    assert_eq!((context.width, context.height), (800, 1000));
    assert_eq!(context.timings.len(), Stage::ORDER.len());
    let targets: Vec<_> = context.regions.iter().filter_map(|r| r.target_text.clone()).collect();
    assert_eq!(targets, vec!["[tr] おはよう".to_string(), "[tr] また明日".to_string()]);

    let image = context.image.as_ref().unwrap();
    assert_eq!(image.get_pixel(200, 220).0, [0, 0, 0, 255]);
    assert_eq!(image.get_pixel(20, 20).0, [250, 250, 250, 255]);
}

#[tokio::test]
async fn test_process_emptySidecar_shouldFailWithNoTextDetectedAndReport() {
    let dir = create_temp_dir().unwrap();
    let path = write_page(dir.path(), "blank.png", 800, 1000, &[]).unwrap();
    let store = Arc::new(SidecarStore::new());
    store.load("blank", &path).unwrap();

    let report_dir = dir.path().join("reports");
    let provider = MockProvider::working();
    let pipeline = PagePipeline::new(PipelineConfig {
        report_dir: Some(report_dir.clone()),
        ..PipelineConfig::default()
    })
    .with_detector(sidecar_detector(store))
    .with_translator(translator(vec![provider.clone()], BatchingConfig::default()));

    let (callback, seen) = recorder();
    let mut context = PageContext::new("blank", 0, ja_en()).with_image_path(&path);
    let result = pipeline.process(&mut context, Some(&callback)).await;

    assert_eq!(result.status, PageStatus::Failed);
    assert_eq!(result.error_code, Some(ErrorCode::NoTextDetected));
    assert_eq!(provider.request_count(), 0);
    assert!(!context.timings.contains_key(&Stage::Translate));
    assert_eq!(seen.lock().last().map(|u| u.status), Some(PageStatus::Failed));

    let report_path = result.report_path.unwrap();
    assert_eq!(report_path, report_dir.join("blank.quality.json"));
    let report: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap();
    assert_eq!(report["status"], "failed");
    assert_eq!(report["error_code"], "no_text_detected");
}

#[tokio::test]
async fn test_processBatch_cancelAfterFirstPage_shouldCancelOutstanding() {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let callback: StatusCallback = Arc::new(move |update: &StatusUpdate| {
        if update.page_index == 0 && update.stage.is_none() && update.status.is_terminal() {
            let _ = cancel_tx.send(true);
        }
    });

    let pipeline = PagePipeline::new(PipelineConfig::default())
        .with_translator(translator(vec![MockProvider::working()], BatchingConfig::default()));
    let pages = vec![
        page("a", 0, vec![region("a-0", 10.0, 400.0, 300.0, 440.0, "一ページ目")]),
        page("b", 1, vec![region("b-0", 10.0, 400.0, 300.0, 440.0, "二ページ目")]),
        page("c", 2, vec![region("c-0", 10.0, 400.0, 300.0, 440.0, "三ページ目")]),
    ];

    let outcomes = pipeline.process_batch(pages, Some(1), Some(callback), Some(cancel_rx)).await;

    assert_eq!(outcomes[0].result.status, PageStatus::Completed);
    for outcome in &outcomes[1..] {
        assert_eq!(outcome.result.status, PageStatus::Failed);
        assert_eq!(outcome.result.error_code, Some(ErrorCode::Cancelled));
        assert!(outcome.context.regions[0].target_text.is_none());
    }
}

#[tokio::test]
async fn test_controller_runFolder_blankPages_shouldWriteFailuresAndSkipOnRerun() {
    init_logging();
    let input = create_temp_dir().unwrap();
    let output = create_temp_dir().unwrap();
    for name in ["2.png", "10.png"] {
        write_page(input.path(), name, 400, 600, &[]).unwrap();
    }

    let controller = Controller::with_config(Config::default()).unwrap();
    let summary = controller
        .run_folder(input.path().to_path_buf(), output.path().to_path_buf(), false)
        .await
        .unwrap();

    assert_eq!(summary.pages, 2);
    assert_eq!(summary.failed, 2);
    for page_id in ["2", "10"] {
        let translation = output.path().join(format!("{}.translation.json", page_id));
        let content: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(translation).unwrap()).unwrap();
        assert_eq!(content["result"]["error_code"], "no_text_detected");
        assert!(output.path().join("reports").join(format!("{}.quality.json", page_id)).exists());
        assert!(!output.path().join(format!("{}.en.png", page_id)).exists());
    }

    let rerun = controller
        .run_folder(input.path().to_path_buf(), output.path().to_path_buf(), false)
        .await
        .unwrap();
    assert_eq!(rerun.skipped, 2);
    assert_eq!(rerun.pages, 0);
}

#[tokio::test]
async fn test_process_allTranslationsFailed_shouldRenderNothingButEraseEverything() {
    let painter = Arc::new(RecordingPainter::default());
    let pipeline = painted_pipeline(
        MockProvider::failing(ProviderError::AuthenticationError("bad key".into())),
        &painter,
    );
    let mut context = page(
        "p",
        0,
        vec![
            region("p-0", 100.0, 200.0, 300.0, 240.0, "おはよう"),
            region("p-1", 400.0, 600.0, 600.0, 640.0, "また明日"),
        ],
    )
    .with_image(DynamicImage::new_rgba8(800, 1000));

    let result = pipeline.process(&mut context, None).await;

    assert_eq!(result.failed_regions, 2);
    assert!(context.regions.iter().all(|r| r.target_text.as_deref() == Some(FAILED_TRANSLATION)));
    assert!(painter.rendered.lock().is_empty());
    assert_eq!(painter.erased.lock().len(), 2);
}

#[tokio::test]
async fn test_process_silencedAndRenderBox_shouldRenderOnlyTranslatedTextInLayoutBox() {
    let painter = Arc::new(RecordingPainter::default());
    let pipeline = painted_pipeline(MockProvider::working(), &painter);

    let mut widened = region("p-0", 100.0, 200.0, 300.0, 240.0, "おはよう");
    widened.render_box = Some(BBox::new(80.0, 190.0, 320.0, 260.0));
    let mut silenced = region("p-1", 400.0, 600.0, 600.0, 640.0, "ドン");
    silenced.silence();
    let mut context = page("p", 0, vec![widened, silenced]).with_image(DynamicImage::new_rgba8(800, 1000));

    pipeline.process(&mut context, None).await;

    let rendered = painter.rendered.lock();
    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0].id, "p-0");
    assert_eq!(rendered[0].target_text.as_deref(), Some("[tr] おはよう"));
    assert_eq!(rendered[0].bbox, BBox::new(80.0, 190.0, 320.0, 260.0));

    let erased = painter.erased.lock();
    assert_eq!(erased.len(), 2);
    assert_eq!(erased[0].bbox, BBox::new(100.0, 200.0, 300.0, 240.0));
}
