/*!
 * Page pipeline orchestrator.
 *
 * A page runs detect, translate, erase, render and upscale in that order.
 * Any stage may be a no-op when its collaborator is missing or its work is
 * already done. A failing stage stops the page with an error code; the
 * quality report is still written.
 *
 * Batches run in phases:
 * 1. Detect every page with bounded concurrency
 * 2. Link neighbouring pages and translate the carriers
 * 3. Run the remaining stages, pages submitted in order
 */

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::continuity::{CarryoverJournal, CarryoverStore, ContinuityConfig, ContinuityEngine, LinkReport};
use crate::detection::TiledDetector;
use crate::errors::{ErrorCode, PipelineError};
use crate::page::{PageContext, PageStatus};
use crate::translation::{BatchTranslator, QualityGate};

use super::report::write_quality_report;
use super::stages::{erase_targets, render_targets, Eraser, Renderer, Stage, Upscaler};

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pages in flight at once during a batch
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Fail a page whose detection produced no regions
    #[serde(default = "default_true")]
    pub fail_on_empty: bool,

    /// Where quality reports go; none disables them
    #[serde(default)]
    pub report_dir: Option<PathBuf>,

    #[serde(default = "default_carryover_ttl_secs")]
    pub carryover_ttl_secs: u64,

    #[serde(default = "default_carryover_capacity")]
    pub carryover_capacity: usize,

    /// SQLite carryover journal; none disables it
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
}

fn default_max_concurrency() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_carryover_ttl_secs() -> u64 {
    600
}

fn default_carryover_capacity() -> usize {
    256
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            fail_on_empty: true,
            report_dir: None,
            carryover_ttl_secs: default_carryover_ttl_secs(),
            carryover_capacity: default_carryover_capacity(),
            journal_path: None,
        }
    }
}

/// A stage transition or terminal status of one page
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub page_id: String,
    pub page_index: usize,
    pub status: PageStatus,
    /// Stage about to run, `None` for terminal updates
    pub stage: Option<Stage>,
}

/// Receives every status update
pub type StatusCallback = Arc<dyn Fn(&StatusUpdate) + Send + Sync>;

/// Summary of one processed page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub page_id: String,
    pub page_index: usize,
    pub status: PageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub succeeded_regions: usize,
    pub failed_regions: usize,
    /// Completed with at least one failed region
    pub partial_success: bool,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
}

impl PageResult {
    pub fn is_success(&self) -> bool {
        self.status == PageStatus::Completed
    }

    pub fn summary(&self) -> String {
        match self.error_code {
            Some(code) => format!("page {} failed ({})", self.page_id, code),
            None if self.partial_success => format!(
                "page {}: {} regions translated, {} failed",
                self.page_id, self.succeeded_regions, self.failed_regions
            ),
            None => format!("page {}: {} regions translated", self.page_id, self.succeeded_regions),
        }
    }
}

/// A page after a batch run, with its final context
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub context: PageContext,
    pub result: PageResult,
}

/// Runs pages through the stage sequence
pub struct PagePipeline {
    config: PipelineConfig,
    run_id: String,
    detector: Option<Arc<TiledDetector>>,
    translator: Option<Arc<BatchTranslator>>,
    quality: QualityGate,
    continuity: ContinuityEngine,
    eraser: Option<Arc<dyn Eraser>>,
    renderer: Option<Arc<dyn Renderer>>,
    upscaler: Option<Arc<dyn Upscaler>>,
}

impl PagePipeline {
    /// Create a pipeline with a fresh carryover store for this run
    pub fn new(config: PipelineConfig) -> Self {
        let mut store = CarryoverStore::new(
            Duration::from_secs(config.carryover_ttl_secs),
            config.carryover_capacity,
        );
        if let Some(path) = &config.journal_path {
            match CarryoverJournal::open(path) {
                Ok(journal) => store = store.with_journal(journal),
                Err(e) => warn!("Carryover journal disabled: {:#}", e),
            }
        }

        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            continuity: ContinuityEngine::new(ContinuityConfig::default(), store),
            config,
            detector: None,
            translator: None,
            quality: QualityGate::default(),
            eraser: None,
            renderer: None,
            upscaler: None,
        }
    }

    pub fn with_detector(mut self, detector: Arc<TiledDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_translator(mut self, translator: Arc<BatchTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn with_quality_gate(mut self, gate: QualityGate) -> Self {
        self.quality = gate;
        self
    }

    /// Replace the continuity settings, keeping this run's carryover store
    pub fn with_continuity(mut self, config: ContinuityConfig) -> Self {
        self.continuity = ContinuityEngine::new(config, self.continuity.store().clone());
        self
    }

    pub fn with_eraser(mut self, eraser: Arc<dyn Eraser>) -> Self {
        self.eraser = Some(eraser);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_upscaler(mut self, upscaler: Arc<dyn Upscaler>) -> Self {
        self.upscaler = Some(upscaler);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn continuity(&self) -> &ContinuityEngine {
        &self.continuity
    }

    /// Run every stage on one page
    pub async fn process(&self, context: &mut PageContext, callback: Option<&StatusCallback>) -> PageResult {
        let started = Instant::now();
        self.start(context, callback);
        self.run_stages(context, &Stage::ORDER, callback, None).await;
        self.finish(context, started, callback)
    }

    /// Process pages as one chapter, linking neighbours across page breaks
    ///
    /// Outcomes come back in page order. Once `cancel` turns true, pages
    /// still waiting on a stage fail with `cancelled`.
    pub async fn process_batch(
        &self,
        contexts: Vec<PageContext>,
        max_concurrency: Option<usize>,
        callback: Option<StatusCallback>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Vec<PageOutcome> {
        let limit = max_concurrency.unwrap_or(self.config.max_concurrency).max(1);
        let callback = callback.as_ref();
        let cancel = cancel.as_ref();
        info!("Run {}: processing {} pages (concurrency {})", self.run_id, contexts.len(), limit);

        let mut contexts = contexts;
        contexts.sort_by_key(|c| c.page_index);

        let detected: Vec<(PageContext, Instant)> = stream::iter(contexts)
            .map(|mut context| async move {
                let started = Instant::now();
                self.start(&mut context, callback);
                self.run_stages(&mut context, &[Stage::Detect], callback, cancel).await;
                (context, started)
            })
            .buffered(limit)
            .collect()
            .await;
        let (mut contexts, starts): (Vec<_>, Vec<_>) = detected.into_iter().unzip();

        let reports = self.link_pages(&mut contexts);
        debug!(
            "Run {}: {} cross-page pair(s) linked",
            self.run_id,
            reports.iter().map(|r| r.pairs.len()).sum::<usize>()
        );

        if let Some(translator) = &self.translator {
            contexts = stream::iter(contexts)
                .map(|mut context| async move {
                    if context.status != PageStatus::Failed && !is_cancelled(cancel) {
                        self.continuity.translate_carriers(&mut context, translator).await;
                    }
                    context
                })
                .buffered(limit)
                .collect()
                .await;
        }

        stream::iter(contexts.into_iter().zip(starts))
            .map(|(mut context, started)| async move {
                self.run_stages(&mut context, &Stage::ORDER[1..], callback, cancel).await;
                let result = self.finish(&mut context, started, callback);
                PageOutcome { context, result }
            })
            .buffered(limit)
            .collect()
            .await
    }

    /// Detection stage: populate regions unless already detected
    pub async fn detect(&self, context: &mut PageContext) -> Result<(), PipelineError> {
        if !context.detected {
            load_image(context).await?;
            if let Some(detector) = &self.detector {
                let image = context.image.take();
                detector.detect(context, image.as_ref()).await;
                context.image = image;
            } else {
                debug!("Page {}: no detector configured", context.id);
            }
        }

        if self.config.fail_on_empty && context.regions.is_empty() {
            return Err(PipelineError::NoTextDetected(context.id.clone()));
        }
        Ok(())
    }

    /// Link each page's bottom edge to the next page's top edge
    ///
    /// Pages are expected in page order; failed pages break the chain.
    pub fn link_pages(&self, contexts: &mut [PageContext]) -> Vec<LinkReport> {
        let mut reports = Vec::new();
        for i in 1..contexts.len() {
            let (head, tail) = contexts.split_at_mut(i);
            let prev = &mut head[i - 1];
            let next = &mut tail[0];
            if prev.status == PageStatus::Failed || next.status == PageStatus::Failed {
                continue;
            }
            reports.push(self.continuity.link_pages(prev, next));
        }
        reports
    }

    fn start(&self, context: &mut PageContext, callback: Option<&StatusCallback>) {
        context.status = PageStatus::Processing;
        info!("Page {} ({}): processing", context.id, context.page_index);
        notify(callback, context, None);
    }

    async fn run_stages(
        &self,
        context: &mut PageContext,
        stages: &[Stage],
        callback: Option<&StatusCallback>,
        cancel: Option<&watch::Receiver<bool>>,
    ) {
        for &stage in stages {
            if context.status == PageStatus::Failed {
                return;
            }
            if is_cancelled(cancel) {
                let error = PipelineError::Cancelled;
                warn!("Page {}: {}", context.id, error);
                context.fail(error.code(), error.to_string());
                return;
            }

            notify(callback, context, Some(stage));
            let started = Instant::now();
            let result = self.run_stage(stage, context).await;
            context.timings.insert(stage, started.elapsed().as_secs_f64());

            if let Err(e) = result {
                error!("Page {}: {}", context.id, e);
                context.fail(e.code(), e.to_string());
            }
        }
    }

    async fn run_stage(&self, stage: Stage, context: &mut PageContext) -> Result<(), PipelineError> {
        match stage {
            Stage::Detect => self.detect(context).await,
            Stage::Translate => {
                self.translate(context).await;
                Ok(())
            }
            Stage::Erase => match &self.eraser {
                Some(eraser) => {
                    let regions = erase_targets(&context.regions);
                    transform_image(context, stage, |image| async move { eraser.erase(image, &regions).await }).await
                }
                None => Ok(()),
            },
            Stage::Render => match &self.renderer {
                Some(renderer) => {
                    let regions = render_targets(&context.regions);
                    transform_image(context, stage, |image| async move { renderer.render(image, &regions).await })
                        .await
                }
                None => Ok(()),
            },
            Stage::Upscale => match &self.upscaler {
                Some(upscaler) => transform_image(context, stage, |image| upscaler.upscale(image)).await,
                None => Ok(()),
            },
        }
    }

    async fn translate(&self, context: &mut PageContext) {
        let Some(translator) = &self.translator else {
            debug!("Page {}: no translator configured", context.id);
            return;
        };

        self.continuity.apply_carryover(context);
        self.continuity.translate_carriers(context, translator).await;
        translator.translate_regions(context).await;
        let outcome = self.quality.run(context, translator).await;
        if outcome.retried > 0 {
            debug!(
                "Page {}: quality gate retried {} regions, {} improved",
                context.id, outcome.retried, outcome.improved
            );
        }

        let (ok, failed) = context.translation_counts();
        context.metrics.translated_regions = ok;
        context.metrics.failed_regions = failed;
    }

    fn finish(&self, context: &mut PageContext, started: Instant, callback: Option<&StatusCallback>) -> PageResult {
        if context.status != PageStatus::Failed {
            context.status = PageStatus::Completed;
        }
        self.quality.score_page(context);

        let report_path = self
            .config
            .report_dir
            .as_ref()
            .and_then(|dir| write_quality_report(context, self.quality.config(), dir));

        let (succeeded, failed) = context.translation_counts();
        let result = PageResult {
            page_id: context.id.clone(),
            page_index: context.page_index,
            status: context.status,
            error_code: context.error_code,
            error_message: context.error_message.clone(),
            succeeded_regions: succeeded,
            failed_regions: failed,
            partial_success: context.status == PageStatus::Completed && failed > 0,
            duration_secs: started.elapsed().as_secs_f64(),
            report_path,
        };

        info!("Page {}: {} [{}]", context.id, result.summary(), context.metrics.summary());
        notify(callback, context, None);
        result
    }
}

fn is_cancelled(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.is_some_and(|rx| *rx.borrow())
}

fn notify(callback: Option<&StatusCallback>, context: &PageContext, stage: Option<Stage>) {
    if let Some(callback) = callback {
        callback(&StatusUpdate {
            page_id: context.id.clone(),
            page_index: context.page_index,
            status: context.status,
            stage,
        });
    }
}

async fn load_image(context: &mut PageContext) -> Result<(), PipelineError> {
    if context.image.is_some() {
        return Ok(());
    }
    let Some(path) = context.image_path.clone() else {
        return Ok(());
    };
    let image = tokio::task::spawn_blocking(move || image::open(&path))
        .await
        .map_err(|e| PipelineError::stage(Stage::Detect, e))?
        .map_err(|e| PipelineError::stage(Stage::Detect, e))?;
    context.width = image.width();
    context.height = image.height();
    context.image = Some(image);
    Ok(())
}

async fn transform_image<F, Fut>(context: &mut PageContext, stage: Stage, apply: F) -> Result<(), PipelineError>
where
    F: FnOnce(image::DynamicImage) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<image::DynamicImage>>,
{
    let Some(image) = context.image.take() else {
        debug!("Page {}: no working image, skipping {}", context.id, stage);
        return Ok(());
    };
    let image = apply(image).await.map_err(|e| PipelineError::stage(stage, format!("{:#}", e)))?;
    context.width = image.width();
    context.height = image.height();
    context.image = Some(image);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    use crate::page::{BBox, LanguagePair, Region};
    use crate::providers::mock::MockProvider;
    use crate::providers::Provider;
    use crate::translation::{BatchingConfig, FallbackChain};

    fn translator(provider: MockProvider) -> Arc<BatchTranslator> {
        let slots: Vec<Arc<dyn Provider>> = vec![Arc::new(provider)];
        Arc::new(BatchTranslator::new(Arc::new(FallbackChain::new(slots)), BatchingConfig::default()))
    }

    fn page(id: &str, index: usize, regions: Vec<Region>) -> PageContext {
        PageContext::new(id, index, LanguagePair::new("ja", "en"))
            .with_dimensions(800, 1000)
            .with_regions(regions)
    }

    #[tokio::test]
    async fn test_process_emptyPage_shouldFailWithNoTextDetected() {
        let pipeline = PagePipeline::new(PipelineConfig::default());
        let mut context = PageContext::new("empty", 0, LanguagePair::new("ja", "en"));
        let result = pipeline.process(&mut context, None).await;
        assert_eq!(result.status, PageStatus::Failed);
        assert_eq!(result.error_code, Some(ErrorCode::NoTextDetected));
        assert!(!context.timings.contains_key(&Stage::Translate));
    }

    #[tokio::test]
    async fn test_process_shouldTranslateAndReportCounts() {
        let pipeline = PagePipeline::new(PipelineConfig::default()).with_translator(translator(MockProvider::working()));
        let mut context = page("p", 0, vec![Region::new("a", BBox::new(10.0, 400.0, 200.0, 440.0), "こんにちは", 0.9)]);
        let result = pipeline.process(&mut context, None).await;
        assert!(result.is_success());
        assert_eq!(result.succeeded_regions, 1);
        assert!(!result.partial_success);
        assert_eq!(context.regions[0].target_text.as_deref(), Some("[tr] こんにちは"));
        assert_eq!(context.timings.len(), Stage::ORDER.len());
    }

    #[tokio::test]
    async fn test_process_shouldNotifyEveryStage() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: StatusCallback = Arc::new(move |update: &StatusUpdate| sink.lock().push(update.clone()));

        let pipeline = PagePipeline::new(PipelineConfig::default());
        let mut context = page("p", 0, vec![Region::new("a", BBox::new(0.0, 0.0, 10.0, 10.0), "x", 0.9)]);
        pipeline.process(&mut context, Some(&callback)).await;

        let updates = seen.lock();
        let stages: Vec<_> = updates.iter().filter_map(|u| u.stage).collect();
        assert_eq!(stages, Stage::ORDER.to_vec());
        assert_eq!(updates.last().map(|u| u.status), Some(PageStatus::Completed));
    }

    #[tokio::test]
    async fn test_processBatch_cancelled_shouldFailOutstandingPages() {
        let (tx, rx) = watch::channel(true);
        let pipeline = PagePipeline::new(PipelineConfig::default());
        let pages = vec![
            page("a", 0, vec![Region::new("a-0", BBox::new(0.0, 0.0, 10.0, 10.0), "x", 0.9)]),
            page("b", 1, vec![Region::new("b-0", BBox::new(0.0, 0.0, 10.0, 10.0), "y", 0.9)]),
        ];
        let outcomes = pipeline.process_batch(pages, Some(1), None, Some(rx)).await;
        drop(tx);
        assert!(outcomes.iter().all(|o| o.result.error_code == Some(ErrorCode::Cancelled)));
    }

    #[tokio::test]
    async fn test_processBatch_shouldKeepPageOrder() {
        let pipeline = PagePipeline::new(PipelineConfig::default()).with_translator(translator(MockProvider::working()));
        let pages = vec![
            page("second", 1, vec![Region::new("s", BBox::new(10.0, 400.0, 200.0, 440.0), "二", 0.9)]),
            page("first", 0, vec![Region::new("f", BBox::new(10.0, 400.0, 200.0, 440.0), "一", 0.9)]),
        ];
        let outcomes = pipeline.process_batch(pages, Some(2), None, None).await;
        let ids: Vec<_> = outcomes.iter().map(|o| o.result.page_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }
}
