use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::watch;

use crate::app_config::{Config, TranslationProvider};
use crate::detection::{SidecarOcrFactory, SidecarStore, TiledDetector, OcrRegistry};
use crate::file_utils::FileManager;
use crate::page::{LanguagePair, PageContext, Region};
use crate::pipeline::{BoxFillEraser, PageOutcome, PagePipeline, PageResult, Stage, StatusCallback, StatusUpdate};
use crate::providers::{build_provider, Provider};
use crate::translation::{
    BatchTranslator, FallbackChain, PromptBuilder, QualityGate, RequestLimiter, TranslationCache,
};

// @module: Application controller for page translation

/// Totals for one run over a directory
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub pages: usize,
    pub completed: usize,
    pub partial: usize,
    pub failed: usize,
    pub skipped: usize,
    pub regions_translated: usize,
    pub regions_failed: usize,
}

/// Main application controller for page translation
pub struct Controller {
    // @field: App configuration
    config: Config,
}

/// Content of a `<page>.translation.json` file
#[derive(Serialize)]
struct PageTranslationFile<'a> {
    result: &'a PageResult,
    regions: &'a [Region],
    continuity: &'a serde_json::Value,
}

impl Controller {
    // @method: Create a new controller with the given configuration
    pub fn with_config(config: Config) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the batching translator over the configured fallback chain
    pub fn build_translator(&self) -> Result<Arc<BatchTranslator>> {
        let translation = &self.config.translation;
        let mut slots: Vec<Arc<dyn Provider>> = Vec::new();
        for (provider_config, model) in translation.chain_slots()? {
            slots.push(build_provider(provider_config, Some(&model), &translation.common)?);
        }
        self.translator_over(slots)
    }

    /// Dedicated translator for quality retries, if a retry chain is configured
    ///
    /// Entries are `provider/model`; a bare provider uses its configured model.
    pub fn build_retry_translator(&self) -> Result<Option<Arc<BatchTranslator>>> {
        let translation = &self.config.translation;
        if self.config.quality.retry_chain.is_empty() {
            return Ok(None);
        }
        let mut slots: Vec<Arc<dyn Provider>> = Vec::new();
        for entry in &self.config.quality.retry_chain {
            let (provider, model) = entry.split_once('/').unwrap_or((entry.as_str(), ""));
            let kind: TranslationProvider = provider.parse()?;
            let provider_config = translation
                .get_provider_config(&kind)
                .ok_or_else(|| anyhow!("No configuration for retry provider {}", kind))?;
            slots.push(build_provider(provider_config, Some(model), &translation.common)?);
        }
        self.translator_over(slots).map(Some)
    }

    fn translator_over(&self, slots: Vec<Arc<dyn Provider>>) -> Result<Arc<BatchTranslator>> {
        if slots.is_empty() {
            return Err(anyhow!("No translation provider configured"));
        }
        let translation = &self.config.translation;
        let limiter = Arc::new(RequestLimiter::new(
            translation.optimal_concurrent_requests(),
            translation.get_rate_limit(),
        ));
        let chain = FallbackChain::new(slots)
            .with_call_timeout(self.config.batching.call_timeout_secs)
            .with_limiter(limiter);
        info!("Fallback chain: {}", chain.describe().join(" -> "));

        let translator = BatchTranslator::new(Arc::new(chain), self.config.batching.clone())
            .with_prompts(PromptBuilder::new(&translation.common.system_prompt))
            .with_cache(TranslationCache::new(self.config.batching.cache_enabled))
            .with_temperature(translation.common.temperature);
        Ok(Arc::new(translator))
    }

    /// Assemble the page pipeline for a run writing into `output_dir`
    pub fn build_pipeline(&self, sidecars: Arc<SidecarStore>, output_dir: &Path) -> Result<PagePipeline> {
        let registry = Arc::new(OcrRegistry::new(Arc::new(SidecarOcrFactory::new(sidecars))));
        let detector = TiledDetector::new(
            registry,
            self.config.tiling.clone(),
            self.config.merge.clone(),
            self.config.consolidation.clone(),
        );

        let mut quality = QualityGate::new(self.config.quality.clone());
        if let Some(retry) = self.build_retry_translator()? {
            quality = quality.with_retry_translator(retry);
        }

        let mut pipeline_config = self.config.pipeline.clone();
        if pipeline_config.report_dir.is_none() {
            pipeline_config.report_dir = Some(output_dir.join("reports"));
        }

        Ok(PagePipeline::new(pipeline_config)
            .with_detector(Arc::new(detector))
            .with_translator(self.build_translator()?)
            .with_quality_gate(quality)
            .with_continuity(self.config.continuity.clone())
            .with_eraser(Arc::new(BoxFillEraser::default())))
    }

    /// Translate every page image in `input_dir` as one chapter
    pub async fn run_folder(&self, input_dir: PathBuf, output_dir: PathBuf, force_overwrite: bool) -> Result<RunSummary> {
        let start_time = Instant::now();
        if !FileManager::dir_exists(&input_dir) {
            return Err(anyhow!("Input directory does not exist: {:?}", input_dir));
        }
        FileManager::ensure_dir(&output_dir)?;

        let images = FileManager::find_page_images(&input_dir)?;
        if images.is_empty() {
            warn!("No page images found in {:?}", input_dir);
            return Ok(RunSummary::default());
        }

        let languages = LanguagePair::new(&self.config.source_language, &self.config.target_language);
        let sidecars = Arc::new(SidecarStore::new());
        let mut summary = RunSummary::default();
        let mut contexts = Vec::new();

        for path in &images {
            let page_id = FileManager::page_id(path);
            let translation_path = FileManager::generate_output_path(path, &output_dir, "translation", "json");
            if translation_path.exists() && !force_overwrite {
                warn!("Skipping {}, translation already exists (use -f to force overwrite)", page_id);
                summary.skipped += 1;
                continue;
            }
            if let Err(e) = sidecars.load(&page_id, path) {
                warn!("Page {}: no OCR sidecar ({})", page_id, e);
            }
            let extension = path.extension().map(|e| e.to_string_lossy().to_string()).unwrap_or_else(|| "png".into());
            let image_out = FileManager::generate_output_path(path, &output_dir, &self.config.target_language, &extension);
            contexts.push(
                PageContext::new(page_id, contexts.len(), languages.clone())
                    .with_image_path(path)
                    .with_output_path(image_out),
            );
        }
        if contexts.is_empty() {
            return Ok(summary);
        }

        let pipeline = self.build_pipeline(sidecars, &output_dir)?;
        info!(
            "inkbridge: {} pages, {} -> {} (run {})",
            contexts.len(),
            self.config.source_language,
            self.config.target_language,
            pipeline.run_id()
        );

        let progress_bar = ProgressBar::new((contexts.len() * Stage::ORDER.len()) as u64);
        let template_result = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} stages ({percent}%) {msg} {eta}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress_bar.set_style(template_result.progress_chars("█▓▒░"));
        progress_bar.set_message("Detecting");

        let bar = progress_bar.clone();
        let callback: StatusCallback = Arc::new(move |update: &StatusUpdate| {
            if let Some(stage) = update.stage {
                bar.inc(1);
                bar.set_message(format!("{}: {}", update.page_id, stage));
            }
        });

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling outstanding pages");
                let _ = cancel_tx.send(true);
            }
        });

        let outcomes = pipeline
            .process_batch(contexts, None, Some(callback), Some(cancel_rx))
            .await;
        interrupt.abort();
        progress_bar.finish_with_message("Done");

        for outcome in outcomes {
            summary.pages += 1;
            summary.regions_translated += outcome.result.succeeded_regions;
            summary.regions_failed += outcome.result.failed_regions;
            if !outcome.result.is_success() {
                summary.failed += 1;
            } else if outcome.result.partial_success {
                summary.partial += 1;
            } else {
                summary.completed += 1;
            }
            if let Err(e) = self.save_outcome(outcome, &output_dir).await {
                error!("{:#}", e);
            }
        }

        info!(
            "Finished {} pages in {}: {} completed, {} partial, {} failed, {} skipped",
            summary.pages,
            Self::format_duration(start_time.elapsed()),
            summary.completed,
            summary.partial,
            summary.failed,
            summary.skipped
        );
        Ok(summary)
    }

    /// Write the translation file and, when present, the erased page image
    async fn save_outcome(&self, outcome: PageOutcome, output_dir: &Path) -> Result<()> {
        let PageOutcome { mut context, result } = outcome;
        let source = context.image_path.clone().unwrap_or_else(|| PathBuf::from(&context.id));
        let translation_path = FileManager::generate_output_path(&source, output_dir, "translation", "json");
        FileManager::write_json(
            &translation_path,
            &PageTranslationFile {
                result: &result,
                regions: &context.regions,
                continuity: &context.continuity_debug,
            },
        )
        .with_context(|| format!("Page {}: failed to write translation file", context.id))?;
        debug!("Page {}: wrote {:?}", context.id, translation_path);

        if let (Some(image), Some(path)) = (context.image.take(), context.output_path.clone()) {
            if result.is_success() {
                FileManager::save_image(path, image)
                    .await
                    .with_context(|| format!("Page {}: failed to save image", context.id))?;
            }
        }
        Ok(())
    }

    // Format duration in a human-readable format (HH:MM:SS)
    fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}.{:03}s", seconds, duration.subsec_millis())
        }
    }
}
