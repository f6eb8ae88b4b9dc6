/*!
 * Per-region quality scoring and the retry gate.
 *
 * A region's score blends OCR confidence with translation plausibility,
 * judged from the target/source length ratio against bounds for the
 * language pair. Failed regions score 0. Low scorers are retried once,
 * lowest first, within a per-page budget, and a retry is kept only when it
 * scores higher than what it replaces.
 */

use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::language_utils::{is_cjk_language, script_share, scripts_differ, scripts_for_language};
use crate::page::{LanguagePair, PageContext, Region, FAILED_TRANSLATION};

use super::batch::{BatchTranslator, TranslationStats};

/// Quality gate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Regions scoring below this are retried
    #[serde(default = "default_retry_threshold")]
    pub retry_threshold: f32,

    /// Retries allowed per page
    #[serde(default = "default_per_page_retry_budget")]
    pub per_page_retry_budget: usize,

    /// OCR confidence below which a region is flagged for review
    #[serde(default = "default_low_ocr_confidence")]
    pub low_ocr_confidence: f32,

    /// Weight of OCR confidence in the score, the rest is plausibility
    #[serde(default = "default_confidence_weight")]
    pub confidence_weight: f32,

    /// Optional `provider/model` slots used only for retries
    #[serde(default)]
    pub retry_chain: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_retry_threshold() -> f32 {
    0.45
}

fn default_per_page_retry_budget() -> usize {
    4
}

fn default_low_ocr_confidence() -> f32 {
    0.5
}

fn default_confidence_weight() -> f32 {
    0.4
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_threshold: default_retry_threshold(),
            per_page_retry_budget: default_per_page_retry_budget(),
            low_ocr_confidence: default_low_ocr_confidence(),
            confidence_weight: default_confidence_weight(),
            retry_chain: Vec::new(),
        }
    }
}

/// Recommended follow-up for a region in the quality report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FollowUpAction {
    RetryTranslation,
    LowOcrConfidence,
    CheckOverflow,
    ReviewGlossary,
}

impl FollowUpAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetryTranslation => "retry-translation",
            Self::LowOcrConfidence => "low-ocr-confidence",
            Self::CheckOverflow => "check-overflow",
            Self::ReviewGlossary => "review-glossary",
        }
    }
}

impl std::fmt::Display for FollowUpAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Plausible target/source length ratio range for a language pair
pub fn length_bounds(languages: &LanguagePair) -> (f32, f32) {
    match (is_cjk_language(&languages.source), is_cjk_language(&languages.target)) {
        (true, false) => (0.8, 6.0),
        (false, true) => (0.15, 1.25),
        _ => (0.4, 2.5),
    }
}

fn visible_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Target/source length ratio, `None` without a usable translation
pub fn length_ratio(region: &Region) -> Option<f32> {
    let target = region.target_text.as_deref()?;
    if target.is_empty() || target == FAILED_TRANSLATION {
        return None;
    }
    let source = visible_chars(region.translation_input()).max(1);
    Some(visible_chars(target) as f32 / source as f32)
}

/// Plausibility in [0, 1] from the length ratio
pub fn plausibility(region: &Region, languages: &LanguagePair) -> f32 {
    if region.is_failed() {
        return 0.0;
    }
    let Some(ratio) = length_ratio(region) else {
        return 0.0;
    };
    let (min, max) = length_bounds(languages);
    if ratio < min {
        ratio / min
    } else if ratio > max {
        max / ratio
    } else {
        1.0
    }
}

/// Score a region, `None` when there is nothing to score
pub fn score_region(region: &Region, languages: &LanguagePair, config: &QualityConfig) -> Option<f32> {
    match region.target_text.as_deref() {
        None => None,
        Some(FAILED_TRANSLATION) => Some(0.0),
        Some("") => None,
        Some(_) => {
            let weight = config.confidence_weight.clamp(0.0, 1.0);
            let score = weight * region.confidence + (1.0 - weight) * plausibility(region, languages);
            Some(score.clamp(0.0, 1.0))
        }
    }
}

/// Follow-up recommended for a region, most urgent first
pub fn follow_up(region: &Region, languages: &LanguagePair, config: &QualityConfig) -> Option<FollowUpAction> {
    if region.is_failed() {
        return Some(FollowUpAction::RetryTranslation);
    }
    let score = score_region(region, languages, config)?;
    if region.confidence < config.low_ocr_confidence {
        return Some(FollowUpAction::LowOcrConfidence);
    }
    if let Some(ratio) = length_ratio(region) {
        if ratio > length_bounds(languages).1 {
            return Some(FollowUpAction::CheckOverflow);
        }
    }
    if score < config.retry_threshold {
        return Some(FollowUpAction::RetryTranslation);
    }
    if scripts_differ(&languages.source, &languages.target) {
        let target = region.target_text.as_deref().unwrap_or("");
        if script_share(target, scripts_for_language(&languages.source)) > 0.2 {
            return Some(FollowUpAction::ReviewGlossary);
        }
    }
    None
}

/// What the gate did on one page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateOutcome {
    pub scored: usize,
    pub retried: usize,
    pub improved: usize,
}

/// Scores regions and retries the weakest ones
#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    config: QualityConfig,
    retry_translator: Option<Arc<BatchTranslator>>,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            retry_translator: None,
        }
    }

    /// Send retries through a dedicated chain instead of the page translator
    pub fn with_retry_translator(mut self, translator: Arc<BatchTranslator>) -> Self {
        self.retry_translator = Some(translator);
        self
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Fill `quality_score` on every scorable region
    pub fn score_page(&self, context: &mut PageContext) -> usize {
        let languages = context.languages.clone();
        let mut scored = 0;
        for region in &mut context.regions {
            region.quality_score = score_region(region, &languages, &self.config);
            if region.quality_score.is_some() {
                scored += 1;
            }
        }
        scored
    }

    /// Score the page, then retry low scorers within the budget
    pub async fn run(&self, context: &mut PageContext, translator: &BatchTranslator) -> GateOutcome {
        let mut outcome = GateOutcome {
            scored: self.score_page(context),
            ..GateOutcome::default()
        };
        if !self.config.enabled || self.config.per_page_retry_budget == 0 {
            return outcome;
        }

        let mut candidates: Vec<(usize, f32)> = context
            .regions
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.skip_translation && r.continuity.role.is_none())
            .filter_map(|(i, r)| r.quality_score.map(|s| (i, s)))
            .filter(|(_, s)| *s < self.config.retry_threshold)
            .collect();
        if candidates.is_empty() {
            return outcome;
        }
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        candidates.truncate(self.config.per_page_retry_budget);

        let texts: Vec<String> = candidates
            .iter()
            .map(|(i, _)| context.regions[*i].translation_input().to_string())
            .collect();
        let languages = context.languages.clone();
        let retry_translator = self.retry_translator.as_deref().unwrap_or(translator);

        debug!("Page {}: retrying {} low-quality regions", context.id, texts.len());
        let mut stats = TranslationStats::default();
        let outputs = retry_translator
            .retranslate_with_stats(&texts, &languages, &mut stats)
            .await;

        for ((index, old_score), output) in candidates.into_iter().zip(outputs) {
            outcome.retried += 1;
            if output == FAILED_TRANSLATION {
                continue;
            }
            let mut candidate = context.regions[index].clone();
            candidate.target_text = Some(output);
            let new_score = score_region(&candidate, &languages, &self.config).unwrap_or(0.0);
            if new_score > old_score {
                let region = &mut context.regions[index];
                region.target_text = candidate.target_text;
                region.quality_score = Some(new_score);
                outcome.improved += 1;
            }
        }

        context.metrics.quality_retries += outcome.retried;
        context.metrics.translation.absorb(stats);
        info!(
            "Page {}: quality gate retried {} regions, {} improved",
            context.id, outcome.retried, outcome.improved
        );
        outcome
    }
}
