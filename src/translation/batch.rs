/*!
 * Batch translation processing.
 *
 * A page's regions go out as one numbered request unless the request would
 * exceed the configured character or item limits, in which case it is split
 * into ordered slices that run with bounded parallelism and are reassembled
 * by original index. Each slice walks the fallback chain:
 *
 * - missing numbers trigger one strict retry of the slice
 * - rejected items are retried on the next slot
 * - a multi-item slice that fails entirely is re-split into halves
 *
 * Items that exhaust every option come back as the failure sentinel.
 */

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::page::{LanguagePair, PageContext, Region, FAILED_TRANSLATION};
use crate::providers::CompletionRequest;

use super::cache::TranslationCache;
use super::fallback::{ChainCompletion, ChainError, FallbackChain, ProviderAttempt};
use super::parser::{parse_pair, parse_response};
use super::prompts::{PromptBuilder, ResponseFormat};
use super::validation::{validate_translation, ValidationRules};

/// Request shaping and retry limits for the batching engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Source characters per request before the batch is split
    #[serde(default = "default_max_chars_per_request")]
    pub max_chars_per_request: usize,

    #[serde(default = "default_max_items_per_request")]
    pub max_items_per_request: usize,

    /// Slices of one batch in flight at once
    #[serde(default = "default_max_parallel_slices")]
    pub max_parallel_slices: usize,

    /// Output budget multiplier for the strict retry
    #[serde(default = "default_strict_retry_token_multiplier")]
    pub strict_retry_token_multiplier: f32,

    /// How many times a fully failed slice may be halved
    #[serde(default = "default_max_resplit_depth")]
    pub max_resplit_depth: usize,

    /// Guard on a provider call when a later fallback slot exists
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_source_script_tolerance")]
    pub source_script_tolerance: f32,

    /// Same-script echoes up to this length are accepted
    #[serde(default = "default_short_word_chars")]
    pub short_word_chars: usize,

    /// Upper bound on the output token budget of a normal request
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    #[serde(default)]
    pub response_format: ResponseFormat,
}

fn default_max_chars_per_request() -> usize {
    3000
}

fn default_max_items_per_request() -> usize {
    40
}

fn default_max_parallel_slices() -> usize {
    3
}

fn default_strict_retry_token_multiplier() -> f32 {
    1.5
}

fn default_max_resplit_depth() -> usize {
    2
}

fn default_call_timeout_secs() -> u64 {
    90
}

fn default_source_script_tolerance() -> f32 {
    0.5
}

fn default_short_word_chars() -> usize {
    3
}

fn default_max_output_tokens() -> u32 {
    2048
}

fn default_true() -> bool {
    true
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_chars_per_request: default_max_chars_per_request(),
            max_items_per_request: default_max_items_per_request(),
            max_parallel_slices: default_max_parallel_slices(),
            strict_retry_token_multiplier: default_strict_retry_token_multiplier(),
            max_resplit_depth: default_max_resplit_depth(),
            call_timeout_secs: default_call_timeout_secs(),
            source_script_tolerance: default_source_script_tolerance(),
            short_word_chars: default_short_word_chars(),
            max_output_tokens: default_max_output_tokens(),
            cache_enabled: true,
            response_format: ResponseFormat::default(),
        }
    }
}

impl BatchingConfig {
    pub fn validation_rules(&self) -> ValidationRules {
        ValidationRules {
            source_script_tolerance: self.source_script_tolerance,
            short_word_chars: self.short_word_chars,
        }
    }

    /// Output token budget for a request carrying `chars` source characters
    pub fn output_budget(&self, chars: usize) -> u32 {
        let estimate = (chars as u32).saturating_mul(4).max(256);
        estimate.min(self.max_output_tokens.max(1))
    }

    fn strict_budget(&self, chars: usize) -> u32 {
        let budget = self.output_budget(chars) as f32 * self.strict_retry_token_multiplier.max(1.0);
        budget.ceil() as u32
    }
}

/// Counters for provider traffic, merged per page and per run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationStats {
    pub provider_calls: usize,
    /// Calls served by a slot other than the first
    pub fallback_calls: usize,
    pub strict_retries: usize,
    pub resplits: usize,
    pub cache_hits: usize,
    pub rejected_items: usize,
    pub failed_items: usize,
    pub chars_sent: usize,
    pub chars_received: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub attempts: Vec<ProviderAttempt>,
}

impl TranslationStats {
    pub fn record_attempts(&mut self, attempts: &[ProviderAttempt]) {
        for attempt in attempts {
            self.provider_calls += 1;
            if attempt.used_fallback {
                self.fallback_calls += 1;
            }
            self.chars_sent += attempt.chars_sent;
            self.chars_received += attempt.chars_received;
        }
        self.attempts.extend_from_slice(attempts);
    }

    fn record_completion(&mut self, completion: &ChainCompletion) {
        self.record_attempts(&completion.attempts);
        self.prompt_tokens += completion.prompt_tokens.unwrap_or(0);
        self.completion_tokens += completion.completion_tokens.unwrap_or(0);
    }

    pub fn absorb(&mut self, other: TranslationStats) {
        self.provider_calls += other.provider_calls;
        self.fallback_calls += other.fallback_calls;
        self.strict_retries += other.strict_retries;
        self.resplits += other.resplits;
        self.cache_hits += other.cache_hits;
        self.rejected_items += other.rejected_items;
        self.failed_items += other.failed_items;
        self.chars_sent += other.chars_sent;
        self.chars_received += other.chars_received;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.attempts.extend(other.attempts);
    }
}

/// Translation of a sentence split across two pages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairTranslation {
    /// Rendered on the carrier page
    pub top: String,
    /// Handed to the next page
    pub bottom: String,
    /// Came from the provider's own split rather than a local one
    pub structured: bool,
}

#[derive(Debug, Clone)]
struct SliceItem {
    /// Index in the caller's batch
    index: usize,
    text: String,
    note: Option<String>,
}

#[derive(Debug, Default)]
struct SliceOutcome {
    translated: Vec<(usize, String)>,
    stats: TranslationStats,
}

/// Group consecutive items into request slices
///
/// A slice closes when adding the next item would pass either limit. An item
/// longer than `max_chars` travels alone.
pub fn plan_chunks(lengths: &[usize], max_chars: usize, max_items: usize) -> Vec<Range<usize>> {
    let max_items = max_items.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut chars = 0;

    for (i, &len) in lengths.iter().enumerate() {
        let count = i - start;
        if count > 0 && (count >= max_items || (max_chars > 0 && chars + len > max_chars)) {
            chunks.push(start..i);
            start = i;
            chars = 0;
        }
        chars += len;
    }
    if start < lengths.len() {
        chunks.push(start..lengths.len());
    }
    chunks
}

/// Note sent alongside an item in the prompt
fn region_note(region: &Region) -> Option<String> {
    if region.is_sound_effect {
        Some("sound effect, keep it short".to_string())
    } else {
        None
    }
}

/// Translates batches of text through a fallback chain
pub struct BatchTranslator {
    chain: Arc<FallbackChain>,
    config: BatchingConfig,
    prompts: PromptBuilder,
    cache: TranslationCache,
    temperature: f32,
    totals: Mutex<TranslationStats>,
}

impl std::fmt::Debug for BatchTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchTranslator")
            .field("chain", &self.chain.describe())
            .field("config", &self.config)
            .finish()
    }
}

impl BatchTranslator {
    pub fn new(chain: Arc<FallbackChain>, config: BatchingConfig) -> Self {
        Self {
            chain,
            cache: TranslationCache::new(config.cache_enabled),
            config,
            prompts: PromptBuilder::default(),
            temperature: 0.3,
            totals: Mutex::new(TranslationStats::default()),
        }
    }

    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    /// Share a cache with another translator of the same run
    pub fn with_cache(mut self, cache: TranslationCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn chain(&self) -> &Arc<FallbackChain> {
        &self.chain
    }

    pub fn config(&self) -> &BatchingConfig {
        &self.config
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    /// Everything this translator has sent so far
    pub fn totals(&self) -> TranslationStats {
        self.totals.lock().clone()
    }

    /// Translate texts, failed items come back as the failure sentinel
    pub async fn translate_batch(
        &self,
        texts: &[String],
        contexts: Option<&[Option<String>]>,
        format: ResponseFormat,
        languages: &LanguagePair,
    ) -> Vec<String> {
        let mut stats = TranslationStats::default();
        self.translate_batch_with_stats(texts, contexts, format, languages, &mut stats)
            .await
    }

    /// Translate texts and add the traffic to `stats`
    pub async fn translate_batch_with_stats(
        &self,
        texts: &[String],
        contexts: Option<&[Option<String>]>,
        format: ResponseFormat,
        languages: &LanguagePair,
        stats: &mut TranslationStats,
    ) -> Vec<String> {
        self.run_batch(texts, contexts, format, languages, stats, true)
            .await
    }

    /// Translate again without reading or writing the cache
    ///
    /// Used for quality retries, where the cached answer is the one being
    /// replaced and the caller decides whether the new one is kept.
    pub async fn retranslate_with_stats(
        &self,
        texts: &[String],
        languages: &LanguagePair,
        stats: &mut TranslationStats,
    ) -> Vec<String> {
        self.run_batch(texts, None, self.config.response_format, languages, stats, false)
            .await
    }

    async fn run_batch(
        &self,
        texts: &[String],
        contexts: Option<&[Option<String>]>,
        format: ResponseFormat,
        languages: &LanguagePair,
        stats: &mut TranslationStats,
        use_cache: bool,
    ) -> Vec<String> {
        let mut local = TranslationStats::default();
        let mut results: Vec<Option<String>> = vec![None; texts.len()];
        let mut pending = Vec::new();

        for (index, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                continue;
            }
            if let Some(hit) = use_cache.then(|| self.cache.get(text, languages)).flatten() {
                local.cache_hits += 1;
                results[index] = Some(hit);
                continue;
            }
            pending.push(SliceItem {
                index,
                text: text.clone(),
                note: contexts.and_then(|c| c.get(index).cloned().flatten()),
            });
        }

        if !pending.is_empty() {
            let lengths: Vec<usize> = pending.iter().map(|i| i.text.chars().count()).collect();
            let chunks = plan_chunks(
                &lengths,
                self.config.max_chars_per_request,
                self.config.max_items_per_request,
            );
            if chunks.len() > 1 {
                debug!("Splitting {} items into {} request slices", pending.len(), chunks.len());
            }

            let mut items = pending.into_iter();
            let slices: Vec<Vec<SliceItem>> = chunks
                .iter()
                .map(|range| items.by_ref().take(range.len()).collect())
                .collect();

            let outcomes: Vec<SliceOutcome> = stream::iter(slices)
                .map(|slice| self.translate_slice(slice, format, languages, 0))
                .buffer_unordered(self.config.max_parallel_slices.max(1))
                .collect()
                .await;

            for outcome in outcomes {
                local.absorb(outcome.stats);
                for (index, text) in outcome.translated {
                    if use_cache {
                        self.cache.store(&texts[index], languages, &text);
                    }
                    results[index] = Some(text);
                }
            }
        }

        let output: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| FAILED_TRANSLATION.to_string()))
            .collect();
        local.failed_items += output.iter().filter(|t| *t == FAILED_TRANSLATION).count();

        self.totals.lock().absorb(local.clone());
        stats.absorb(local);
        output
    }

    fn translate_slice<'a>(
        &'a self,
        items: Vec<SliceItem>,
        format: ResponseFormat,
        languages: &'a LanguagePair,
        depth: usize,
    ) -> BoxFuture<'a, SliceOutcome> {
        async move {
            let rules = self.config.validation_rules();
            let mut stats = TranslationStats::default();
            let mut accepted: BTreeMap<usize, String> = BTreeMap::new();
            let mut outstanding: Vec<usize> = (0..items.len()).collect();
            let mut strict_used = false;
            let mut start_slot = 0;

            while !outstanding.is_empty() && start_slot < self.chain.len() {
                let subset: Vec<&SliceItem> = outstanding.iter().map(|&p| &items[p]).collect();
                let completion = match self
                    .request_numbered(&subset, format, languages, false, start_slot, &mut stats)
                    .await
                {
                    Ok(completion) => completion,
                    Err(error) if matches!(error.error, ProviderError::Truncated(_)) && !strict_used => {
                        strict_used = true;
                        stats.strict_retries += 1;
                        warn!(
                            "Response for {} items was truncated, retrying with a larger budget",
                            subset.len()
                        );
                        match self
                            .request_numbered(&subset, format, languages, true, start_slot, &mut stats)
                            .await
                        {
                            Ok(completion) => completion,
                            Err(_) => break,
                        }
                    }
                    Err(_) => break,
                };

                let mut parsed = parse_response(&completion.text, format);
                let missing = parsed.missing(subset.len());
                if !missing.is_empty() && !strict_used {
                    strict_used = true;
                    stats.strict_retries += 1;
                    warn!(
                        "Response covered {} of {} items, sending strict retry",
                        subset.len() - missing.len(),
                        subset.len()
                    );
                    if let Ok(strict) = self
                        .request_numbered(&subset, format, languages, true, completion.slot, &mut stats)
                        .await
                    {
                        let strict_parsed = parse_response(&strict.text, format);
                        for number in &missing {
                            if let Some(text) = strict_parsed.get(*number) {
                                parsed.items.insert(*number, text.to_string());
                            }
                        }
                    }
                }

                let mut rejected = Vec::new();
                for (offset, &position) in outstanding.iter().enumerate() {
                    let item = &items[position];
                    match parsed.get(offset + 1) {
                        // Missing after the strict retry: the item fails
                        None => {}
                        Some(output) => match validate_translation(&item.text, output, languages, &rules) {
                            Ok(text) => {
                                accepted.insert(position, text);
                            }
                            Err(reason) => {
                                debug!("Rejected item {} on slot {}: {}", item.index, completion.slot, reason);
                                stats.rejected_items += 1;
                                rejected.push(position);
                            }
                        },
                    }
                }

                outstanding = rejected;
                start_slot = completion.slot + 1;
            }

            if accepted.is_empty() && items.len() > 1 && depth < self.config.max_resplit_depth {
                stats.resplits += 1;
                warn!(
                    "All {} items of a slice failed, re-splitting (depth {})",
                    items.len(),
                    depth + 1
                );
                let mut left = items;
                let right = left.split_off(left.len() / 2);
                let halves: Vec<SliceOutcome> = stream::iter(vec![left, right])
                    .map(|half| self.translate_slice(half, format, languages, depth + 1))
                    .buffer_unordered(self.config.max_parallel_slices.clamp(1, 2))
                    .collect()
                    .await;

                let mut outcome = SliceOutcome {
                    translated: Vec::new(),
                    stats,
                };
                for half in halves {
                    outcome.stats.absorb(half.stats);
                    outcome.translated.extend(half.translated);
                }
                return outcome;
            }

            SliceOutcome {
                translated: accepted
                    .into_iter()
                    .map(|(position, text)| (items[position].index, text))
                    .collect(),
                stats,
            }
        }
        .boxed()
    }

    async fn request_numbered(
        &self,
        subset: &[&SliceItem],
        format: ResponseFormat,
        languages: &LanguagePair,
        strict: bool,
        start_slot: usize,
        stats: &mut TranslationStats,
    ) -> Result<ChainCompletion, ChainError> {
        let texts: Vec<&str> = subset.iter().map(|i| i.text.as_str()).collect();
        let notes: Vec<Option<&str>> = subset.iter().map(|i| i.note.as_deref()).collect();
        let chars: usize = texts.iter().map(|t| t.chars().count()).sum();
        let budget = if strict {
            self.config.strict_budget(chars)
        } else {
            self.config.output_budget(chars)
        };

        let request = CompletionRequest::new(self.prompts.numbered(&texts, &notes, format, languages, strict))
            .system(self.prompts.system(languages))
            .max_tokens(budget)
            .temperature(self.temperature);

        self.finish_call(self.chain.complete_from(start_slot, request).await, stats)
    }

    fn finish_call(
        &self,
        result: Result<ChainCompletion, ChainError>,
        stats: &mut TranslationStats,
    ) -> Result<ChainCompletion, ChainError> {
        match &result {
            Ok(completion) => stats.record_completion(completion),
            Err(error) => {
                warn!("Translation request failed: {}", error);
                stats.record_attempts(&error.attempts);
            }
        }
        result
    }

    /// Structured translation of a sentence split across a page boundary
    pub async fn translate_pair(
        &self,
        top: &str,
        bottom: &str,
        languages: &LanguagePair,
    ) -> Option<PairTranslation> {
        let mut stats = TranslationStats::default();
        self.translate_pair_with_stats(top, bottom, languages, &mut stats)
            .await
    }

    /// Pair translation adding the traffic to `stats`
    pub async fn translate_pair_with_stats(
        &self,
        top: &str,
        bottom: &str,
        languages: &LanguagePair,
        stats: &mut TranslationStats,
    ) -> Option<PairTranslation> {
        let mut local = TranslationStats::default();
        let chars = top.chars().count() + bottom.chars().count();
        let request = CompletionRequest::new(self.prompts.pair(top, bottom, languages))
            .system(self.prompts.system(languages))
            .max_tokens(self.config.output_budget(chars))
            .temperature(self.temperature);

        let completion = self.finish_call(self.chain.complete(request).await, &mut local).ok();
        let result = completion.and_then(|completion| {
            let (top_out, bottom_out) = match parse_pair(&completion.text) {
                Some(pair) => pair,
                None => {
                    warn!("Pair response was not a top/bottom object");
                    return None;
                }
            };
            let rules = self.config.validation_rules();
            match (
                validate_translation(top, &top_out, languages, &rules),
                validate_translation(bottom, &bottom_out, languages, &rules),
            ) {
                (Ok(top), Ok(bottom)) => Some(PairTranslation {
                    top,
                    bottom,
                    structured: true,
                }),
                (top_check, bottom_check) => {
                    warn!(
                        "Pair translation rejected (top: {:?}, bottom: {:?})",
                        top_check.err(),
                        bottom_check.err()
                    );
                    local.rejected_items += 1;
                    None
                }
            }
        });

        self.totals.lock().absorb(local.clone());
        stats.absorb(local);
        result
    }

    /// Translate every region of a page that still needs it
    ///
    /// Returns the number of regions sent.
    pub async fn translate_regions(&self, context: &mut PageContext) -> usize {
        let indices: Vec<usize> = context
            .regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.needs_translation())
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            debug!("Page {}: nothing to translate", context.id);
            return 0;
        }

        let texts: Vec<String> = indices
            .iter()
            .map(|&i| context.regions[i].translation_input().to_string())
            .collect();
        let notes: Vec<Option<String>> = indices.iter().map(|&i| region_note(&context.regions[i])).collect();
        let languages = context.languages.clone();

        let mut stats = TranslationStats::default();
        let outputs = self
            .translate_batch_with_stats(&texts, Some(&notes), self.config.response_format, &languages, &mut stats)
            .await;

        let mut failed = 0;
        for (&i, output) in indices.iter().zip(outputs) {
            let region = &mut context.regions[i];
            if output == FAILED_TRANSLATION {
                region.mark_failed();
                failed += 1;
            } else {
                region.target_text = Some(output);
            }
        }

        info!(
            "Page {}: translated {} regions ({} failed, {} provider calls)",
            context.id,
            indices.len() - failed,
            failed,
            stats.provider_calls
        );
        context.metrics.translation.absorb(stats);
        indices.len()
    }
}
