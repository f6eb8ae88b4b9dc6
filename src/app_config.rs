use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::continuity::ContinuityConfig;
use crate::detection::{ConsolidationConfig, MergeConfig, TileConfig};
use crate::pipeline::PipelineConfig;
use crate::translation::{BatchingConfig, QualityConfig, DEFAULT_SYSTEM_PROMPT};

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Source language code (ISO)
    pub source_language: String,

    /// Target language code (ISO)
    pub target_language: String,

    /// Translation config
    pub translation: TranslationConfig,

    #[serde(default)]
    pub batching: BatchingConfig,

    #[serde(default)]
    pub tiling: TileConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub consolidation: ConsolidationConfig,

    #[serde(default)]
    pub continuity: ContinuityConfig,

    #[serde(default)]
    pub quality: QualityConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Translation provider type
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranslationProvider {
    // @provider: Ollama
    #[default]
    Ollama,
    // @provider: OpenAI
    OpenAI,
    // @provider: Anthropic
    Anthropic,
    // @provider: LM Studio (OpenAI-compatible local server)
    LMStudio,
}

impl TranslationProvider {
    // @returns: Capitalized provider name
    pub fn display_name(&self) -> &str {
        match self {
            Self::Ollama => "Ollama",
            Self::OpenAI => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::LMStudio => "LM Studio",
        }
    }

    // @returns: Lowercase provider identifier
    pub fn to_lowercase_string(&self) -> String {
        match self {
            Self::Ollama => "ollama".to_string(),
            Self::OpenAI => "openai".to_string(),
            Self::Anthropic => "anthropic".to_string(),
            Self::LMStudio => "lmstudio".to_string(),
        }
    }

    /// Hosted providers need an API key
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAI | Self::Anthropic)
    }
}

impl std::fmt::Display for TranslationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_lowercase_string())
    }
}

impl std::str::FromStr for TranslationProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            "lmstudio" => Ok(Self::LMStudio),
            _ => Err(anyhow!("Invalid provider type: {}", s)),
        }
    }
}

/// Provider configuration wrapper
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    // @field: Provider type identifier
    #[serde(rename = "type")]
    pub provider_type: String,

    // @field: Model name
    #[serde(default = "String::new")]
    pub model: String,

    // @field: API key
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: Service URL
    #[serde(default = "String::new")]
    pub endpoint: String,

    // @field: Max concurrent requests
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,

    // @field: Max chars per request
    #[serde(default = "default_max_chars_per_request")]
    pub max_chars_per_request: usize,

    // @field: Timeout seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    // @field: Rate limit (requests per minute)
    #[serde(default)]
    pub rate_limit: Option<u32>,
}

impl ProviderConfig {
    // @param provider_type: Provider enum
    // @returns: Provider config with defaults
    pub fn new(provider_type: TranslationProvider) -> Self {
        let base = Self {
            provider_type: provider_type.to_lowercase_string(),
            model: String::new(),
            api_key: String::new(),
            endpoint: String::new(),
            concurrent_requests: default_concurrent_requests(),
            max_chars_per_request: default_max_chars_per_request(),
            timeout_secs: default_timeout_secs(),
            rate_limit: None,
        };
        match provider_type {
            TranslationProvider::Ollama => Self {
                model: default_ollama_model(),
                endpoint: default_ollama_endpoint(),
                ..base
            },
            TranslationProvider::OpenAI => Self {
                model: default_openai_model(),
                endpoint: default_openai_endpoint(),
                rate_limit: default_openai_rate_limit(),
                ..base
            },
            TranslationProvider::Anthropic => Self {
                model: default_anthropic_model(),
                endpoint: default_anthropic_endpoint(),
                max_chars_per_request: default_anthropic_max_chars_per_request(),
                timeout_secs: default_anthropic_timeout_secs(),
                rate_limit: default_anthropic_rate_limit(),
                ..base
            },
            TranslationProvider::LMStudio => Self {
                model: default_lmstudio_model(),
                endpoint: default_lmstudio_endpoint(),
                ..base
            },
        }
    }

    pub fn kind(&self) -> Result<TranslationProvider> {
        self.provider_type.parse()
    }
}

/// One entry of the ordered fallback chain
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FallbackSlot {
    pub provider: TranslationProvider,

    /// Model to call; empty uses the provider's configured model
    #[serde(default)]
    pub model: String,
}

impl FallbackSlot {
    pub fn new(provider: TranslationProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

/// Translation service configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationConfig {
    /// Translation provider to use
    #[serde(default)]
    pub provider: TranslationProvider,

    /// Available translation providers
    #[serde(default)]
    pub available_providers: Vec<ProviderConfig>,

    /// Common translation settings
    #[serde(default)]
    pub common: TranslationCommonConfig,
}

/// Common translation settings applicable to all providers
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationCommonConfig {
    /// System prompt template for translation
    /// Placeholders: {source_language}, {target_language}
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Retry count for failed requests
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Backoff multiplier for retries (in milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Temperature parameter for text generation (0.0 to 1.0)
    /// Lower values make output more deterministic, higher values more creative
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Slots tried after the active provider's configured model, in order
    #[serde(default)]
    pub fallback_chain: Vec<FallbackSlot>,
}

impl Default for TranslationCommonConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
            temperature: default_temperature(),
            fallback_chain: Vec::new(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<&LogLevel> for log::LevelFilter {
    fn from(level: &LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_concurrent_requests() -> usize {
    4
}

fn default_max_chars_per_request() -> usize {
    3000
}

fn default_anthropic_max_chars_per_request() -> usize {
    8000
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_anthropic_timeout_secs() -> u64 {
    90
}

fn default_retry_count() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    1000 // base backoff, doubled on each retry
}

fn default_temperature() -> f32 {
    0.3
}

fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_openai_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_anthropic_endpoint() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_lmstudio_endpoint() -> String {
    // LM Studio default server (OpenAI compatible) runs on port 1234 under /v1
    "http://localhost:1234/v1".to_string()
}

fn default_ollama_model() -> String {
    "qwen2.5:7b".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_lmstudio_model() -> String {
    // Placeholder; users should set to the loaded model name in LM Studio
    "local-model".to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_anthropic_rate_limit() -> Option<u32> {
    // Anthropic's standard tier allows 50 requests per minute
    Some(45)
}

fn default_openai_rate_limit() -> Option<u32> {
    Some(60)
}

impl Config {
    /// Load a configuration file, creating it with defaults when missing
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let file = File::open(path).with_context(|| format!("Failed to open config file: {:?}", path))?;
            let reader = BufReader::new(file);
            serde_json::from_reader(reader).with_context(|| format!("Failed to parse config file: {:?}", path))
        } else {
            warn!("Config file not found at {:?}, creating default config.", path);
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config to JSON")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write config to file: {:?}", path))
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        crate::language_utils::get_language_name(&self.source_language)
            .context("Invalid source language")?;
        crate::language_utils::get_language_name(&self.target_language)
            .context("Invalid target language")?;

        let mut providers = vec![self.translation.provider.clone()];
        providers.extend(self.translation.common.fallback_chain.iter().map(|s| s.provider.clone()));
        for provider in providers {
            let config = self
                .translation
                .get_provider_config(&provider)
                .ok_or_else(|| anyhow!("No configuration for provider {}", provider))?;
            if provider.requires_api_key() && config.api_key.is_empty() {
                return Err(anyhow!("Translation API key is required for {} provider", provider.display_name()));
            }
        }

        let temperature = self.translation.common.temperature;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(anyhow!("Temperature must be between 0.0 and 2.0, got {}", temperature));
        }
        if self.batching.max_chars_per_request == 0 || self.batching.max_items_per_request == 0 {
            return Err(anyhow!("Batching limits must be greater than zero"));
        }
        if self.batching.max_parallel_slices == 0 {
            return Err(anyhow!("batching.max_parallel_slices must be at least 1"));
        }
        if self.pipeline.max_concurrency == 0 {
            return Err(anyhow!("pipeline.max_concurrency must be at least 1"));
        }
        if self.pipeline.carryover_capacity == 0 {
            return Err(anyhow!("pipeline.carryover_capacity must be at least 1"));
        }
        for (name, ratio) in [
            ("continuity.edge_margin_ratio", self.continuity.edge_margin_ratio),
            ("continuity.min_overlap_ratio", self.continuity.min_overlap_ratio),
            ("quality.retry_threshold", self.quality.retry_threshold),
            ("quality.confidence_weight", self.quality.confidence_weight),
            ("merge.iou_threshold", self.merge.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(anyhow!("{} must be between 0.0 and 1.0, got {}", name, ratio));
            }
        }
        if self.tiling.tile_height == 0 {
            return Err(anyhow!("tiling.tile_height must be greater than zero"));
        }

        Ok(())
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: "ja".to_string(),
            target_language: "en".to_string(),
            translation: TranslationConfig::default(),
            batching: BatchingConfig::default(),
            tiling: TileConfig::default(),
            merge: MergeConfig::default(),
            consolidation: ConsolidationConfig::default(),
            continuity: ContinuityConfig::default(),
            quality: QualityConfig::default(),
            pipeline: PipelineConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl TranslationConfig {
    /// Get the active provider configuration from the available_providers array
    pub fn get_active_provider_config(&self) -> Option<&ProviderConfig> {
        self.get_provider_config(&self.provider)
    }

    /// Get a specific provider configuration by type
    pub fn get_provider_config(&self, provider_type: &TranslationProvider) -> Option<&ProviderConfig> {
        let provider_str = provider_type.to_lowercase_string();
        self.available_providers.iter().find(|p| p.provider_type == provider_str)
    }

    /// Mutable access to the active provider's configuration
    pub fn active_provider_config_mut(&mut self) -> Option<&mut ProviderConfig> {
        let provider_str = self.provider.to_lowercase_string();
        self.available_providers.iter_mut().find(|p| p.provider_type == provider_str)
    }

    /// Ordered `(provider config, model)` slots: the active provider first,
    /// then the configured fallback chain
    pub fn chain_slots(&self) -> Result<Vec<(&ProviderConfig, String)>> {
        let active = self
            .get_active_provider_config()
            .ok_or_else(|| anyhow!("No configuration for provider {}", self.provider))?;
        let mut slots = vec![(active, active.model.clone())];
        for slot in &self.common.fallback_chain {
            let config = self
                .get_provider_config(&slot.provider)
                .ok_or_else(|| anyhow!("No configuration for fallback provider {}", slot.provider))?;
            let model = if slot.model.is_empty() {
                config.model.clone()
            } else {
                slot.model.clone()
            };
            if slots.iter().any(|(c, m)| c.provider_type == config.provider_type && *m == model) {
                continue;
            }
            slots.push((config, model));
        }
        Ok(slots)
    }

    /// Get the rate limit for the active provider
    pub fn get_rate_limit(&self) -> Option<u32> {
        self.get_active_provider_config().and_then(|p| p.rate_limit)
    }

    /// Get the concurrent request limit for the active provider
    pub fn optimal_concurrent_requests(&self) -> usize {
        self.get_active_provider_config()
            .map(|p| p.concurrent_requests)
            .unwrap_or_else(default_concurrent_requests)
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: TranslationProvider::default(),
            available_providers: vec![
                ProviderConfig::new(TranslationProvider::Ollama),
                ProviderConfig::new(TranslationProvider::OpenAI),
                ProviderConfig::new(TranslationProvider::Anthropic),
                ProviderConfig::new(TranslationProvider::LMStudio),
            ],
            common: TranslationCommonConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_loadOrCreate_missingFile_shouldWriteDefaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf.json");
        let config = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.source_language, "ja");

        let reloaded = Config::load_or_create(&path).unwrap();
        assert_eq!(reloaded.batching, BatchingConfig::default());
    }

    #[test]
    fn test_deserialize_partialDocument_shouldFillSectionDefaults() {
        let json = r#"{
            "source_language": "ko",
            "target_language": "en",
            "translation": { "provider": "ollama" },
            "continuity": { "min_overlap_ratio": 0.7 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.continuity.min_overlap_ratio, 0.7);
        assert_eq!(config.continuity.edge_margin_min_px, ContinuityConfig::default().edge_margin_min_px);
        assert_eq!(config.pipeline, PipelineConfig::default());
        assert!(config.translation.available_providers.is_empty());
    }

    #[test]
    fn test_validate_hostedProviderWithoutKey_shouldFail() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.translation.common.fallback_chain = vec![FallbackSlot::new(TranslationProvider::OpenAI, "")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_badLanguage_shouldFail() {
        let config = Config {
            source_language: "xx-invalid".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_outOfRangeRatio_shouldFail() {
        let mut config = Config::default();
        config.continuity.min_overlap_ratio = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chainSlots_shouldPutActiveFirstAndSkipDuplicates() {
        let mut config = TranslationConfig::default();
        config.common.fallback_chain = vec![
            FallbackSlot::new(TranslationProvider::Ollama, "qwen2.5:14b"),
            FallbackSlot::new(TranslationProvider::Ollama, ""),
            FallbackSlot::new(TranslationProvider::LMStudio, ""),
        ];
        let slots: Vec<_> = config
            .chain_slots()
            .unwrap()
            .into_iter()
            .map(|(c, m)| format!("{}/{}", c.provider_type, m))
            .collect();
        assert_eq!(slots, vec!["ollama/qwen2.5:7b", "ollama/qwen2.5:14b", "lmstudio/local-model"]);
    }
}
