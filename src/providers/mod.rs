/*!
 * Provider implementations for the translation engine.
 *
 * This module contains client implementations for the supported LLM
 * providers behind one `Provider` capability:
 * - Ollama: Local LLM server
 * - OpenAI: OpenAI API and OpenAI-compatible servers such as LM Studio
 * - Anthropic: Anthropic API integration
 * - Mock: scripted provider for tests
 */

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;

use crate::app_config::{ProviderConfig, TranslationCommonConfig, TranslationProvider};
use crate::errors::ProviderError;

pub mod anthropic;
pub mod mock;
pub mod ollama;
pub mod openai;

/// A single completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// System prompt
    pub system: Option<String>,
    /// User prompt
    pub prompt: String,
    /// Output token budget
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: 1024,
            temperature: 0.3,
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Characters sent, system prompt included
    pub fn char_count(&self) -> usize {
        self.prompt.chars().count() + self.system.as_deref().map(|s| s.chars().count()).unwrap_or(0)
    }
}

/// Text returned by a provider with optional token usage
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompletionResponse {
    pub text: String,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

/// Common trait for all LLM providers
///
/// Implementations map their transport failures onto `ProviderError` so the
/// fallback chain can tell transient errors from permanent ones.
#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// Provider identifier, shared by every model of the same service
    fn name(&self) -> &str;

    /// Model used for completions
    fn model(&self) -> &str;

    /// Complete a request
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Test the connection to the provider
    async fn test_connection(&self) -> Result<(), ProviderError> {
        self.complete(CompletionRequest::new("Hello").max_tokens(10))
            .await
            .map(|_| ())
    }
}

/// Exponential backoff with jitter, in milliseconds
pub(crate) fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(10));
    let jitter = if base_ms > 0 {
        rand::rng().random_range(0..=base_ms / 2)
    } else {
        0
    };
    Duration::from_millis(exp + jitter)
}

/// Map a reqwest transport error onto a provider error
pub(crate) fn transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(0)
    } else if error.is_connect() {
        ProviderError::ConnectionError(error.to_string())
    } else {
        ProviderError::RequestFailed(error.to_string())
    }
}

/// Build a provider for a configured service, optionally with another model
pub fn build_provider(
    config: &ProviderConfig,
    model_override: Option<&str>,
    common: &TranslationCommonConfig,
) -> Result<Arc<dyn Provider>> {
    let kind: TranslationProvider = config.provider_type.parse()?;
    let model = model_override
        .filter(|m| !m.is_empty())
        .unwrap_or(&config.model)
        .to_string();
    if model.is_empty() {
        return Err(anyhow!("No model configured for provider {}", kind));
    }
    let timeout = Duration::from_secs(config.timeout_secs.max(1));

    let provider: Arc<dyn Provider> = match kind {
        TranslationProvider::Ollama => Arc::new(ollama::Ollama::new_with_config(
            &config.endpoint,
            model,
            timeout,
            common.retry_count,
            common.retry_backoff_ms,
        )),
        TranslationProvider::OpenAI | TranslationProvider::LMStudio => {
            Arc::new(openai::OpenAI::new(
                kind.to_lowercase_string(),
                &config.api_key,
                &config.endpoint,
                model,
                timeout,
            ))
        }
        TranslationProvider::Anthropic => Arc::new(anthropic::Anthropic::new(
            &config.api_key,
            &config.endpoint,
            model,
            timeout,
        )),
    };
    Ok(provider)
}
