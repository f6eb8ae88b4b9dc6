use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;

use super::{backoff_delay, transport_error, CompletionRequest, CompletionResponse, Provider};

/// Ollama client for interacting with the Ollama API
#[derive(Debug)]
pub struct Ollama {
    /// Base URL of the Ollama API
    base_url: String,
    /// Model used for generation
    model: String,
    /// HTTP client for making requests
    client: Client,
    /// Maximum number of retry attempts on server errors
    max_retries: u32,
    /// Base backoff time in milliseconds for exponential backoff
    backoff_base_ms: u64,
}

/// Generate request for the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerationOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

/// Generation options for the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// Generation response from the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationResponse {
    #[serde(default)]
    pub model: String,
    /// Generated text
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    /// `stop` or `length` on the final chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    /// Number of prompt tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    /// Number of generated tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
}

impl GenerationResponse {
    /// Completion for a finished generation; hitting `num_predict` is a truncation
    pub fn into_completion(self) -> Result<CompletionResponse, ProviderError> {
        if self.done_reason.as_deref() == Some("length") {
            return Err(ProviderError::Truncated("length".to_string()));
        }
        if self.response.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(CompletionResponse {
            text: self.response,
            prompt_tokens: self.prompt_eval_count,
            completion_tokens: self.eval_count,
        })
    }
}

impl GenerationRequest {
    fn from_completion(model: &str, request: &CompletionRequest) -> Self {
        Self {
            model: model.to_string(),
            prompt: request.prompt.clone(),
            system: request.system.clone(),
            options: Some(GenerationOptions {
                temperature: Some(request.temperature),
                num_predict: Some(request.max_tokens),
            }),
            stream: Some(false),
        }
    }
}

/// Normalise a host into a base URL with scheme and port
fn base_url(host: &str, default_port: u16) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.is_empty() {
        return format!("http://localhost:{}", default_port);
    }
    match host.split_once("://") {
        Some((scheme, rest)) if rest.contains(':') => format!("{}://{}", scheme, rest),
        Some((scheme, rest)) => format!("{}://{}:{}", scheme, rest, default_port),
        None if host.contains(':') => format!("http://{}", host),
        None => format!("http://{}:{}", host, default_port),
    }
}

/// Parse a generate body, accepting a single object or a JSONL stream
pub fn parse_generation_body(body: &str) -> Result<GenerationResponse, ProviderError> {
    if let Ok(response) = serde_json::from_str::<GenerationResponse>(body) {
        return Ok(response);
    }

    // Streamed output: one object per line, text split across lines
    let mut text = String::new();
    let mut last: Option<GenerationResponse> = None;
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let chunk: GenerationResponse = serde_json::from_str(line).map_err(|e| {
            ProviderError::ParseError(format!("Invalid Ollama response line: {}", e))
        })?;
        text.push_str(&chunk.response);
        last = Some(chunk);
    }

    match last {
        Some(mut last) => {
            last.response = text;
            Ok(last)
        }
        None => Err(ProviderError::ParseError("Empty Ollama response body".to_string())),
    }
}

impl Ollama {
    /// Create a new Ollama client for a model
    pub fn new(host: impl AsRef<str>, model: impl Into<String>) -> Self {
        Self::new_with_config(host, model, Duration::from_secs(120), 2, 1000)
    }

    /// Create a new Ollama client with retry configuration
    ///
    /// Ollama uses HTTP/1.1; connections are kept alive for parallel requests.
    pub fn new_with_config(
        host: impl AsRef<str>,
        model: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
        backoff_base_ms: u64,
    ) -> Self {
        Self {
            base_url: base_url(host.as_ref(), 11434),
            model: model.into(),
            client: Client::builder()
                .timeout(timeout)
                .http1_only()
                .pool_idle_timeout(Duration::from_secs(90))
                .pool_max_idle_per_host(20)
                .tcp_keepalive(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            max_retries,
            backoff_base_ms,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Generate text from the Ollama API with retry logic
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        let mut attempt = 0;

        loop {
            let result = self.client.post(&url).json(request).send().await;
            let error = match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response.text().await.map_err(transport_error)?;
                        return parse_generation_body(&body);
                    }
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Failed to get error response text".to_string());
                    let error = ProviderError::from_status(status.as_u16(), error_text);
                    if !status.is_server_error() {
                        error!("Ollama API error ({}): {}", status, error);
                        return Err(error);
                    }
                    error
                }
                Err(e) => transport_error(e),
            };

            if attempt >= self.max_retries {
                error!("Ollama request failed after {} attempts: {}", attempt + 1, error);
                return Err(error);
            }
            warn!(
                "Ollama request failed: {} - attempt {}/{}",
                error,
                attempt + 1,
                self.max_retries + 1
            );
            tokio::time::sleep(backoff_delay(self.backoff_base_ms, attempt)).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl Provider for Ollama {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let generation = GenerationRequest::from_completion(&self.model, &request);
        let response = self.generate(&generation).await?;
        debug!(
            "Ollama {} returned {} chars",
            self.model,
            response.response.chars().count()
        );
        response.into_completion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseUrl_shouldAddSchemeAndPort() {
        assert_eq!(base_url("localhost", 11434), "http://localhost:11434");
        assert_eq!(base_url("http://gpu-box", 11434), "http://gpu-box:11434");
        assert_eq!(base_url("http://gpu-box:9000/", 11434), "http://gpu-box:9000");
        assert_eq!(base_url("", 11434), "http://localhost:11434");
    }

    #[test]
    fn test_parseGenerationBody_shouldJoinStreamedLines() {
        let body = "{\"model\":\"m\",\"response\":\"1. Hel\",\"done\":false}\n{\"model\":\"m\",\"response\":\"lo\",\"done\":true,\"eval_count\":3}";
        let parsed = parse_generation_body(body).unwrap();
        assert_eq!(parsed.response, "1. Hello");
        assert_eq!(parsed.eval_count, Some(3));
    }

    #[test]
    fn test_parseGenerationBody_invalid_shouldBeParseError() {
        assert!(matches!(
            parse_generation_body("not json"),
            Err(ProviderError::ParseError(_))
        ));
    }

    #[test]
    fn test_intoCompletion_lengthDoneReason_shouldBeTruncated() {
        let body = "{\"model\":\"m\",\"response\":\"1. Hello\\n2. I was\",\"done\":false}\n{\"model\":\"m\",\"response\":\" go\",\"done\":true,\"done_reason\":\"length\"}";
        let parsed = parse_generation_body(body).unwrap();
        assert!(matches!(parsed.into_completion(), Err(ProviderError::Truncated(_))));

        let finished = parse_generation_body("{\"response\":\"1. Hello\",\"done\":true,\"done_reason\":\"stop\"}").unwrap();
        assert_eq!(finished.into_completion().unwrap().text, "1. Hello");
    }
}
