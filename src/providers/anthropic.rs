use std::time::Duration;

use async_trait::async_trait;
use log::error;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;

use super::{transport_error, CompletionRequest, CompletionResponse, Provider};

/// Anthropic client for interacting with the Anthropic API
#[derive(Debug)]
pub struct Anthropic {
    /// HTTP client for API requests
    client: Client,
    /// API key for authentication
    api_key: String,
    /// API endpoint URL, empty for the public API
    endpoint: String,
    /// Model used for completions
    model: String,
}

/// Anthropic message request
#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
}

/// Anthropic message format
#[derive(Debug, Serialize, Deserialize)]
pub struct AnthropicMessage {
    /// Role of the message sender (user, assistant)
    pub role: String,
    pub content: String,
}

/// Token usage information
#[derive(Debug, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Anthropic response
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    pub content: Vec<AnthropicContent>,
    pub usage: TokenUsage,
    /// `end_turn`, `max_tokens`, `stop_sequence`
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// Individual content block in an Anthropic response
#[derive(Debug, Deserialize)]
pub struct AnthropicContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

impl AnthropicRequest {
    fn from_completion(model: &str, request: CompletionRequest) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: request.prompt,
            }],
            system: request.system,
            temperature: Some(request.temperature),
            max_tokens: request.max_tokens,
        }
    }
}

impl Anthropic {
    /// Create a new Anthropic client
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }

    fn messages_url(&self) -> String {
        if self.endpoint.is_empty() {
            "https://api.anthropic.com/v1/messages".to_string()
        } else {
            format!("{}/v1/messages", self.endpoint.trim_end_matches('/'))
        }
    }

    /// Send a messages request
    pub async fn send(&self, request: &AnthropicRequest) -> Result<AnthropicResponse, ProviderError> {
        let response = self
            .client
            .post(self.messages_url())
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("Anthropic API error ({}): {}", status, error_text);
            return Err(ProviderError::from_status(status.as_u16(), error_text));
        }

        response
            .json::<AnthropicResponse>()
            .await
            .map_err(|e| ProviderError::ParseError(format!("Failed to parse Anthropic API response: {}", e)))
    }

    /// Extract text from an Anthropic response
    pub fn extract_text_from_response(response: &AnthropicResponse) -> String {
        response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect()
    }
}

#[async_trait]
impl Provider for Anthropic {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let response = self
            .send(&AnthropicRequest::from_completion(&self.model, request))
            .await?;
        Self::completion_from_response(&response)
    }
}

impl Anthropic {
    /// Completion for a response, rejecting replies cut off at `max_tokens`
    fn completion_from_response(response: &AnthropicResponse) -> Result<CompletionResponse, ProviderError> {
        if response.stop_reason.as_deref() == Some("max_tokens") {
            return Err(ProviderError::Truncated("max_tokens".to_string()));
        }
        let text = Self::extract_text_from_response(response);
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(CompletionResponse {
            text,
            prompt_tokens: Some(response.usage.input_tokens as u64),
            completion_tokens: Some(response.usage.output_tokens as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messagesUrl_shouldDefaultToPublicApi() {
        let client = Anthropic::new("k", "", "claude-3-haiku", Duration::from_secs(5));
        assert_eq!(client.messages_url(), "https://api.anthropic.com/v1/messages");
        let client = Anthropic::new("k", "http://proxy/", "claude-3-haiku", Duration::from_secs(5));
        assert_eq!(client.messages_url(), "http://proxy/v1/messages");
    }

    #[test]
    fn test_extractText_shouldSkipNonTextBlocks() {
        let response: AnthropicResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"1. Hi"},{"type":"tool_use"}],"usage":{"input_tokens":3,"output_tokens":2}}"#,
        )
        .unwrap();
        assert_eq!(Anthropic::extract_text_from_response(&response), "1. Hi");
    }

    #[test]
    fn test_completionFromResponse_maxTokensStop_shouldBeTruncated() {
        let response: AnthropicResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"1. Hello\n2. I was go"}],"stop_reason":"max_tokens","usage":{"input_tokens":30,"output_tokens":256}}"#,
        )
        .unwrap();
        let error = Anthropic::completion_from_response(&response).unwrap_err();
        assert!(matches!(error, ProviderError::Truncated(_)));

        let finished: AnthropicResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"1. Hello"}],"stop_reason":"end_turn","usage":{"input_tokens":30,"output_tokens":4}}"#,
        )
        .unwrap();
        assert_eq!(Anthropic::completion_from_response(&finished).unwrap().text, "1. Hello");
    }
}
