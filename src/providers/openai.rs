use std::time::Duration;

use async_trait::async_trait;
use log::error;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;

use super::{transport_error, CompletionRequest, CompletionResponse, Provider};

/// Client for OpenAI and OpenAI-compatible chat completion endpoints
#[derive(Debug)]
pub struct OpenAI {
    /// Provider identifier, `openai` or `lmstudio`
    name: String,
    client: Client,
    api_key: String,
    /// Base URL ending in `/v1`
    endpoint: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl OpenAI {
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }

    fn completions_url(&self) -> String {
        let base = if self.endpoint.is_empty() {
            "https://api.openai.com/v1"
        } else {
            self.endpoint.trim_end_matches('/')
        };
        format!("{}/chat/completions", base)
    }

    fn chat_request(&self, request: CompletionRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt,
        });
        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl Provider for OpenAI {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let mut builder = self
            .client
            .post(self.completions_url())
            .json(&self.chat_request(request));
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("{} API error ({}): {}", self.name, status, error_text);
            return Err(ProviderError::from_status(status.as_u16(), error_text));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(format!("Failed to parse {} response: {}", self.name, e)))?;
        completion_from_chat(chat)
    }
}

/// Text and usage of the first choice; a `length` finish is a truncation
fn completion_from_chat(chat: ChatResponse) -> Result<CompletionResponse, ProviderError> {
    let usage = chat.usage;
    let choice = chat.choices.into_iter().next();
    if let Some(reason) = choice.as_ref().and_then(|c| c.finish_reason.as_deref()) {
        if reason == "length" {
            return Err(ProviderError::Truncated(reason.to_string()));
        }
    }
    let text = choice.map(|c| c.message.content).unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(CompletionResponse {
        text,
        prompt_tokens: usage.as_ref().map(|u| u.prompt_tokens),
        completion_tokens: usage.as_ref().map(|u| u.completion_tokens),
    })
}
