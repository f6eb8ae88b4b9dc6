/*!
 * Mock provider implementations for testing.
 *
 * The mock understands the numbered and pair prompt layouts produced by
 * `translation::prompts` and answers them with a configurable translator:
 * - `MockProvider::working()` - translates every numbered line
 * - `MockProvider::echo()` - returns the source lines unchanged
 * - `MockProvider::missing_lines(n)` - answers only the first `n` lines
 * - `MockProvider::failing(error)` - always fails with the given error
 * - `MockProvider::truncating(n)` - cut off unless granted `n` output tokens
 * - `MockProvider::scripted(..)` - replays queued responses in order
 */

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::ProviderError;
use crate::providers::{CompletionRequest, CompletionResponse, Provider};
use crate::translation::parser::parse_numbered;
use crate::translation::prompts::{PAIR_BOTTOM_LABEL, PAIR_TOP_LABEL};

/// Translator applied to each source item
pub type MockTranslator = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Behavior mode for the mock provider
#[derive(Clone)]
pub enum MockBehavior {
    /// Translates every requested item
    Working,
    /// Returns the source items unchanged
    Echo,
    /// Answers only the first `keep` numbered items
    MissingLines { keep: usize },
    /// Fails every `fail_every`th request with a 503
    Intermittent { fail_every: usize },
    /// Always fails with this error
    Failing(ProviderError),
    /// Returns an empty body
    Empty,
    /// Translates after a delay
    Slow { delay_ms: u64 },
    /// Reports truncation when `max_tokens` is below `min_tokens`
    Truncating { min_tokens: u32 },
    /// Replays queued results, then behaves like `Working`
    Scripted(Arc<Mutex<VecDeque<Result<String, ProviderError>>>>),
}

impl std::fmt::Debug for MockBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Working => write!(f, "Working"),
            Self::Echo => write!(f, "Echo"),
            Self::MissingLines { keep } => write!(f, "MissingLines({})", keep),
            Self::Intermittent { fail_every } => write!(f, "Intermittent({})", fail_every),
            Self::Failing(e) => write!(f, "Failing({})", e),
            Self::Empty => write!(f, "Empty"),
            Self::Slow { delay_ms } => write!(f, "Slow({}ms)", delay_ms),
            Self::Truncating { min_tokens } => write!(f, "Truncating(<{})", min_tokens),
            Self::Scripted(queue) => write!(f, "Scripted({} left)", queue.lock().len()),
        }
    }
}

/// Mock provider for testing translation behavior
#[derive(Clone)]
pub struct MockProvider {
    name: String,
    model: String,
    behavior: MockBehavior,
    translator: MockTranslator,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("behavior", &self.behavior)
            .finish()
    }
}

fn default_translator() -> MockTranslator {
    Arc::new(|text: &str| format!("[tr] {}", text))
}

impl MockProvider {
    /// Create a new mock provider with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            name: "mock".to_string(),
            model: "mock-model".to_string(),
            behavior,
            translator: default_translator(),
            request_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    pub fn echo() -> Self {
        Self::new(MockBehavior::Echo)
    }

    pub fn missing_lines(keep: usize) -> Self {
        Self::new(MockBehavior::MissingLines { keep })
    }

    pub fn intermittent(fail_every: usize) -> Self {
        Self::new(MockBehavior::Intermittent {
            fail_every: fail_every.max(1),
        })
    }

    pub fn failing(error: ProviderError) -> Self {
        Self::new(MockBehavior::Failing(error))
    }

    pub fn empty() -> Self {
        Self::new(MockBehavior::Empty)
    }

    pub fn slow(delay_ms: u64) -> Self {
        Self::new(MockBehavior::Slow { delay_ms })
    }

    pub fn truncating(min_tokens: u32) -> Self {
        Self::new(MockBehavior::Truncating { min_tokens })
    }

    pub fn scripted(responses: Vec<Result<String, ProviderError>>) -> Self {
        Self::new(MockBehavior::Scripted(Arc::new(Mutex::new(responses.into()))))
    }

    /// Set the provider and model identity
    pub fn named(mut self, name: impl Into<String>, model: impl Into<String>) -> Self {
        self.name = name.into();
        self.model = model.into();
        self
    }

    /// Set the per-item translator
    pub fn with_translator(mut self, translator: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.translator = Arc::new(translator);
        self
    }

    /// Number of completed or failed calls
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    fn answer(&self, prompt: &str, keep: Option<usize>, echo: bool) -> String {
        let apply = |text: &str| {
            if echo {
                text.to_string()
            } else {
                (self.translator)(text)
            }
        };

        if let Some(pair) = pair_items(prompt) {
            return serde_json::json!({
                "top": apply(&pair.0),
                "bottom": apply(&pair.1),
            })
            .to_string();
        }

        let parsed = parse_numbered(prompt);
        let limit = keep.unwrap_or(usize::MAX);
        parsed
            .items
            .iter()
            .take(limit)
            .map(|(index, text)| format!("{}. {}", index, apply(text)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn respond(text: String) -> Result<CompletionResponse, ProviderError> {
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        let completion = text.chars().count() as u64;
        Ok(CompletionResponse {
            text,
            prompt_tokens: Some(completion),
            completion_tokens: Some(completion),
        })
    }
}

/// Extract the two halves of a pair prompt
fn pair_items(prompt: &str) -> Option<(String, String)> {
    let mut top = None;
    let mut bottom = None;
    for line in prompt.lines() {
        if let Some(rest) = line.strip_prefix(PAIR_TOP_LABEL) {
            top = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix(PAIR_BOTTOM_LABEL) {
            bottom = Some(rest.trim().to_string());
        }
    }
    top.zip(bottom)
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        match &self.behavior {
            MockBehavior::Working => Self::respond(self.answer(&request.prompt, None, false)),
            MockBehavior::Echo => Self::respond(self.answer(&request.prompt, None, true)),
            MockBehavior::MissingLines { keep } => {
                Self::respond(self.answer(&request.prompt, Some(*keep), false))
            }
            MockBehavior::Intermittent { fail_every } => {
                if count % fail_every == fail_every - 1 {
                    Err(ProviderError::ApiError {
                        message: format!("Simulated intermittent failure (request #{})", count + 1),
                        status_code: 503,
                    })
                } else {
                    Self::respond(self.answer(&request.prompt, None, false))
                }
            }
            MockBehavior::Failing(error) => Err(error.clone()),
            MockBehavior::Empty => Err(ProviderError::EmptyResponse),
            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(tokio::time::Duration::from_millis(*delay_ms)).await;
                Self::respond(self.answer(&request.prompt, None, false))
            }
            MockBehavior::Truncating { min_tokens } => {
                if request.max_tokens < *min_tokens {
                    Err(ProviderError::Truncated("length".to_string()))
                } else {
                    Self::respond(self.answer(&request.prompt, None, false))
                }
            }
            MockBehavior::Scripted(queue) => {
                let next = queue.lock().pop_front();
                match next {
                    Some(Ok(text)) => Self::respond(text),
                    Some(Err(error)) => Err(error),
                    None => Self::respond(self.answer(&request.prompt, None, false)),
                }
            }
        }
    }
}
