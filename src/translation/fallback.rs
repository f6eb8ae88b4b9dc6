/*!
 * Ordered provider fallback chain.
 *
 * Slots are tried in order: alternate models of the configured provider
 * first, then other providers. Transient errors move to the next slot; a
 * permanent error skips every remaining slot of the same provider.
 */

use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::ProviderError;
use crate::providers::{CompletionRequest, Provider};

use super::limiter::RequestLimiter;

/// Result of one provider call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Transient { message: String },
    Permanent { message: String },
}

/// Per-call record kept for metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub model: String,
    /// Index of the slot in the fallback chain
    pub slot: usize,
    pub chars_sent: usize,
    pub chars_received: usize,
    pub outcome: AttemptOutcome,
    /// Served by a slot other than the first
    pub used_fallback: bool,
    pub elapsed_ms: u64,
}

impl ProviderAttempt {
    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// A successful completion and the attempts it took
#[derive(Debug, Clone)]
pub struct ChainCompletion {
    pub text: String,
    pub slot: usize,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub attempts: Vec<ProviderAttempt>,
}

/// Every remaining slot failed
#[derive(Debug, Clone, Error)]
#[error("fallback chain exhausted after {} attempts: {error}", .attempts.len())]
pub struct ChainError {
    pub error: ProviderError,
    pub attempts: Vec<ProviderAttempt>,
}

/// Ordered list of providers behind one completion call
#[derive(Debug)]
pub struct FallbackChain {
    slots: Vec<Arc<dyn Provider>>,
    /// Per-call guard, applied only when a later slot exists
    call_timeout_secs: u64,
    limiter: Option<Arc<RequestLimiter>>,
}

impl FallbackChain {
    pub fn new(slots: Vec<Arc<dyn Provider>>) -> Self {
        Self {
            slots,
            call_timeout_secs: 60,
            limiter: None,
        }
    }

    pub fn with_call_timeout(mut self, secs: u64) -> Self {
        self.call_timeout_secs = secs;
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<RequestLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&Arc<dyn Provider>> {
        self.slots.get(index)
    }

    /// `provider/model` labels in slot order
    pub fn describe(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|p| format!("{}/{}", p.name(), p.model()))
            .collect()
    }

    /// Complete a request starting from the first slot
    pub async fn complete(&self, request: CompletionRequest) -> Result<ChainCompletion, ChainError> {
        self.complete_from(0, request).await
    }

    /// Complete a request starting from `start`
    pub async fn complete_from(
        &self,
        start: usize,
        request: CompletionRequest,
    ) -> Result<ChainCompletion, ChainError> {
        let mut attempts = Vec::new();
        let mut last_error: Option<ProviderError> = None;
        let mut skipped_provider: Option<String> = None;

        for index in start..self.slots.len() {
            let provider = &self.slots[index];
            if skipped_provider.as_deref() == Some(provider.name()) {
                debug!("Skipping slot {} ({}) after permanent error", index, provider.name());
                continue;
            }

            let (result, attempt) = self.call_slot(index, provider, request.clone()).await;
            attempts.push(attempt);

            match result {
                Ok(response) => {
                    return Ok(ChainCompletion {
                        text: response.text,
                        slot: index,
                        prompt_tokens: response.prompt_tokens,
                        completion_tokens: response.completion_tokens,
                        attempts,
                    });
                }
                Err(error) if error.is_transient() => {
                    warn!(
                        "{}/{} failed with transient error, trying next slot: {}",
                        provider.name(),
                        provider.model(),
                        error
                    );
                    last_error = Some(error);
                }
                Err(error) => {
                    warn!(
                        "{}/{} failed permanently, skipping its remaining slots: {}",
                        provider.name(),
                        provider.model(),
                        error
                    );
                    skipped_provider = Some(provider.name().to_string());
                    last_error = Some(error);
                }
            }
        }

        Err(ChainError {
            error: last_error.unwrap_or_else(|| {
                ProviderError::RequestFailed(format!("no provider slot available from index {}", start))
            }),
            attempts,
        })
    }

    async fn call_slot(
        &self,
        index: usize,
        provider: &Arc<dyn Provider>,
        request: CompletionRequest,
    ) -> (Result<crate::providers::CompletionResponse, ProviderError>, ProviderAttempt) {
        let chars_sent = request.char_count();
        let has_next = index + 1 < self.slots.len();

        let _permit = match &self.limiter {
            Some(limiter) => match limiter.acquire().await {
                Ok(permit) => Some(permit),
                Err(e) => {
                    let error = ProviderError::RequestFailed(format!("request limiter closed: {}", e));
                    let attempt = self.attempt(index, provider, chars_sent, 0, &Err::<(), _>(error.clone()), 0);
                    return (Err(error), attempt);
                }
            },
            None => None,
        };

        let started = Instant::now();
        let result = if has_next && self.call_timeout_secs > 0 {
            let guard = tokio::time::Duration::from_secs(self.call_timeout_secs);
            match tokio::time::timeout(guard, provider.complete(request)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.call_timeout_secs)),
            }
        } else {
            provider.complete(request).await
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let chars_received = result
            .as_ref()
            .map(|r| r.text.chars().count())
            .unwrap_or(0);
        debug!(
            "Slot {} {}/{}: sent {} chars, received {} chars in {}ms",
            index,
            provider.name(),
            provider.model(),
            chars_sent,
            chars_received,
            elapsed_ms
        );
        let attempt = self.attempt(index, provider, chars_sent, chars_received, &result, elapsed_ms);
        (result, attempt)
    }

    fn attempt<T>(
        &self,
        index: usize,
        provider: &Arc<dyn Provider>,
        chars_sent: usize,
        chars_received: usize,
        result: &Result<T, ProviderError>,
        elapsed_ms: u64,
    ) -> ProviderAttempt {
        let outcome = match result {
            Ok(_) => AttemptOutcome::Success,
            Err(e) if e.is_transient() => AttemptOutcome::Transient { message: e.to_string() },
            Err(e) => AttemptOutcome::Permanent { message: e.to_string() },
        };
        ProviderAttempt {
            provider: provider.name().to_string(),
            model: provider.model().to_string(),
            slot: index,
            chars_sent,
            chars_received,
            outcome,
            used_fallback: index > 0,
            elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;

    fn arc(provider: MockProvider) -> Arc<dyn Provider> {
        Arc::new(provider)
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new("1. hola")
    }

    #[tokio::test]
    async fn test_complete_transientError_shouldWalkToNextSlot() {
        let first = MockProvider::failing(ProviderError::RateLimitExceeded("busy".into())).named("openai", "gpt-a");
        let second = MockProvider::working().named("openai", "gpt-b");
        let chain = FallbackChain::new(vec![arc(first.clone()), arc(second.clone())]);

        let completion = chain.complete(request()).await.unwrap();
        assert_eq!(completion.slot, 1);
        assert_eq!(completion.attempts.len(), 2);
        assert!(completion.attempts[1].used_fallback);
        assert!(completion.attempts[1].succeeded());
        assert_eq!(first.request_count(), 1);
    }

    #[tokio::test]
    async fn test_complete_permanentError_shouldSkipSameProvider() {
        let first = MockProvider::failing(ProviderError::AuthenticationError("bad key".into())).named("openai", "gpt-a");
        let second = MockProvider::working().named("openai", "gpt-b");
        let third = MockProvider::working().named("ollama", "qwen");
        let chain = FallbackChain::new(vec![arc(first), arc(second.clone()), arc(third.clone())]);

        let completion = chain.complete(request()).await.unwrap();
        assert_eq!(completion.slot, 2);
        assert_eq!(second.request_count(), 0);
        assert_eq!(third.request_count(), 1);
    }

    #[tokio::test]
    async fn test_complete_allFail_shouldReturnLastError() {
        let chain = FallbackChain::new(vec![
            arc(MockProvider::empty().named("a", "m1")),
            arc(MockProvider::failing(ProviderError::Timeout(5)).named("b", "m2")),
        ]);
        let error = chain.complete(request()).await.unwrap_err();
        assert!(matches!(error.error, ProviderError::Timeout(5)));
        assert_eq!(error.attempts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_timeout_shouldOnlyGuardWhenFallbackExists() {
        let slow = MockProvider::slow(5_000).named("ollama", "big");
        let chain = FallbackChain::new(vec![arc(slow.clone()), arc(MockProvider::working().named("ollama", "small"))])
            .with_call_timeout(1);
        let completion = chain.complete(request()).await.unwrap();
        assert_eq!(completion.slot, 1);

        let alone = FallbackChain::new(vec![arc(slow)]).with_call_timeout(1);
        let completion = alone.complete(request()).await.unwrap();
        assert_eq!(completion.slot, 0);
    }

    #[tokio::test]
    async fn test_complete_closedLimiter_shouldFailEverySlotWithoutCalling() {
        let provider = MockProvider::working().named("openai", "gpt-a");
        let limiter = Arc::new(RequestLimiter::new(2, None));
        limiter.close();
        let chain = FallbackChain::new(vec![arc(provider.clone())]).with_limiter(limiter);

        let error = chain.complete(request()).await.unwrap_err();
        assert!(error.error.to_string().contains("request limiter closed"));
        assert_eq!(error.attempts.len(), 1);
        assert!(!error.attempts[0].succeeded());
        assert_eq!(provider.request_count(), 0);
    }

    #[tokio::test]
    async fn test_completeFrom_pastEnd_shouldFail() {
        let chain = FallbackChain::new(vec![arc(MockProvider::working())]);
        let error = chain.complete_from(1, request()).await.unwrap_err();
        assert!(error.attempts.is_empty());
    }
}
