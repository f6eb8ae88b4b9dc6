/*!
 * Translation batching engine.
 *
 * Groups page regions into provider requests and turns the answers back
 * into per-region translations. It is split into several submodules:
 *
 * - `prompts`: numbered and pair prompt layouts
 * - `parser`: numbered line, JSON array and pair response parsing
 * - `validation`: rejection of empty, echoed or wrong-script output
 * - `fallback`: ordered provider/model fallback chain
 * - `limiter`: global request concurrency and rate limit
 * - `batch`: chunking, strict retry, re-splitting and region translation
 * - `quality`: per-region scoring and the retry gate
 * - `cache`: per-run memoisation of successful translations
 */

pub use self::batch::{plan_chunks, BatchTranslator, BatchingConfig, PairTranslation, TranslationStats};
pub use self::cache::TranslationCache;
pub use self::fallback::{AttemptOutcome, ChainCompletion, ChainError, FallbackChain, ProviderAttempt};
pub use self::limiter::RequestLimiter;
pub use self::parser::{parse_json_items, parse_numbered, parse_pair, parse_response, NumberedResponse};
pub use self::prompts::{PromptBuilder, ResponseFormat, DEFAULT_SYSTEM_PROMPT};
pub use self::quality::{follow_up, score_region, FollowUpAction, GateOutcome, QualityConfig, QualityGate};
pub use self::validation::{validate_translation, Rejection, ValidationRules};

pub mod batch;
pub mod cache;
pub mod fallback;
pub mod limiter;
pub mod parser;
pub mod prompts;
pub mod quality;
pub mod validation;
