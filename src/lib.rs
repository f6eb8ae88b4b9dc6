/*!
 * # inkbridge
 *
 * Orchestration core for translating sequential comic and manga pages.
 *
 * ## Features
 *
 * - Tiled OCR detection with merge and consolidation of overlapping boxes
 * - Batched translation through an ordered provider fallback chain:
 *   - Ollama (local LLM)
 *   - OpenAI API and OpenAI-compatible servers (LM Studio)
 *   - Anthropic API
 * - Cross-page continuity for text split across a page break
 * - Per-region quality scoring with a bounded retry pass
 * - JSON quality reports per page
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `page`: page context, regions and geometry
 * - `detection`: slicing, OCR registry, merge and consolidation
 * - `translation`: batching, fallback chain, validation and quality gate
 * - `continuity`: edge pairing, carryover store and its journal
 * - `pipeline`: stage orchestration, metrics and reports
 * - `providers`: LLM provider clients
 * - `app_config`: Configuration management
 * - `app_controller`: Directory runs for the command line
 * - `file_utils`: File system operations
 * - `language_utils`: ISO language codes and script classification
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod continuity;
pub mod detection;
pub mod errors;
pub mod file_utils;
pub mod language_utils;
pub mod page;
pub mod pipeline;
pub mod providers;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::Config;
pub use continuity::{CarryoverStore, ContinuityConfig, ContinuityEngine};
pub use detection::TiledDetector;
pub use errors::{AppError, ErrorCode, OcrError, PipelineError, ProviderError};
pub use language_utils::{get_language_name, language_codes_match, normalize_to_part2t};
pub use page::{BBox, LanguagePair, PageContext, PageStatus, Region};
pub use pipeline::{PageOutcome, PagePipeline, PageResult, PipelineConfig, Stage};
pub use translation::{BatchTranslator, FallbackChain, QualityGate};
