/*!
 * Error types for the inkbridge library.
 *
 * This module contains custom error types for the different parts of the
 * pipeline, using the thiserror crate for ergonomic error definitions.
 */

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::Stage;

/// Errors that can occur when working with provider APIs
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// The call did not finish within the guard timeout
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// The provider answered with nothing usable
    #[error("Provider returned an empty response")]
    EmptyResponse,

    /// The completion stopped at the output token limit
    #[error("Response truncated by the token limit ({0})")]
    Truncated(String),
}

impl ProviderError {
    /// Whether the error looks transient (timeout, overload, empty answer).
    ///
    /// Transient errors walk the fallback chain; the rest skip the
    /// remaining slots of the same provider.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_)
            | Self::EmptyResponse
            | Self::Truncated(_)
            | Self::ConnectionError(_)
            | Self::RateLimitExceeded(_)
            | Self::RequestFailed(_)
            | Self::ParseError(_) => true,
            Self::ApiError { status_code, .. } => {
                matches!(status_code, 408 | 409 | 425 | 429 | 500..=599)
            }
            Self::AuthenticationError(_) => false,
        }
    }

    /// Map an HTTP status and body to the matching error variant
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status_code {
            401 | 403 => Self::AuthenticationError(message),
            429 => Self::RateLimitExceeded(message),
            _ => Self::ApiError { status_code, message },
        }
    }
}

/// Errors raised by OCR engines and the engine registry
#[derive(Error, Debug, Clone)]
pub enum OcrError {
    /// The engine could not be created or switched to a language
    #[error("OCR engine initialisation failed for '{language}': {message}")]
    Initialisation { language: String, message: String },

    /// Recognition of a single slice failed
    #[error("OCR recognition failed on slice {slice}: {message}")]
    Recognition { slice: usize, message: String },

    /// Sidecar or model input could not be read
    #[error("OCR input error: {0}")]
    Input(String),
}

/// Machine-readable failure code attached to a failed page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Detection finished with zero regions and fail-on-empty was set
    NoTextDetected,
    /// Any other stage failure
    StageFailed,
    /// The batch was cancelled before this page finished
    Cancelled,
}

impl ErrorCode {
    /// Stable string form used in reports and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoTextDetected => "no_text_detected",
            Self::StageFailed => "stage_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that abort a page inside the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No region survived detection and consolidation
    #[error("No text detected on page {0}")]
    NoTextDetected(String),

    /// A stage failed
    #[error("{stage} stage failed: {message}")]
    Stage { stage: Stage, message: String },

    /// Cooperative cancellation
    #[error("Page processing cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Create a stage failure from any displayable error
    pub fn stage(stage: Stage, error: impl std::fmt::Display) -> Self {
        Self::Stage {
            stage,
            message: error.to_string(),
        }
    }

    /// The machine-readable code for this failure
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NoTextDetected(_) => ErrorCode::NoTextDetected,
            Self::Stage { .. } => ErrorCode::StageFailed,
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from OCR
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// Error from the page pipeline
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Utility functions for error conversion
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
