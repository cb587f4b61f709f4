/*!
 * Error types for linewise.
 *
 * Two layers, both built with thiserror:
 * - `ProviderError`: what the completion service or the wire can do wrong.
 * - `TranslationError`: the engine's own taxonomy, which decides whether a
 *   batch is retried at the same size, degraded, or the whole run aborts.
 *
 * `AppError` wraps everything for the binary.
 */

use thiserror::Error;

/// Errors that can occur when talking to the completion service
#[derive(Error, Debug)]
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

    /// The service refused the prompt because it does not fit the context window
    #[error("Context window exceeded: {0}")]
    ContextOverflow(String),

    /// The token stream broke off mid-response
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
}

const CONTEXT_OVERFLOW_HINTS: [&str; 5] = [
    "context length",
    "maximum context",
    "too many tokens",
    "max_tokens",
    "context window",
];

impl ProviderError {
    /// Classify a non-success HTTP status and its body.
    pub fn from_status(status_code: u16, body: &str) -> Self {
        let lowered = body.to_lowercase();
        match status_code {
            400 | 413 if CONTEXT_OVERFLOW_HINTS.iter().any(|hint| lowered.contains(hint)) => {
                Self::ContextOverflow(body.to_string())
            }
            401 | 403 => Self::AuthenticationError(body.to_string()),
            429 => Self::RateLimitExceeded(body.to_string()),
            _ => Self::ApiError {
                status_code,
                message: body.to_string(),
            },
        }
    }

    /// Whether the service asked for a smaller prompt rather than a retry.
    pub fn is_context_overflow(&self) -> bool {
        matches!(self, Self::ContextOverflow(_))
    }
}

/// The engine's error taxonomy.
///
/// Everything except `ServiceUnavailable` is handled by the batch
/// orchestrator and ends up, at worst, as a per-line failure marker.
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Network or HTTP failure worth retrying at the same batch size
    #[error("Transient service error: {0}")]
    TransientService(String),

    /// Prompt does not fit; the batch must shrink instead of being retried
    #[error("Context overflow: {0}")]
    ContextOverflow(String),

    /// No numbered or positional line could be recovered from the reply
    #[error("Could not align any of the {expected} expected lines")]
    AlignmentAmbiguity {
        /// Lines the batch asked for
        expected: usize,
    },

    /// The quality gate wants the batch translated again
    #[error("Quality gate rejected {} of {total} lines", .rejected.len())]
    QualityRejected {
        /// Batch-local positions judged BAD
        rejected: Vec<usize>,
        /// Batch size
        total: usize,
    },

    /// Line count of an accepted batch diverged from its source
    #[error("Line count mismatch: expected {expected}, got {actual}")]
    StructuralInvariantViolation {
        /// Source lines in the batch
        expected: usize,
        /// Output lines produced
        actual: usize,
    },

    /// The service cannot be reached or refuses our credentials
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Coarse kind of a `TranslationError`, used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationErrorKind {
    TransientService,
    ContextOverflow,
    AlignmentAmbiguity,
    QualityRejected,
    StructuralInvariantViolation,
    ServiceUnavailable,
}

impl TranslationError {
    pub fn kind(&self) -> TranslationErrorKind {
        match self {
            Self::TransientService(_) => TranslationErrorKind::TransientService,
            Self::ContextOverflow(_) => TranslationErrorKind::ContextOverflow,
            Self::AlignmentAmbiguity { .. } => TranslationErrorKind::AlignmentAmbiguity,
            Self::QualityRejected { .. } => TranslationErrorKind::QualityRejected,
            Self::StructuralInvariantViolation { .. } => {
                TranslationErrorKind::StructuralInvariantViolation
            }
            Self::ServiceUnavailable(_) => TranslationErrorKind::ServiceUnavailable,
        }
    }

    /// Aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_))
    }

    /// Worth another attempt at the same batch size. An unreachable service
    /// is retried too and only becomes fatal once the retry budget is spent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientService(_) | Self::ServiceUnavailable(_))
    }
}

impl From<ProviderError> for TranslationError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::ContextOverflow(message) => Self::ContextOverflow(message),
            ProviderError::ConnectionError(message) => Self::ServiceUnavailable(message),
            ProviderError::AuthenticationError(message) => {
                Self::ServiceUnavailable(format!("authentication failed: {}", message))
            }
            other => Self::TransientService(other.to_string()),
        }
    }
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from translation
    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AppError {
    /// Whether the run must stop instead of moving on to the next document
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Translation(e) => e.is_fatal(),
            Self::Provider(ProviderError::ConnectionError(_) | ProviderError::AuthenticationError(_)) => true,
            _ => false,
        }
    }
}

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
