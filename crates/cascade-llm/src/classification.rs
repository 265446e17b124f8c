//! Failure classification for provider errors.
//!
//! Each `LlmError` is classified exactly once, at the adapter boundary, into
//! `Retryable` (transient, worth backing off and retrying) or `Fatal`
//! (backend-independent, propagated immediately). Structured signals such as
//! HTTP status codes win; the keyword table is the fallback for providers that
//! report failures as free text.

use crate::backend::LlmError;

/// Outcome of classifying a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Retryable => "RETRYABLE",
            ErrorClass::Fatal     => "FATAL",
        }
    }
}

/// Keywords (matched case-insensitively) marking a message as transient.
const RETRYABLE_KEYWORDS: &[&str] = &[
    "503",
    "overloaded",
    "429",
    "rate limit",
    "quota",
    "resource exhausted",
    "temporarily unavailable",
    "network",
    "timeout",
];

/// HTTP statuses that are transient regardless of the message body.
const RETRYABLE_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Classifies provider errors into retryable and fatal failures.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    keywords: Vec<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            keywords: RETRYABLE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl ErrorClassifier {
    pub fn classify(&self, error: &LlmError) -> ErrorClass {
        match error {
            LlmError::RateLimitExceeded | LlmError::Timeout(_) => ErrorClass::Retryable,
            LlmError::Api { status, .. } if RETRYABLE_STATUSES.contains(status) => {
                ErrorClass::Retryable
            }
            LlmError::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                ErrorClass::Retryable
            }
            other => self.classify_message(&other.to_string()),
        }
    }

    pub fn is_retryable(&self, error: &LlmError) -> bool {
        self.classify(error) == ErrorClass::Retryable
    }

    /// Keyword match against an unstructured failure message.
    pub fn classify_message(&self, message: &str) -> ErrorClass {
        let lower = message.to_lowercase();
        if self.keywords.iter().any(|k| lower.contains(k.as_str())) {
            ErrorClass::Retryable
        } else {
            ErrorClass::Fatal
        }
    }
}
