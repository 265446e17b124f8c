use thiserror::Error;

use crate::backend::LlmError;

/// No structured payload could be located in otherwise successful output.
#[derive(Debug, Error)]
#[error("No structured payload found in model output")]
pub struct ExtractionError {
    pub raw: String,
}

/// Errors surfaced to callers of the invocation layer.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{operation} failed on {backend} with a non-retryable error: {source}")]
    Fatal {
        operation: String,
        backend: String,
        #[source]
        source: LlmError,
    },

    #[error("{operation} failed after {total_attempts} attempts across the model chain")]
    Exhausted {
        operation: String,
        total_attempts: u32,
        #[source]
        last_error: Option<LlmError>,
    },

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

impl InvocationError {
    /// True when repeating the whole operation later could plausibly succeed.
    pub fn is_user_retryable(&self) -> bool {
        matches!(self, InvocationError::Exhausted { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationError::Configuration(_) => "CONFIGURATION",
            InvocationError::Fatal { .. }     => "FATAL",
            InvocationError::Exhausted { .. } => "EXHAUSTED",
            InvocationError::Extraction(_)    => "EXTRACTION",
        }
    }
}

pub type Result<T> = std::result::Result<T, InvocationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_exhausted_is_user_retryable() {
        let exhausted = InvocationError::Exhausted {
            operation: "analyze image".into(),
            total_attempts: 9,
            last_error: Some(LlmError::RateLimitExceeded),
        };
        let fatal = InvocationError::Fatal {
            operation: "analyze image".into(),
            backend: "gemini-2.5-pro".into(),
            source: LlmError::Api { status: 400, message: "invalid argument".into() },
        };
        assert!(exhausted.is_user_retryable());
        assert!(!fatal.is_user_retryable());
        assert!(!InvocationError::Configuration("empty chain".into()).is_user_retryable());
    }

    #[test]
    fn test_exhausted_message_and_source() {
        let err = InvocationError::Exhausted {
            operation: "generate specification".into(),
            total_attempts: 6,
            last_error: Some(LlmError::RateLimitExceeded),
        };
        assert!(err.to_string().contains("6 attempts"));
        let cause = std::error::Error::source(&err).map(|e| e.to_string());
        assert_eq!(cause.as_deref(), Some("Rate limit exceeded"));
    }

    #[test]
    fn test_kind_labels() {
        let extraction = InvocationError::from(ExtractionError { raw: "no braces".into() });
        assert_eq!(extraction.as_str(), "EXTRACTION");
        assert_eq!(InvocationError::Configuration("empty chain".into()).as_str(), "CONFIGURATION");
        let exhausted = InvocationError::Exhausted {
            operation: "analyze image".into(),
            total_attempts: 3,
            last_error: None,
        };
        assert_eq!(exhausted.as_str(), "EXHAUSTED");
    }
}
