//! cascade-llm — resilient multi-model invocation layer.
//!
//! Turns one logical "generate content" request into a delivered result
//! against an ordered chain of backends, with provider-wide rate limiting,
//! exponential backoff, failure classification and tier fallback.

pub mod audit;
pub mod backend;
pub mod backoff;
pub mod chain;
pub mod classification;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod rate_limit;

pub use backend::{BackendFactory, GenerateRequest, LlmBackend, LlmError, ProviderFactory, ProviderKind};
pub use backoff::{BackoffCalculator, BackoffConfig};
pub use chain::{BackendDescriptor, ChainStatus, ModelChain, ValidationReport};
pub use classification::{ErrorClass, ErrorClassifier};
pub use error::{ExtractionError, InvocationError};
pub use extract::{extract, extract_value};
pub use orchestrator::{Completion, InvocationOrchestrator, RetryPolicy};
pub use rate_limit::{RateLimitConfig, RateLimiter};
