//! Invocation orchestrator: runs one logical operation against the model
//! chain with rate limiting, backoff, retries and tier fallback.
//!
//! Per backend the operation gets `max_retries` attempts. Every retryable
//! failure backs off, including the last one on a backend; once that budget is
//! spent the chain advances (after a fixed cool-down) and the next tier gets a
//! fresh budget.
//! A fatal failure aborts immediately without falling back. When every tier
//! is spent the chain is reset to primary and `Exhausted` is returned.
//!
//! A success on a fallback tier leaves the cursor there; the next operation
//! starts on the same tier.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::audit::InvocationRecord;
use crate::backend::{GenerateRequest, LlmError};
use crate::backoff::BackoffCalculator;
use crate::chain::{BackendDescriptor, ModelChain};
use crate::classification::{ErrorClass, ErrorClassifier};
use crate::error::{InvocationError, Result};
use crate::extract::extract;
use crate::rate_limit::RateLimiter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per backend before falling back.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_inter_model_cooldown_ms")]
    pub inter_model_cooldown_ms: u64,
    /// Deadline for a single operation call; 0 disables it.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_max_retries()             -> u32 { 3 }
fn default_inter_model_cooldown_ms() -> u64 { 2_000 }
fn default_call_timeout_secs()       -> u64 { 120 }

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            inter_model_cooldown_ms: default_inter_model_cooldown_ms(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl RetryPolicy {
    pub fn inter_model_cooldown(&self) -> Duration {
        Duration::from_millis(self.inter_model_cooldown_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }
}

/// Raw output of a successful invocation plus its record.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub record: InvocationRecord,
}

pub struct InvocationOrchestrator {
    chain: Arc<ModelChain>,
    limiter: Arc<RateLimiter>,
    backoff: BackoffCalculator,
    classifier: ErrorClassifier,
    policy: RetryPolicy,
}

impl InvocationOrchestrator {
    pub fn new(chain: Arc<ModelChain>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            chain,
            limiter,
            backoff: BackoffCalculator::default(),
            classifier: ErrorClassifier::default(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffCalculator) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn chain(&self) -> &Arc<ModelChain> {
        &self.chain
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` against the chain and return its raw text.
    pub async fn execute<F, Fut>(&self, operation_name: &str, op: F) -> Result<String>
    where
        F: FnMut(BackendDescriptor) -> Fut,
        Fut: Future<Output = std::result::Result<String, LlmError>>,
    {
        self.execute_recorded(operation_name, op).await.map(|c| c.text)
    }

    /// Like [`execute`](Self::execute), also returning the invocation record.
    #[instrument(skip(self, op))]
    pub async fn execute_recorded<F, Fut>(&self, operation_name: &str, mut op: F) -> Result<Completion>
    where
        F: FnMut(BackendDescriptor) -> Fut,
        Fut: Future<Output = std::result::Result<String, LlmError>>,
    {
        let started = Instant::now();
        let max_retries = self.policy.max_retries.max(1);
        let mut attempts: u32 = 0;
        let mut last_error: Option<LlmError> = None;
        let mut backend = self.chain.current();

        for _ in 0..self.chain.len() {
            for retry in 0..max_retries {
                self.limiter.acquire().await;
                attempts += 1;
                debug!(backend = %backend.identifier, tier = backend.tier, attempt = retry + 1, "invoking backend");

                let err = match self.call(&mut op, backend.clone()).await {
                    Ok(text) => {
                        let record = InvocationRecord::new(
                            operation_name,
                            &backend.identifier,
                            backend.tier,
                            attempts,
                            &text,
                            started.elapsed().as_millis() as u64,
                        );
                        if attempts > 1 || record.used_fallback() {
                            info!(backend = %backend.identifier, tier = backend.tier, attempts,
                                latency_ms = record.latency_ms, "operation recovered");
                        } else {
                            debug!(backend = %backend.identifier, latency_ms = record.latency_ms, "operation succeeded");
                        }
                        return Ok(Completion { text, record });
                    }
                    Err(e) => e,
                };

                let class = self.classifier.classify(&err);
                if class == ErrorClass::Fatal {
                    error!(backend = %backend.identifier, class = class.as_str(), error = %err,
                        "non-retryable failure");
                    return Err(InvocationError::Fatal {
                        operation: operation_name.to_string(),
                        backend: backend.identifier.clone(),
                        source: err,
                    });
                }

                let delay = self.backoff.delay(retry);
                warn!(backend = %backend.identifier, attempt = retry + 1, class = class.as_str(),
                    error = %err, delay_ms = delay.as_millis() as u64, "retryable failure, backing off");
                last_error = Some(err);
                sleep(delay).await;
            }

            match self.chain.advance_from(&backend) {
                Some(next) => {
                    backend = next;
                    sleep(self.policy.inter_model_cooldown()).await;
                }
                None => break,
            }
        }

        self.chain.reset();
        let err = InvocationError::Exhausted {
            operation: operation_name.to_string(),
            total_attempts: attempts,
            last_error,
        };
        error!(attempts, kind = err.as_str(), "model chain exhausted");
        Err(err)
    }

    /// Run `op` and parse the structured payload embedded in its output.
    pub async fn execute_json<T, F, Fut>(&self, operation_name: &str, op: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut(BackendDescriptor) -> Fut,
        Fut: Future<Output = std::result::Result<String, LlmError>>,
    {
        let raw = self.execute(operation_name, op).await?;
        Ok(extract(&raw)?)
    }

    /// Send `req` to whichever backend the chain provides.
    pub async fn generate(&self, operation_name: &str, req: GenerateRequest) -> Result<String> {
        self.execute(operation_name, |b: BackendDescriptor| {
            let req = req.clone();
            async move { b.handle.generate(req).await }
        })
        .await
    }

    pub async fn generate_json<T: DeserializeOwned>(
        &self,
        operation_name: &str,
        req: GenerateRequest,
    ) -> Result<T> {
        let raw = self.generate(operation_name, req).await?;
        Ok(extract(&raw)?)
    }

    async fn call<F, Fut>(&self, op: &mut F, backend: BackendDescriptor) -> std::result::Result<String, LlmError>
    where
        F: FnMut(BackendDescriptor) -> Fut,
        Fut: Future<Output = std::result::Result<String, LlmError>>,
    {
        let fut = op(backend);
        match self.policy.call_timeout() {
            Some(limit) => timeout(limit, fut)
                .await
                .unwrap_or_else(|_| Err(LlmError::Timeout(limit))),
            None => fut.await,
        }
    }
}
