//! Ordered fallback chain of backends with a shared "current" cursor.
//!
//! Tier 0 is the primary backend; any higher tier means the session is
//! running degraded. The cursor only moves through `advance`, `advance_from`
//! and `reset`, all of which are single atomic operations.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use secrecy::SecretString;
use tracing::{info, instrument, warn};

use crate::backend::{BackendFactory, GenerateRequest, LlmBackend};
use crate::error::{InvocationError, Result};
use crate::rate_limit::RateLimiter;

const PROBE_PROMPT: &str = "Reply with the single word OK.";

/// One constructed backend in the chain.
#[derive(Clone)]
pub struct BackendDescriptor {
    pub identifier: String,
    pub tier: usize,
    pub handle: Arc<dyn LlmBackend>,
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("identifier", &self.identifier)
            .field("tier", &self.tier)
            .finish_non_exhaustive()
    }
}

/// Snapshot of where the chain currently points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStatus {
    pub identifier: String,
    pub tier: usize,
    pub len: usize,
}

impl ChainStatus {
    pub fn is_degraded(&self) -> bool {
        self.tier > 0
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.is_degraded() { "fallback" } else { "primary" };
        write!(f, "{} tier {} of {} ({})", mode, self.tier + 1, self.len, self.identifier)
    }
}

/// Result of probing one backend during startup validation.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub identifier: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub selected_tier: usize,
    pub outcomes: Vec<ProbeOutcome>,
}

pub struct ModelChain {
    backends: Vec<BackendDescriptor>,
    cursor: AtomicUsize,
}

impl fmt::Debug for ModelChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelChain")
            .field("backends", &self.identifiers())
            .field("cursor", &self.cursor.load(Ordering::SeqCst))
            .finish()
    }
}

impl ModelChain {
    /// Build one handle per identifier, in order. Purely local wiring.
    pub fn initialize<S: AsRef<str>>(
        identifiers: &[S],
        credential: &SecretString,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        let backends = identifiers
            .iter()
            .enumerate()
            .map(|(tier, id)| BackendDescriptor {
                identifier: id.as_ref().to_string(),
                tier,
                handle: factory.build(id.as_ref(), credential),
            })
            .collect();
        Self::from_backends(backends)
    }

    /// Build a chain from already-constructed handles; tiers follow vector order.
    pub fn from_backends(mut backends: Vec<BackendDescriptor>) -> Result<Self> {
        if backends.is_empty() {
            return Err(InvocationError::Configuration(
                "model chain must contain at least one backend".to_string(),
            ));
        }
        for (tier, b) in backends.iter_mut().enumerate() {
            b.tier = tier;
        }
        info!(chain = ?backends.iter().map(|b| b.identifier.as_str()).collect::<Vec<_>>(),
            "model chain initialized");
        Ok(Self { backends, cursor: AtomicUsize::new(0) })
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.identifier.as_str()).collect()
    }

    pub fn current(&self) -> BackendDescriptor {
        self.backends[self.cursor.load(Ordering::SeqCst)].clone()
    }

    pub fn current_tier(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn is_degraded(&self) -> bool {
        self.current_tier() > 0
    }

    pub fn status(&self) -> ChainStatus {
        let current = self.current();
        ChainStatus { identifier: current.identifier, tier: current.tier, len: self.len() }
    }

    /// Move to the next tier. Returns `None` and leaves the cursor untouched
    /// when already on the last backend.
    pub fn advance(&self) -> Option<BackendDescriptor> {
        let len = self.len();
        self.cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| (i + 1 < len).then_some(i + 1))
            .ok()
            .map(|prev| self.backends[prev + 1].clone())
    }

    /// Advance past `from`, the tier the caller just exhausted.
    ///
    /// If another caller already moved the cursor away from `from`, the cursor
    /// is left alone and its current backend is returned, so two callers
    /// exhausting the same tier never skip the one after it.
    pub fn advance_from(&self, from: &BackendDescriptor) -> Option<BackendDescriptor> {
        let next = from.tier + 1;
        if next >= self.len() {
            return None;
        }
        match self.cursor.compare_exchange(from.tier, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => {
                let b = self.backends[next].clone();
                warn!(from = %from.identifier, to = %b.identifier, tier = next, "falling back to next backend");
                Some(b)
            }
            Err(actual) => Some(self.backends[actual].clone()),
        }
    }

    /// Return to the primary backend.
    pub fn reset(&self) {
        let prev = self.cursor.swap(0, Ordering::SeqCst);
        if prev != 0 {
            info!(from_tier = prev, "model chain reset to primary");
        }
    }

    /// Probe each backend in order, under the shared limiter, and park the
    /// cursor on the first one that answers.
    #[instrument(skip(self, limiter))]
    pub async fn validate(&self, limiter: &RateLimiter) -> Result<ValidationReport> {
        let mut outcomes = Vec::with_capacity(self.len());
        for backend in &self.backends {
            limiter.acquire().await;
            let mut probe = GenerateRequest::new(PROBE_PROMPT);
            probe.max_tokens = Some(8);
            match backend.handle.generate(probe).await {
                Ok(_) => {
                    outcomes.push(ProbeOutcome { identifier: backend.identifier.clone(), error: None });
                    self.cursor.store(backend.tier, Ordering::SeqCst);
                    info!(backend = %backend.identifier, tier = backend.tier, "backend validated");
                    return Ok(ValidationReport { selected_tier: backend.tier, outcomes });
                }
                Err(e) => {
                    warn!(backend = %backend.identifier, error = %e, "backend failed validation probe");
                    outcomes.push(ProbeOutcome {
                        identifier: backend.identifier.clone(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        self.reset();
        let detail = outcomes
            .iter()
            .map(|o| format!("{}: {}", o.identifier, o.error.as_deref().unwrap_or("ok")))
            .collect::<Vec<_>>()
            .join("; ");
        Err(InvocationError::Configuration(format!("no backend passed validation ({detail})")))
    }
}
