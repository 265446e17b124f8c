//! Records of completed invocations.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub id: Uuid,
    pub operation: String,
    pub backend: String,
    pub tier: usize,
    pub attempts: u32,
    pub output_hash: String,
    pub latency_ms: u64,
    pub completed_at: chrono::DateTime<Utc>,
}

impl InvocationRecord {
    pub fn new(
        operation: &str,
        backend: &str,
        tier: usize,
        attempts: u32,
        output: &str,
        latency_ms: u64,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(output.as_bytes());
        let output_hash = format!("{:x}", hasher.finalize());

        Self {
            id: Uuid::new_v4(),
            operation: operation.to_string(),
            backend: backend.to_string(),
            tier,
            attempts,
            output_hash,
            latency_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn used_fallback(&self) -> bool {
        self.tier > 0
    }
}
