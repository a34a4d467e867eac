//! Delivery task
//!
//! Terminal success stage: persists the synthesized narrative and flips the
//! request record to COMPLETED. Writes are idempotent per fingerprint, so
//! an at-least-once execution of this stage is safe.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::store::RequestRepository;
use crate::workflow::{ExecutionContext, TaskError, TaskHandler};

use super::{require_str, FINGERPRINT_KEY, SYNTHESIS_OUTPUT_KEY};

pub struct DeliveryTask {
    requests: Arc<RequestRepository>,
}

impl DeliveryTask {
    pub fn new(requests: Arc<RequestRepository>) -> Self {
        Self { requests }
    }
}

#[async_trait]
impl TaskHandler for DeliveryTask {
    async fn run(&self, ctx: &ExecutionContext) -> Result<Value, TaskError> {
        let fingerprint = require_str(ctx, FINGERPRINT_KEY)?;

        let narrative = ctx
            .get(SYNTHESIS_OUTPUT_KEY)
            .and_then(|s| s.get("narrative"))
            .and_then(|n| n.as_str())
            .ok_or_else(|| TaskError::MissingInput(SYNTHESIS_OUTPUT_KEY.to_string()))?;

        self.requests
            .mark_completed(&fingerprint, narrative)
            .await
            .map_err(|e| TaskError::Backend(format!("completion write failed: {e}")))?;

        info!(fingerprint = %fingerprint, "itinerary delivered");

        Ok(json!({
            "status": "delivered",
            "fingerprint": fingerprint,
        }))
    }
}
