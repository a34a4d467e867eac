//! Error-handler task
//!
//! The catch target for every pipeline stage. Receives the original
//! context plus the attached error descriptor, and persists the terminal
//! FAILED status with a bounded human-readable cause. If this task itself
//! fails, the engine terminates the execution fatally — there is no
//! handler for the handler.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::store::RequestRepository;
use crate::workflow::{ExecutionContext, TaskError, TaskHandler, ERROR_KEY};

use super::{require_str, FINGERPRINT_KEY};

pub struct ErrorHandlerTask {
    requests: Arc<RequestRepository>,
}

impl ErrorHandlerTask {
    pub fn new(requests: Arc<RequestRepository>) -> Self {
        Self { requests }
    }
}

#[async_trait]
impl TaskHandler for ErrorHandlerTask {
    async fn run(&self, ctx: &ExecutionContext) -> Result<Value, TaskError> {
        let descriptor = ctx
            .error()
            .ok_or_else(|| TaskError::MissingInput(ERROR_KEY.to_string()))?;
        let fingerprint = require_str(ctx, FINGERPRINT_KEY)?;

        let cause = if descriptor.attempts > 0 {
            format!(
                "task {} failed after {} attempts: {}",
                descriptor.node, descriptor.attempts, descriptor.message
            )
        } else {
            format!("task {}: {}", descriptor.node, descriptor.message)
        };

        warn!(
            fingerprint = %fingerprint,
            node = %descriptor.node,
            cause = %descriptor.message,
            "recording failed execution"
        );

        self.requests
            .mark_failed(&fingerprint, &cause)
            .await
            .map_err(|e| TaskError::Backend(format!("failure write failed: {e}")))?;

        Ok(json!({
            "status": "failed",
            "handled_node": descriptor.node,
            "fingerprint": fingerprint,
        }))
    }
}
