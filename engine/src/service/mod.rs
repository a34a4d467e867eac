//! Travel Service
//!
//! Entry-contract orchestration: `submit` accepts immediately and hands the
//! work to a background task; `fetch` polls terminal status by fingerprint.
//! The background task runs one broker round and, when the intent is ready,
//! seeds a workflow execution with it. Terminal status is written by the
//! delivery and error-handler stages; the service only backstops the cases
//! where the handler itself never completed.

use sdk::errors::EngineError;
use sdk::types::{RequestRecord, SubmitReceipt};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::{self, BrokerOutcome, RequestBroker};
use crate::config::Config;
use crate::llm::anthropic::AnthropicBackend;
use crate::llm::TextGenerator;
use crate::pipeline::{
    build_registry, travel_workflow, PipelineDeps, CORRELATION_KEY, FINGERPRINT_KEY, INTENT_KEY,
    TASK_ERROR_HANDLER,
};
use crate::store::{Database, RequestRepository};
use crate::workflow::{
    CancellationFlag, ExecutionContext, ExecutionReport, ExecutionState, Executor, Workflow,
};

/// Process-scoped service handle; all dependencies are injected at
/// construction, no ambient singletons.
pub struct TravelService {
    broker: Arc<RequestBroker>,
    executor: Arc<Executor>,
    requests: Arc<RequestRepository>,
    workflow: Workflow,
}

impl TravelService {
    pub fn new(
        broker: Arc<RequestBroker>,
        executor: Arc<Executor>,
        requests: Arc<RequestRepository>,
    ) -> Self {
        Self {
            broker,
            executor,
            requests,
            workflow: travel_workflow(),
        }
    }

    /// Assemble the full service from config: Anthropic backend, pipeline
    /// registry, executor, and broker over the given database.
    pub fn from_config(config: &Config, db: &Database) -> Self {
        let requests = Arc::new(db.requests());
        let backend: Arc<dyn TextGenerator> = Arc::new(AnthropicBackend::new(config.llm.clone()));

        let deps = PipelineDeps {
            http: reqwest::Client::new(),
            backend: Arc::clone(&backend),
            requests: Arc::clone(&requests),
            research: config.research.clone(),
            llm: config.llm.clone(),
        };
        let registry = Arc::new(build_registry(&deps));
        let executor = Arc::new(Executor::from_config(registry, &config.workflow));
        let broker = Arc::new(RequestBroker::new(
            backend,
            Arc::clone(&requests),
            config.llm.clone(),
            &config.store,
        ));

        Self::new(broker, executor, requests)
    }

    /// Accept a submission and start asynchronous processing.
    ///
    /// Rejects only empty input; everything else is accepted immediately
    /// with a receipt the caller can poll with.
    pub fn submit(&self, raw_text: &str) -> Result<SubmitReceipt, EngineError> {
        let input = raw_text.trim().to_string();
        if input.is_empty() {
            return Err(EngineError::ClientInput("no input provided".to_string()));
        }

        let fingerprint = broker::fingerprint(&input);
        let correlation_id = Uuid::new_v4().to_string();

        info!(
            correlation_id = %correlation_id,
            fingerprint = %fingerprint,
            input_length = input.len(),
            "request accepted"
        );

        let broker = Arc::clone(&self.broker);
        let executor = Arc::clone(&self.executor);
        let requests = Arc::clone(&self.requests);
        let workflow = self.workflow.clone();
        let spawned_correlation = correlation_id.clone();

        tokio::spawn(async move {
            process_request(
                broker,
                executor,
                requests,
                workflow,
                input,
                spawned_correlation,
            )
            .await;
        });

        Ok(SubmitReceipt {
            accepted: true,
            fingerprint,
            correlation_id,
        })
    }

    /// One broker round without starting the pipeline (extraction mode)
    pub async fn extract(&self, raw_text: &str) -> Result<BrokerOutcome, EngineError> {
        let correlation_id = Uuid::new_v4().to_string();
        self.broker.handle(raw_text, &correlation_id).await
    }

    /// Poll a request record by fingerprint
    pub async fn fetch(&self, fingerprint: &str) -> Result<Option<RequestRecord>, EngineError> {
        self.requests
            .get(fingerprint)
            .await
            .map_err(|e| EngineError::Store(e.to_string()))
    }

    /// Synchronous variant for the CLI: one broker round plus an inline
    /// execution when the intent is ready. Returns the broker outcome and
    /// the execution report, if one ran.
    pub async fn run_to_completion(
        &self,
        raw_text: &str,
    ) -> Result<(BrokerOutcome, Option<ExecutionReport>), EngineError> {
        let correlation_id = Uuid::new_v4().to_string();
        let outcome = self.broker.handle(raw_text, &correlation_id).await?;

        if !outcome.intent.is_ready() || outcome.cached {
            return Ok((outcome, None));
        }

        let ctx = match seed_context(&outcome) {
            Ok(ctx) => ctx,
            Err(e) => return Err(EngineError::FatalExecution(e)),
        };

        let report = self
            .executor
            .execute(&self.workflow, ctx, CancellationFlag::new())
            .await;

        backstop_failure(&self.requests, &report, &outcome.fingerprint).await;

        Ok((outcome, Some(report)))
    }

    /// Sweep expired records; advisory retention, best effort
    pub async fn gc(&self) -> Result<u64, EngineError> {
        self.requests
            .delete_expired()
            .await
            .map_err(|e| EngineError::Store(e.to_string()))
    }

}

/// Persist a terminal failure when the error handler never completed
/// (handler failure, unroutable failure). Best effort.
async fn backstop_failure(requests: &RequestRepository, report: &ExecutionReport, fingerprint: &str) {
    let ExecutionState::Failed { node, error } = &report.state else {
        return;
    };
    if report.context.contains(TASK_ERROR_HANDLER) {
        return;
    }
    warn!(
        fingerprint = %fingerprint,
        node = %node,
        "error handler did not complete, backstopping failure status"
    );
    if let Err(e) = requests
        .mark_failed(fingerprint, &format!("task {node}: {error}"))
        .await
    {
        error!(fingerprint = %fingerprint, error = %e, "failure backstop write failed");
    }
}

/// Seed the execution context with the extracted intent and identifiers
fn seed_context(outcome: &BrokerOutcome) -> Result<ExecutionContext, String> {
    let intent_fields =
        serde_json::to_value(&outcome.intent.extracted).map_err(|e| e.to_string())?;

    let mut ctx = ExecutionContext::seeded(INTENT_KEY, intent_fields);
    ctx.insert(FINGERPRINT_KEY, json!(outcome.fingerprint))
        .map_err(|e| e.to_string())?;
    ctx.insert(CORRELATION_KEY, json!(outcome.correlation_id))
        .map_err(|e| e.to_string())?;
    Ok(ctx)
}

/// Background processing for one accepted submission
async fn process_request(
    broker: Arc<RequestBroker>,
    executor: Arc<Executor>,
    requests: Arc<RequestRepository>,
    workflow: Workflow,
    input: String,
    correlation_id: String,
) {
    let outcome = match broker.handle(&input, &correlation_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(correlation_id = %correlation_id, error = %e, "broker round failed");
            return;
        }
    };

    if !outcome.intent.is_ready() {
        info!(
            correlation_id = %correlation_id,
            fingerprint = %outcome.fingerprint,
            "intent needs clarification, workflow not started"
        );
        return;
    }

    // A cache hit means this fingerprint was already processed (or is being
    // processed); re-running the pipeline would break idempotency.
    if outcome.cached {
        info!(
            correlation_id = %correlation_id,
            fingerprint = %outcome.fingerprint,
            "cached result returned, workflow not restarted"
        );
        return;
    }

    let ctx = match seed_context(&outcome) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(correlation_id = %correlation_id, error = %e, "context seeding failed");
            return;
        }
    };

    let report = executor
        .execute(&workflow, ctx, CancellationFlag::new())
        .await;

    match &report.state {
        ExecutionState::Succeeded => {
            info!(
                correlation_id = %correlation_id,
                fingerprint = %outcome.fingerprint,
                "itinerary pipeline completed"
            );
        }
        ExecutionState::Failed { node, error } => {
            warn!(
                correlation_id = %correlation_id,
                fingerprint = %outcome.fingerprint,
                node = %node,
                error = %error,
                "itinerary pipeline failed"
            );
            backstop_failure(&requests, &report, &outcome.fingerprint).await;
        }
        _ => {}
    }
}
