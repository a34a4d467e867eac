//! Workflow Executor
//!
//! Interprets a declared [`Workflow`] against a mutable execution context.
//! Sequential nodes run one at a time; parallel branches run concurrently
//! on spawned tasks. The executor owns all context writes, the per-task
//! retry bound, catch routing, and the execution-level ceiling clock.
//!
//! The ceiling is enforced by the executor's own clock at node boundaries
//! and by racing in-flight node futures against the deadline; an external
//! call that is already running is never forcibly interrupted — on timeout
//! its spawned task keeps running detached and its output is discarded.

use futures::future::{join_all, BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::context::{ErrorDescriptor, ExecutionContext};
use super::{CancellationFlag, Node, ParallelNode, TaskHandler, TaskNode, TaskRegistry, Workflow};
use crate::config::WorkflowConfig;

/// State of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionState {
    NotStarted,
    Running(String),
    Succeeded,
    Failed { node: String, error: String },
}

/// Terminal result of one execution: final state plus the context as it
/// stood when the execution ended
#[derive(Debug)]
pub struct ExecutionReport {
    pub state: ExecutionState,
    pub context: ExecutionContext,
}

impl ExecutionReport {
    pub fn is_succeeded(&self) -> bool {
        self.state == ExecutionState::Succeeded
    }

    /// Failing node and cause, when the execution ended in Failed
    pub fn failure(&self) -> Option<(&str, &str)> {
        match &self.state {
            ExecutionState::Failed { node, error } => Some((node, error)),
            _ => None,
        }
    }
}

/// Generic workflow executor
pub struct Executor {
    registry: Arc<TaskRegistry>,
    max_task_attempts: u32,
    ceiling: Duration,
}

impl Executor {
    pub fn new(registry: Arc<TaskRegistry>, max_task_attempts: u32, ceiling: Duration) -> Self {
        Self {
            registry,
            max_task_attempts,
            ceiling,
        }
    }

    pub fn from_config(registry: Arc<TaskRegistry>, config: &WorkflowConfig) -> Self {
        Self::new(
            registry,
            config.max_task_attempts,
            Duration::from_secs(config.execution_ceiling_secs),
        )
    }

    /// Drive a workflow to a terminal state
    ///
    /// Returns the report with `Succeeded`, or `Failed` reached either via
    /// catch routing completing, via an undeclared-catch failure, via
    /// external cancellation, or via the execution ceiling elapsing.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        seed: ExecutionContext,
        cancel: CancellationFlag,
    ) -> ExecutionReport {
        let deadline = Instant::now() + self.ceiling;
        let mut ctx = seed;

        info!(workflow = %workflow.name, nodes = workflow.nodes.len(), "starting execution");

        for node in &workflow.nodes {
            if cancel.is_cancelled() {
                info!(workflow = %workflow.name, node = node.name(), "execution cancelled");
                return ExecutionReport {
                    state: ExecutionState::Failed {
                        node: node.name().to_string(),
                        error: "execution cancelled".to_string(),
                    },
                    context: ctx,
                };
            }
            if Instant::now() >= deadline {
                let descriptor = self.ceiling_descriptor(node.name());
                return self.route_catch(node.catch(), descriptor, ctx).await;
            }

            debug!(workflow = %workflow.name, node = node.name(), "running node");

            let outcome = match node {
                Node::Task(task) => self.run_sequence_task(task, &ctx, deadline).await,
                Node::Parallel(block) => {
                    self.run_parallel_block(block, &ctx, &cancel, deadline).await
                }
            };

            match outcome {
                Ok(value) => {
                    if let Err(e) = ctx.insert(node.output_key(), value) {
                        let descriptor = ErrorDescriptor::new(node.name(), e.to_string(), 0);
                        return self.route_catch(node.catch(), descriptor, ctx).await;
                    }
                }
                Err(descriptor) => {
                    warn!(
                        workflow = %workflow.name,
                        node = node.name(),
                        error = %descriptor.message,
                        "node failed"
                    );
                    return self.route_catch(node.catch(), descriptor, ctx).await;
                }
            }
        }

        info!(workflow = %workflow.name, "execution succeeded");
        ExecutionReport {
            state: ExecutionState::Succeeded,
            context: ctx,
        }
    }

    /// Run one sequence task: spawned so the deadline race never kills the
    /// in-flight call, retried up to the attempt bound.
    async fn run_sequence_task(
        &self,
        task: &TaskNode,
        ctx: &ExecutionContext,
        deadline: Instant,
    ) -> Result<Value, ErrorDescriptor> {
        let Some(handler) = self.registry.get(&task.name) else {
            return Err(unknown_handler(&task.name));
        };

        let name = task.name.clone();
        let handle = tokio::spawn(run_attempts(
            handler,
            ctx.clone(),
            name.clone(),
            self.max_task_attempts,
        ));

        tokio::select! {
            joined = handle => match joined {
                Ok(result) => result,
                Err(e) => Err(ErrorDescriptor::new(&name, format!("task panicked: {e}"), 0)),
            },
            _ = tokio::time::sleep_until(deadline) => Err(self.ceiling_descriptor(&name)),
        }
    }

    /// Run a parallel block, racing the whole block against the deadline.
    /// On timeout the spawned branches keep running detached.
    async fn run_parallel_block(
        &self,
        block: &ParallelNode,
        ctx: &ExecutionContext,
        cancel: &CancellationFlag,
        deadline: Instant,
    ) -> Result<Value, ErrorDescriptor> {
        let fut = run_parallel_branches(
            block.clone(),
            ctx.clone(),
            Arc::clone(&self.registry),
            cancel.clone(),
            self.max_task_attempts,
            deadline,
        );

        tokio::select! {
            result = fut => result,
            _ = tokio::time::sleep_until(deadline) => Err(self.ceiling_descriptor(&block.name)),
        }
    }

    /// Route a node failure into its declared error handler, if any.
    ///
    /// The handler receives the context with the descriptor attached under
    /// the reserved error key, runs exactly once, and its own failure is
    /// fatal. Whether or not the handler succeeds, the execution terminates
    /// Failed — catch routing is failure delivery, not failure recovery.
    async fn route_catch(
        &self,
        catch: Option<&str>,
        descriptor: ErrorDescriptor,
        mut ctx: ExecutionContext,
    ) -> ExecutionReport {
        let failed_state = ExecutionState::Failed {
            node: descriptor.node.clone(),
            error: descriptor.message.clone(),
        };

        let Some(handler_name) = catch else {
            return ExecutionReport {
                state: failed_state,
                context: ctx,
            };
        };

        ctx.attach_error(&descriptor);
        info!(handler = handler_name, node = %descriptor.node, "routing failure to error handler");

        let Some(handler) = self.registry.get(handler_name) else {
            return ExecutionReport {
                state: ExecutionState::Failed {
                    node: handler_name.to_string(),
                    error: format!("no handler registered for error handler '{handler_name}'"),
                },
                context: ctx,
            };
        };

        let snapshot = ctx.clone();
        match handler.run(&snapshot).await {
            Ok(value) => {
                if let Err(e) = ctx.insert(handler_name, value) {
                    debug!(error = %e, "error handler output not recorded");
                }
                ExecutionReport {
                    state: failed_state,
                    context: ctx,
                }
            }
            Err(e) => {
                error!(handler = handler_name, error = %e, "error handler itself failed");
                ExecutionReport {
                    state: ExecutionState::Failed {
                        node: handler_name.to_string(),
                        error: format!("error handler failed: {e}"),
                    },
                    context: ctx,
                }
            }
        }
    }

    fn ceiling_descriptor(&self, node: &str) -> ErrorDescriptor {
        ErrorDescriptor::new(
            node,
            format!(
                "execution ceiling of {}s elapsed before completion",
                self.ceiling.as_secs()
            ),
            0,
        )
    }
}

/// Invoke a handler up to the attempt bound against a context snapshot
async fn run_attempts(
    handler: Arc<dyn TaskHandler>,
    ctx: ExecutionContext,
    name: String,
    max_attempts: u32,
) -> Result<Value, ErrorDescriptor> {
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match handler.run(&ctx).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(task = %name, attempt, "task recovered on retry");
                }
                return Ok(value);
            }
            Err(e) => {
                warn!(task = %name, attempt, max_attempts, error = %e, "task attempt failed");
                last_error = e.to_string();
            }
        }
    }

    Err(ErrorDescriptor::new(&name, last_error, max_attempts))
}

/// Run every branch of a parallel block to completion and assemble the
/// ordered output array.
///
/// Branches are spawned concurrently; the first failure in completion
/// order is recorded as the block's error descriptor, but siblings are
/// never killed — the block reports failure only after every branch has
/// finished, so exactly one descriptor reaches catch routing.
async fn run_parallel_branches(
    block: ParallelNode,
    ctx: ExecutionContext,
    registry: Arc<TaskRegistry>,
    cancel: CancellationFlag,
    max_attempts: u32,
    deadline: Instant,
) -> Result<Value, ErrorDescriptor> {
    if block.branches.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }

    let first_failure: Arc<Mutex<Option<ErrorDescriptor>>> = Arc::default();
    let mut handles = Vec::with_capacity(block.branches.len());

    for (index, branch) in block.branches.into_iter().enumerate() {
        let fut = run_branch(
            branch,
            ctx.clone(),
            Arc::clone(&registry),
            cancel.clone(),
            max_attempts,
            deadline,
        );
        let first_failure = Arc::clone(&first_failure);
        let block_name = block.name.clone();

        handles.push(tokio::spawn(async move {
            let result = fut.await;
            if let Err(descriptor) = &result {
                warn!(
                    block = %block_name,
                    branch = index,
                    error = %descriptor.message,
                    "parallel branch failed"
                );
                let mut slot = first_failure.lock().unwrap_or_else(|e| e.into_inner());
                if slot.is_none() {
                    *slot = Some(descriptor.clone());
                }
            }
            result
        }));
    }

    // join_all preserves input order, so slot order matches declared
    // branch order regardless of completion order.
    let results = join_all(handles).await;

    let mut outputs = Vec::with_capacity(results.len());
    let mut panicked: Option<ErrorDescriptor> = None;
    for joined in results {
        match joined {
            Ok(Ok(value)) => outputs.push(value),
            Ok(Err(_)) => outputs.push(Value::Null),
            Err(e) => {
                outputs.push(Value::Null);
                if panicked.is_none() {
                    panicked = Some(ErrorDescriptor::new(
                        &block.name,
                        format!("branch task panicked: {e}"),
                        0,
                    ));
                }
            }
        }
    }

    let recorded = first_failure
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take();
    if let Some(descriptor) = recorded.or(panicked) {
        return Err(descriptor);
    }

    Ok(Value::Array(outputs))
}

/// Run one branch sub-graph against its own copy of the context.
///
/// Branch-local writes are scoped to the branch; only the final node's
/// output becomes the branch's slot in the aggregate. Cancellation and the
/// deadline are checked at node boundaries only. Boxed for recursion:
/// a branch may itself contain a nested parallel block.
fn run_branch(
    nodes: Vec<Node>,
    mut ctx: ExecutionContext,
    registry: Arc<TaskRegistry>,
    cancel: CancellationFlag,
    max_attempts: u32,
    deadline: Instant,
) -> BoxFuture<'static, Result<Value, ErrorDescriptor>> {
    async move {
        let mut last_output = Value::Null;

        for node in nodes {
            if cancel.is_cancelled() {
                return Err(ErrorDescriptor::new(node.name(), "execution cancelled", 0));
            }
            if Instant::now() >= deadline {
                return Err(ErrorDescriptor::new(
                    node.name(),
                    "execution ceiling elapsed before completion",
                    0,
                ));
            }

            let value = match &node {
                Node::Task(task) => {
                    let Some(handler) = registry.get(&task.name) else {
                        return Err(unknown_handler(&task.name));
                    };
                    run_attempts(handler, ctx.clone(), task.name.clone(), max_attempts).await?
                }
                Node::Parallel(inner) => {
                    run_parallel_branches(
                        inner.clone(),
                        ctx.clone(),
                        Arc::clone(&registry),
                        cancel.clone(),
                        max_attempts,
                        deadline,
                    )
                    .await?
                }
            };

            if let Err(e) = ctx.insert(node.output_key(), value.clone()) {
                return Err(ErrorDescriptor::new(node.name(), e.to_string(), 0));
            }
            last_output = value;
        }

        Ok(last_output)
    }
    .boxed()
}

fn unknown_handler(name: &str) -> ErrorDescriptor {
    ErrorDescriptor::new(name, format!("no handler registered for task '{name}'"), 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::TaskError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Always(Value);

    #[async_trait]
    impl TaskHandler for Always {
        async fn run(&self, _ctx: &ExecutionContext) -> Result<Value, TaskError> {
            Ok(self.0.clone())
        }
    }

    struct FailsFirst {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for FailsFirst {
        async fn run(&self, _ctx: &ExecutionContext) -> Result<Value, TaskError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TaskError::Backend("transient".to_string()))
            } else {
                Ok(json!("recovered"))
            }
        }
    }

    fn executor(registry: TaskRegistry) -> Executor {
        Executor::new(Arc::new(registry), 2, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_sequence_writes_outputs_in_order() {
        let mut registry = TaskRegistry::new();
        registry.register("a", Arc::new(Always(json!(1))));
        registry.register("b", Arc::new(Always(json!(2))));

        let workflow = Workflow::new(
            "seq",
            vec![
                Node::Task(TaskNode::new("a", "a_out")),
                Node::Task(TaskNode::new("b", "b_out")),
            ],
        );

        let report = executor(registry)
            .execute(&workflow, ExecutionContext::new(), CancellationFlag::new())
            .await;

        assert!(report.is_succeeded());
        assert_eq!(report.context.get("a_out"), Some(&json!(1)));
        assert_eq!(report.context.get("b_out"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_within_attempt_bound() {
        let mut registry = TaskRegistry::new();
        registry.register(
            "flaky",
            Arc::new(FailsFirst {
                calls: AtomicU32::new(0),
            }),
        );

        let workflow = Workflow::new("retry", vec![Node::Task(TaskNode::new("flaky", "out"))]);

        let report = executor(registry)
            .execute(&workflow, ExecutionContext::new(), CancellationFlag::new())
            .await;

        assert!(report.is_succeeded());
        assert_eq!(report.context.get("out"), Some(&json!("recovered")));
    }

    #[tokio::test]
    async fn test_unknown_task_fails_without_catch() {
        let registry = TaskRegistry::new();
        let workflow = Workflow::new("missing", vec![Node::Task(TaskNode::new("ghost", "out"))]);

        let report = executor(registry)
            .execute(&workflow, ExecutionContext::new(), CancellationFlag::new())
            .await;

        let (node, error) = report.failure().expect("failed");
        assert_eq!(node, "ghost");
        assert!(error.contains("no handler registered"));
    }

    #[tokio::test]
    async fn test_cancelled_execution_schedules_nothing() {
        let mut registry = TaskRegistry::new();
        registry.register("a", Arc::new(Always(json!(1))));

        let workflow = Workflow::new("cancel", vec![Node::Task(TaskNode::new("a", "a_out"))]);
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let report = executor(registry)
            .execute(&workflow, ExecutionContext::new(), cancel)
            .await;

        assert!(!report.is_succeeded());
        assert!(!report.context.contains("a_out"));
    }
}
