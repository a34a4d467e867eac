//! Workflow Engine
//!
//! A minimal orchestrator over a declared graph of named tasks. The graph
//! is data — a sequence of `Node`s, each either a single task or a parallel
//! fan-out block — interpreted by one generic [`Executor`]. The concrete
//! travel pipeline lives in `crate::pipeline` and is wired into the engine
//! as configuration, never hard-coded here.
//!
//! Failure semantics: every sequence node may declare a catch edge naming a
//! designated error-handler task. Task failures are retried up to a fixed
//! attempt bound, then routed to that handler with an [`ErrorDescriptor`]
//! attached to the context. Failures inside a parallel branch route to the
//! block's handler. A handler failure is fatal — there is no handler for
//! the handler.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod context;
pub mod executor;

pub use context::{ContextError, ErrorDescriptor, ExecutionContext, ERROR_KEY};
pub use executor::{ExecutionReport, ExecutionState, Executor};

/// Errors a task handler may produce
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// External capability call failed (retryable up to the attempt bound)
    #[error("backend call failed: {0}")]
    Backend(String),

    /// A required context key was never written by an upstream task
    #[error("missing context key: {0}")]
    MissingInput(String),

    /// Upstream output could not be interpreted
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// One external capability behind a named task node
///
/// Handlers read from the context and return their named output; they never
/// write the context themselves — the engine owns all writes.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: &ExecutionContext) -> Result<Value, TaskError>;
}

/// Registry mapping task names to handlers, injected at construction
#[derive(Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a task name. Last registration wins.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).map(Arc::clone)
    }
}

/// A single task node: one named capability invocation
#[derive(Debug, Clone)]
pub struct TaskNode {
    /// Registry name of the handler to invoke
    pub name: String,

    /// Context key the output is written under
    pub output_key: String,

    /// Designated error-handler task (honored on sequence nodes)
    pub catch: Option<String>,
}

impl TaskNode {
    pub fn new(name: impl Into<String>, output_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_key: output_key.into(),
            catch: None,
        }
    }

    pub fn with_catch(mut self, handler: impl Into<String>) -> Self {
        self.catch = Some(handler.into());
        self
    }
}

/// A parallel block: independent branches running concurrently
///
/// Each branch is itself a sub-graph (a sequence of nodes). The block
/// completes when every branch completes; its aggregate output is the
/// ordered array of branch outputs, slot order matching declared branch
/// order regardless of completion order. The first branch failure (in
/// completion order) fails the block; already-running siblings finish
/// rather than being killed.
#[derive(Debug, Clone)]
pub struct ParallelNode {
    pub name: String,

    /// Context key the ordered output array is written under
    pub output_key: String,

    /// Declared branches, each a sequence of nodes
    pub branches: Vec<Vec<Node>>,

    /// Designated error-handler task
    pub catch: Option<String>,
}

impl ParallelNode {
    pub fn new(
        name: impl Into<String>,
        output_key: impl Into<String>,
        branches: Vec<Vec<Node>>,
    ) -> Self {
        Self {
            name: name.into(),
            output_key: output_key.into(),
            branches,
            catch: None,
        }
    }

    pub fn with_catch(mut self, handler: impl Into<String>) -> Self {
        self.catch = Some(handler.into());
        self
    }
}

/// A node in the declared graph
#[derive(Debug, Clone)]
pub enum Node {
    Task(TaskNode),
    Parallel(ParallelNode),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Task(t) => &t.name,
            Node::Parallel(p) => &p.name,
        }
    }

    pub fn output_key(&self) -> &str {
        match self {
            Node::Task(t) => &t.output_key,
            Node::Parallel(p) => &p.output_key,
        }
    }

    pub fn catch(&self) -> Option<&str> {
        match self {
            Node::Task(t) => t.catch.as_deref(),
            Node::Parallel(p) => p.catch.as_deref(),
        }
    }
}

/// A declared workflow: a named sequence of nodes
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub nodes: Vec<Node>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            nodes,
        }
    }
}

/// External cancellation signal for an in-flight execution
///
/// Once set, no further nodes are scheduled; in-progress external calls are
/// never forcibly interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_accessors() {
        let task = Node::Task(TaskNode::new("flight_search", "flight_output").with_catch("handle_error"));
        assert_eq!(task.name(), "flight_search");
        assert_eq!(task.output_key(), "flight_output");
        assert_eq!(task.catch(), Some("handle_error"));

        let block = Node::Parallel(ParallelNode::new("research", "parallel_results", vec![]));
        assert_eq!(block.catch(), None);
    }

    #[test]
    fn test_cancellation_flag_is_shared() {
        let flag = CancellationFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
