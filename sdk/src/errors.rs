//! Error types and handling
//!
//! The error taxonomy used throughout the engine. Variants correspond to
//! who is at fault and what the caller may do about it:
//!
//! - **ClientInput**: the submission itself is unusable; rejected
//!   synchronously, nothing persisted.
//! - **Backend**: a generation or research capability call failed; retried
//!   up to the fixed attempt bound, then routed to the error-handler task.
//! - **Store**: persistence failed; logged, never fatal — reads degrade to
//!   cache misses, writes are best effort.
//! - **FatalExecution**: the error-handler task itself failed; the
//!   execution terminates with no further recovery.
//!
//! Messages crossing the system boundary carry no raw stack data; terminal
//! failures are persisted as a truncated human-readable cause.

use thiserror::Error;

/// Main engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Empty or malformed submission; rejected before any work happens
    #[error("invalid input: {0}")]
    ClientInput(String),

    /// Generation backend or research capability failure
    #[error("backend error: {0}")]
    Backend(String),

    /// Persistence failure; callers degrade rather than abort
    #[error("store error: {0}")]
    Store(String),

    /// The error-handler task itself failed; no handler for the handler
    #[error("fatal execution error: {0}")]
    FatalExecution(String),

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the operation that produced this error may be retried
    ///
    /// Store errors are always recoverable (the caller degrades to a cache
    /// miss or a skipped write); backend errors are recoverable up to the
    /// workflow's attempt bound; client input and fatal execution errors
    /// require a different submission.
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::ClientInput(_) => false,
            EngineError::Backend(_) => true,
            EngineError::Store(_) => true,
            EngineError::FatalExecution(_) => false,
            EngineError::Config(_) => false,
        }
    }
}

/// Truncate a human-readable cause to the bounded length persisted on
/// failure. Multi-byte characters are never split.
pub fn truncate_cause(cause: &str, max_chars: usize) -> String {
    if cause.chars().count() <= max_chars {
        return cause.to_string();
    }
    cause.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability() {
        assert!(!EngineError::ClientInput("empty".into()).is_recoverable());
        assert!(EngineError::Backend("throttled".into()).is_recoverable());
        assert!(EngineError::Store("disk full".into()).is_recoverable());
        assert!(!EngineError::FatalExecution("handler died".into()).is_recoverable());
    }

    #[test]
    fn test_truncate_cause_bounds() {
        let long = "x".repeat(2000);
        assert_eq!(truncate_cause(&long, 1000).chars().count(), 1000);

        let short = "short cause";
        assert_eq!(truncate_cause(short, 1000), short);
    }

    #[test]
    fn test_truncate_cause_multibyte_safe() {
        let cause = "é".repeat(50);
        let truncated = truncate_cause(&cause, 10);
        assert_eq!(truncated.chars().count(), 10);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
