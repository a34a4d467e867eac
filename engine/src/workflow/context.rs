//! Execution context
//!
//! The append-only output bag for one execution. Each completed task writes
//! its named output exactly once; overwriting another task's key is an
//! engine error, not a silent merge. The reserved `error` key carries the
//! descriptor attached by catch routing and is the only key the engine
//! itself may replace.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Reserved key under which catch routing attaches the error descriptor
pub const ERROR_KEY: &str = "error";

/// Errors from context writes
#[derive(Debug, Error, PartialEq)]
pub enum ContextError {
    #[error("context key already written: {0}")]
    KeyConflict(String),

    #[error("context key is reserved: {0}")]
    ReservedKey(String),
}

/// Failure details handed to the designated error-handler task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDescriptor {
    /// Name of the node that failed
    pub node: String,

    /// Human-readable cause, bounded length
    pub message: String,

    /// Attempts consumed before the failure became final
    pub attempts: u32,
}

impl ErrorDescriptor {
    pub fn new(node: impl Into<String>, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            node: node.into(),
            message: sdk::errors::truncate_cause(&message.into(), 1000),
            attempts,
        }
    }
}

/// Mutable, append-only key/value bag owned by one in-flight execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    values: BTreeMap<String, Value>,
}

impl ExecutionContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context pre-seeded with one value (typically the intent)
    pub fn seeded(key: impl Into<String>, value: Value) -> Self {
        let mut values = BTreeMap::new();
        values.insert(key.into(), value);
        Self { values }
    }

    /// Write a task output. Fails if the key was already written or is
    /// reserved for the engine.
    pub fn insert(&mut self, key: &str, value: Value) -> Result<(), ContextError> {
        if key == ERROR_KEY {
            return Err(ContextError::ReservedKey(key.to_string()));
        }
        if self.values.contains_key(key) {
            return Err(ContextError::KeyConflict(key.to_string()));
        }
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    /// Attach (or replace) the error descriptor under the reserved key.
    /// Engine use only; called at most once per execution in practice
    /// because a handler failure is fatal.
    pub fn attach_error(&mut self, descriptor: &ErrorDescriptor) {
        if let Ok(value) = serde_json::to_value(descriptor) {
            self.values.insert(ERROR_KEY.to_string(), value);
        }
    }

    /// Read a value by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Read and deserialize a value by key
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// The attached error descriptor, if catch routing has fired
    pub fn error(&self) -> Option<ErrorDescriptor> {
        self.get_as(ERROR_KEY)
    }

    /// Whether a key has been written
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// All values, for snapshotting into logs or test assertions
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_read() {
        let mut ctx = ExecutionContext::seeded("intent", json!({"destination": "Tokyo"}));
        ctx.insert("flight", json!({"offers": []})).unwrap();

        assert!(ctx.contains("intent"));
        assert_eq!(ctx.get("flight"), Some(&json!({"offers": []})));
    }

    #[test]
    fn test_overwrite_rejected() {
        let mut ctx = ExecutionContext::new();
        ctx.insert("flight", json!(1)).unwrap();

        let err = ctx.insert("flight", json!(2)).unwrap_err();
        assert_eq!(err, ContextError::KeyConflict("flight".to_string()));
        assert_eq!(ctx.get("flight"), Some(&json!(1)));
    }

    #[test]
    fn test_error_key_reserved_for_engine() {
        let mut ctx = ExecutionContext::new();
        assert_eq!(
            ctx.insert(ERROR_KEY, json!("nope")),
            Err(ContextError::ReservedKey(ERROR_KEY.to_string()))
        );

        let descriptor = ErrorDescriptor::new("hotel_search", "places api returned 500", 2);
        ctx.attach_error(&descriptor);
        assert_eq!(ctx.error(), Some(descriptor));
    }

    #[test]
    fn test_descriptor_message_is_bounded() {
        let descriptor = ErrorDescriptor::new("flight_search", "x".repeat(5000), 2);
        assert_eq!(descriptor.message.chars().count(), 1000);
    }
}
