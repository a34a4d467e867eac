//! Generation Backend Abstraction Layer
//!
//! This module provides a common interface for the text generation backend.
//! The `TextGenerator` trait defines one opaque text-in/text-out contract so
//! the broker and synthesis stage never depend on a concrete vendor API, and
//! tests can substitute a scripted backend.
//!
//! The backend is treated as an untrusted input source: callers never act on
//! any verdict embedded in the generated text without revalidating it.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod anthropic;

/// Result type for generation operations
pub type Result<T> = std::result::Result<T, GenerationError>;

/// Errors that can occur during a generation backend call
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// One backend invocation: fixed system instruction plus the user text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseRequest {
    /// System instruction framing the task
    pub system: String,

    /// The raw user text to respond to
    pub user_text: String,

    /// Output token budget
    pub max_tokens: u32,

    /// Sampling temperature; 0.0 for extraction, higher for synthesis
    pub temperature: f32,
}

/// Token accounting reported by the backend
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Response from the generation backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text, joined across content blocks
    pub text: String,

    /// Token usage for cost accounting
    pub usage: Usage,
}

/// Generation backend trait
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Returns the backend name (e.g., "anthropic")
    fn name(&self) -> &str;

    /// Generate a completion for the given request
    async fn converse(&self, request: ConverseRequest) -> Result<Completion>;
}

/// Remove markdown code fences (``` and ~~~) from generated output.
///
/// The backend is instructed to return bare JSON but wraps it in fences
/// often enough that every caller expecting structured output strips them
/// first. Handles a language tag after the opening fence and trailing
/// prose-free whitespace.
pub fn strip_markdown_fences(text: &str) -> String {
    // Compiled per call; extraction happens once per unique request so this
    // is not on a hot path.
    let opening = Regex::new(r"(?m)^(```|~~~)[a-zA-Z]*\s*\n?").expect("static regex");
    let closing = Regex::new(r"(?m)\n?\s*(```|~~~)\s*$").expect("static regex");

    let without_opening = opening.replace_all(text, "");
    let without_closing = closing.replace_all(&without_opening, "");
    without_closing.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences_with_language_tag() {
        let fenced = "```json\n{\"status\": \"READY_TO_PROCESS\"}\n```";
        assert_eq!(
            strip_markdown_fences(fenced),
            "{\"status\": \"READY_TO_PROCESS\"}"
        );
    }

    #[test]
    fn test_strip_fences_without_language_tag() {
        let fenced = "```\n{\"a\": 1}\n```";
        assert_eq!(strip_markdown_fences(fenced), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_tilde_fences() {
        let fenced = "~~~json\n{\"a\": 1}\n~~~";
        assert_eq!(strip_markdown_fences(fenced), "{\"a\": 1}");
    }

    #[test]
    fn test_unfenced_text_unchanged() {
        let plain = "{\"status\": \"NEEDS_CLARIFICATION\"}";
        assert_eq!(strip_markdown_fences(plain), plain);
    }

    #[test]
    fn test_leading_trailing_whitespace_trimmed() {
        assert_eq!(strip_markdown_fences("  {\"a\": 1}  \n"), "{\"a\": 1}");
    }
}
