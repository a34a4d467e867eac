use super::{Completion, ConverseRequest, GenerationError, TextGenerator, Usage};
use crate::config::LlmConfig;
use async_trait::async_trait;
use serde_json::json;

/// Generation backend speaking the Anthropic Messages API.
///
/// The API key is read from the environment variable named in the config;
/// it is never persisted anywhere.
pub struct AnthropicBackend {
    config: LlmConfig,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_key(&self) -> super::Result<String> {
        std::env::var(&self.config.api_key_env).map_err(|_| {
            GenerationError::AuthenticationFailed(format!(
                "environment variable {} is not set",
                self.config.api_key_env
            ))
        })
    }
}

#[async_trait]
impl TextGenerator for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn converse(&self, request: ConverseRequest) -> super::Result<Completion> {
        let api_key = self.api_key()?;

        let url = format!("{}/messages", self.config.base_url);

        let payload = json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system,
            "messages": [
                { "role": "user", "content": request.user_text }
            ],
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout
                } else {
                    GenerationError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(GenerationError::AuthenticationFailed(text));
            } else if status.as_u16() == 429 {
                return Err(GenerationError::RateLimitExceeded);
            } else {
                return Err(GenerationError::InvalidRequest(text));
            }
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::ParseError(e.to_string()))?;

        let content_arr = data
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| {
                GenerationError::ParseError("No content array in response".to_string())
            })?;

        let mut full_text = String::new();
        for item in content_arr {
            if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                full_text.push_str(text);
            }
        }

        let usage = Usage {
            input_tokens: data
                .pointer("/usage/input_tokens")
                .and_then(|v| v.as_u64()),
            output_tokens: data
                .pointer("/usage/output_tokens")
                .and_then(|v| v.as_u64()),
        };

        Ok(Completion {
            text: full_text,
            usage,
        })
    }
}
