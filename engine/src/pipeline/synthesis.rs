//! Synthesis task
//!
//! Fans the research outputs back in: builds one prompt from the intent,
//! the flight offers, and the ordered parallel results, and asks the
//! generation backend for a personalized itinerary narrative. This is the
//! one pipeline stage that generates rather than extracts, so it runs at a
//! creative temperature.
//!
//! A backend failure here is a task failure routed through catch — never
//! masked with a placeholder narrative.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::config::LlmConfig;
use crate::llm::{ConverseRequest, TextGenerator};
use crate::workflow::{ExecutionContext, TaskError, TaskHandler};

use super::{read_intent, FLIGHT_OUTPUT_KEY, PARALLEL_OUTPUT_KEY};

/// Parallel slot indices, matching the declared branch order
const SLOT_HOTEL: usize = 0;
const SLOT_WEATHER: usize = 1;
const SLOT_EVENTS: usize = 2;

pub struct SynthesisTask {
    backend: Arc<dyn TextGenerator>,
    config: LlmConfig,
}

impl SynthesisTask {
    pub fn new(backend: Arc<dyn TextGenerator>, config: LlmConfig) -> Self {
        Self { backend, config }
    }
}

/// Build the narrative prompt from the assembled research data
fn build_prompt(intent: &Value, flight: &Value, hotel: &Value, weather: &Value, events: &Value) -> String {
    let weather_summary = weather
        .get("summary")
        .and_then(|s| s.as_str())
        .unwrap_or("No weather data available.");

    format!(
        r#"You are an expert travel agent. Your goal is to write a personalized, cohesive travel recommendation.

User Request: {intent}

RESEARCH DATA:

1. FLIGHT OPTIONS:
{flights}

2. HOTELS:
{hotels}

3. WEATHER FORECAST:
{weather_summary}

4. LOCAL ACTIVITIES:
{activities}

INSTRUCTIONS:
Write a travel recommendation structured as follows:

1. **Introduction**: Friendly opening acknowledging their specific request.
2. **Flights**: Recommend the best option(s). Explain WHY based on value and convenience.
3. **Accommodation**: Recommend the best hotel. Explain WHY it fits their preferences.
4. **The Plan**: Suggest a high-level itinerary that integrates the weather forecast with the specific activities found.
5. **Curated Spots**: A quick bulleted list of 3-4 specific places found in the research.

Tone: Professional, enthusiastic, and personalized."#,
        intent = pretty(intent),
        flights = pretty(&flight.get("offers").cloned().unwrap_or(json!([]))),
        hotels = pretty(&hotel.get("hotels").cloned().unwrap_or(json!([]))),
        activities = pretty(&events.get("events").cloned().unwrap_or(json!([]))),
    )
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Pull one slot from the parallel output array, tolerating short arrays
fn slot(parallel: &Value, index: usize) -> Value {
    parallel
        .as_array()
        .and_then(|a| a.get(index))
        .cloned()
        .unwrap_or(Value::Null)
}

#[async_trait]
impl TaskHandler for SynthesisTask {
    async fn run(&self, ctx: &ExecutionContext) -> Result<Value, TaskError> {
        let intent =
            serde_json::to_value(read_intent(ctx)?).map_err(|e| TaskError::InvalidPayload(e.to_string()))?;
        let flight = ctx
            .get(FLIGHT_OUTPUT_KEY)
            .cloned()
            .ok_or_else(|| TaskError::MissingInput(FLIGHT_OUTPUT_KEY.to_string()))?;
        let parallel = ctx
            .get(PARALLEL_OUTPUT_KEY)
            .cloned()
            .ok_or_else(|| TaskError::MissingInput(PARALLEL_OUTPUT_KEY.to_string()))?;

        let prompt = build_prompt(
            &intent,
            &flight,
            &slot(&parallel, SLOT_HOTEL),
            &slot(&parallel, SLOT_WEATHER),
            &slot(&parallel, SLOT_EVENTS),
        );

        debug!(prompt_length = prompt.len(), "requesting narrative synthesis");

        let completion = self
            .backend
            .converse(ConverseRequest {
                system: String::new(),
                user_text: prompt,
                max_tokens: self.config.synthesis_max_tokens,
                temperature: self.config.temperature,
            })
            .await
            .map_err(|e| TaskError::Backend(e.to_string()))?;

        Ok(json!({
            "narrative": completion.text,
            "usage": {
                "input_tokens": completion.usage.input_tokens,
                "output_tokens": completion.usage.output_tokens,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_includes_all_research_sections() {
        let prompt = build_prompt(
            &json!({"destination": "Vancouver"}),
            &json!({"offers": [{"carrier": "AC", "price": "812.00 CAD"}]}),
            &json!({"hotels": [{"name": "Hotel Vancouver"}]}),
            &json!({"summary": "Expect around 12.0\u{b0}C with light rain in Vancouver."}),
            &json!({"events": [{"name": "Stanley Park"}]}),
        );

        assert!(prompt.contains("Vancouver"));
        assert!(prompt.contains("AC"));
        assert!(prompt.contains("Hotel Vancouver"));
        assert!(prompt.contains("light rain"));
        assert!(prompt.contains("Stanley Park"));
    }

    #[test]
    fn test_prompt_survives_missing_sections() {
        let prompt = build_prompt(
            &json!({}),
            &Value::Null,
            &Value::Null,
            &Value::Null,
            &Value::Null,
        );
        assert!(prompt.contains("No weather data available."));
    }

    #[test]
    fn test_slot_tolerates_short_arrays() {
        let parallel = json!([{"hotels": []}]);
        assert_eq!(slot(&parallel, 0), json!({"hotels": []}));
        assert_eq!(slot(&parallel, 2), Value::Null);
        assert_eq!(slot(&Value::Null, 0), Value::Null);
    }
}
