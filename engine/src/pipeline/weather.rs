//! Weather research task
//!
//! Five-day forecast for the destination, reduced to a one-line
//! plain-language summary the synthesis stage can quote directly.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::config::WeatherConfig;
use crate::workflow::{ExecutionContext, TaskError, TaskHandler};

use super::read_intent;

pub struct WeatherForecastTask {
    http: reqwest::Client,
    config: WeatherConfig,
}

impl WeatherForecastTask {
    pub fn new(http: reqwest::Client, config: WeatherConfig) -> Self {
        Self { http, config }
    }

    async fn forecast(&self, city: &str) -> Result<Value, TaskError> {
        let api_key = std::env::var(&self.config.api_key_env)
            .map_err(|_| TaskError::Backend(format!("{} not set", self.config.api_key_env)))?;

        let url = format!("{}/data/2.5/forecast", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("q", city),
                ("appid", api_key.as_str()),
                ("units", "metric"),
                ("cnt", "40"),
            ])
            .send()
            .await
            .map_err(|e| TaskError::Backend(format!("forecast request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(TaskError::Backend(format!(
                "forecast request returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| TaskError::Backend(format!("forecast response unreadable: {e}")))
    }
}

/// Average the first ~24h of entries and pick the most common condition
fn summarize_forecast(forecast: &Value) -> String {
    let city = forecast
        .pointer("/city/name")
        .and_then(|n| n.as_str())
        .unwrap_or("the destination");

    let entries: Vec<&Value> = forecast
        .get("list")
        .and_then(|l| l.as_array())
        .map(|l| l.iter().take(8).collect())
        .unwrap_or_default();

    if entries.is_empty() {
        return "Weather data unavailable.".to_string();
    }

    let temps: Vec<f64> = entries
        .iter()
        .filter_map(|e| e.pointer("/main/temp").and_then(|t| t.as_f64()))
        .collect();
    let avg_temp = if temps.is_empty() {
        0.0
    } else {
        temps.iter().sum::<f64>() / temps.len() as f64
    };

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for entry in &entries {
        if let Some(description) = entry
            .pointer("/weather/0/description")
            .and_then(|d| d.as_str())
        {
            *counts.entry(description).or_insert(0) += 1;
        }
    }
    let condition = counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(description, _)| description)
        .unwrap_or("unknown conditions");

    format!("Expect around {avg_temp:.1}\u{b0}C with {condition} in {city}.")
}

#[async_trait]
impl TaskHandler for WeatherForecastTask {
    async fn run(&self, ctx: &ExecutionContext) -> Result<Value, TaskError> {
        let intent = read_intent(ctx)?;
        let destination = intent
            .destination
            .ok_or_else(|| TaskError::MissingInput("destination".to_string()))?;

        debug!(destination = %destination, "fetching forecast");

        let forecast = self.forecast(&destination).await?;
        let summary = summarize_forecast(&forecast);

        Ok(json!({
            "source": "openweathermap",
            "location": destination,
            "summary": summary,
            "raw_temp": forecast.pointer("/list/0/main/temp").cloned().unwrap_or(Value::Null),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forecast_fixture() -> Value {
        json!({
            "city": { "name": "Vancouver" },
            "list": [
                { "main": { "temp": 10.0 }, "weather": [ { "description": "light rain" } ] },
                { "main": { "temp": 12.0 }, "weather": [ { "description": "light rain" } ] },
                { "main": { "temp": 14.0 }, "weather": [ { "description": "scattered clouds" } ] }
            ]
        })
    }

    #[test]
    fn test_summary_averages_and_picks_common_condition() {
        let summary = summarize_forecast(&forecast_fixture());
        assert_eq!(summary, "Expect around 12.0\u{b0}C with light rain in Vancouver.");
    }

    #[test]
    fn test_summary_handles_empty_forecast() {
        assert_eq!(
            summarize_forecast(&json!({"list": []})),
            "Weather data unavailable."
        );
        assert_eq!(summarize_forecast(&json!({})), "Weather data unavailable.");
    }
}
