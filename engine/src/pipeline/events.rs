//! Local events research task
//!
//! One Places text search per stated activity preference (top two, to keep
//! quota use bounded), falling back to a generic attractions query when the
//! request named none.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::PlacesConfig;
use crate::workflow::{ExecutionContext, TaskError, TaskHandler};

use super::read_intent;

/// Preferences queried per request
const MAX_PREFERENCES: usize = 2;

const FIELD_MASK: &str =
    "places.displayName,places.formattedAddress,places.rating,places.userRatingCount,places.websiteUri";

pub struct EventsSearchTask {
    http: reqwest::Client,
    config: PlacesConfig,
}

impl EventsSearchTask {
    pub fn new(http: reqwest::Client, config: PlacesConfig) -> Self {
        Self { http, config }
    }

    async fn search_places(&self, query: &str) -> Result<Vec<Value>, TaskError> {
        let api_key = std::env::var(&self.config.api_key_env)
            .map_err(|_| TaskError::Backend(format!("{} not set", self.config.api_key_env)))?;

        let url = format!("{}/v1/places:searchText", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .header("X-Goog-Api-Key", api_key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&json!({ "textQuery": query, "maxResultCount": 5 }))
            .send()
            .await
            .map_err(|e| TaskError::Backend(format!("places search failed: {e}")))?;

        if !response.status().is_success() {
            return Err(TaskError::Backend(format!(
                "places search returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TaskError::Backend(format!("places response unreadable: {e}")))?;

        Ok(body
            .get("places")
            .and_then(|p| p.as_array())
            .cloned()
            .unwrap_or_default())
    }
}

/// Preferences to query, bounded and defaulted
fn preferences_to_query(stated: Option<Vec<String>>) -> Vec<String> {
    let stated: Vec<String> = stated
        .unwrap_or_default()
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect();

    if stated.is_empty() {
        return vec!["tourist attractions".to_string()];
    }
    stated.into_iter().take(MAX_PREFERENCES).collect()
}

#[async_trait]
impl TaskHandler for EventsSearchTask {
    async fn run(&self, ctx: &ExecutionContext) -> Result<Value, TaskError> {
        let intent = read_intent(ctx)?;
        let destination = intent
            .destination
            .ok_or_else(|| TaskError::MissingInput("destination".to_string()))?;

        let preferences = preferences_to_query(intent.activity_preferences);
        debug!(destination = %destination, ?preferences, "searching local activities");

        let mut found = Vec::new();
        for preference in &preferences {
            let places = self
                .search_places(&format!("{preference} in {destination}"))
                .await?;
            for place in places {
                found.push(json!({
                    "activity": preference,
                    "name": place.pointer("/displayName/text").cloned().unwrap_or(Value::Null),
                    "rating": place.get("rating").cloned().unwrap_or(Value::Null),
                    "address": place.get("formattedAddress").cloned().unwrap_or(Value::Null),
                    "website": place.get("websiteUri").cloned().unwrap_or(Value::Null),
                }));
            }
        }

        Ok(json!({
            "source": "places",
            "location": destination,
            "events": found,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_default_when_absent() {
        assert_eq!(preferences_to_query(None), vec!["tourist attractions"]);
        assert_eq!(
            preferences_to_query(Some(vec![])),
            vec!["tourist attractions"]
        );
    }

    #[test]
    fn test_preferences_bounded_to_two() {
        let stated = Some(vec![
            "hiking".to_string(),
            "sushi".to_string(),
            "museums".to_string(),
        ]);
        assert_eq!(preferences_to_query(stated), vec!["hiking", "sushi"]);
    }

    #[test]
    fn test_blank_preferences_are_dropped() {
        let stated = Some(vec!["  ".to_string(), "jazz bars".to_string()]);
        assert_eq!(preferences_to_query(stated), vec!["jazz bars"]);
    }
}
