//! Hotel research task
//!
//! Places text search for hotels at the destination, simplified to the
//! display fields the narrative needs.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::PlacesConfig;
use crate::workflow::{ExecutionContext, TaskError, TaskHandler};

use super::read_intent;

/// The v1 Places API rejects requests without an explicit field mask.
const FIELD_MASK: &str = "places.displayName,places.formattedAddress,places.priceLevel,places.rating,places.userRatingCount,places.websiteUri";

pub struct HotelSearchTask {
    http: reqwest::Client,
    config: PlacesConfig,
}

impl HotelSearchTask {
    pub fn new(http: reqwest::Client, config: PlacesConfig) -> Self {
        Self { http, config }
    }

    async fn search_hotels(&self, destination: &str) -> Result<Vec<Value>, TaskError> {
        let api_key = std::env::var(&self.config.api_key_env)
            .map_err(|_| TaskError::Backend(format!("{} not set", self.config.api_key_env)))?;

        let url = format!("{}/v1/places:searchText", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .header("X-Goog-Api-Key", api_key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&json!({
                "textQuery": format!("hotels in {destination}"),
                "maxResultCount": 5,
            }))
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

/// Flatten raw place entries into the fields downstream stages use
fn simplify_places(places: &[Value]) -> Vec<Value> {
    places
        .iter()
        .map(|p| {
            json!({
                "name": p.pointer("/displayName/text").cloned().unwrap_or(Value::Null),
                "address": p.get("formattedAddress").cloned().unwrap_or(Value::Null),
                "rating": p.get("rating").cloned().unwrap_or(Value::Null),
                "price_level": p.get("priceLevel").cloned().unwrap_or(json!("UNKNOWN")),
                "website": p.get("websiteUri").cloned().unwrap_or(Value::Null),
            })
        })
        .collect()
}

#[async_trait]
impl TaskHandler for HotelSearchTask {
    async fn run(&self, ctx: &ExecutionContext) -> Result<Value, TaskError> {
        let intent = read_intent(ctx)?;
        let destination = intent
            .destination
            .ok_or_else(|| TaskError::MissingInput("destination".to_string()))?;

        debug!(destination = %destination, "searching hotels");

        let places = self.search_hotels(&destination).await?;

        Ok(json!({
            "source": "places",
            "location": destination,
            "hotels": simplify_places(&places),
        }))
    }
}
