//! Flight research task
//!
//! One external capability call: an Amadeus-style flight-offers search.
//! OAuth2 client-credentials token exchange, then an offers query bounded
//! by the stated budget. Results are simplified to the few fields the
//! synthesis stage actually uses.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::FlightConfig;
use crate::workflow::{ExecutionContext, TaskError, TaskHandler};

use super::read_intent;

/// City-name to IATA-code mapping for common demo cities. The offers API
/// requires codes; anything unmapped is passed through unchanged and may
/// be rejected upstream.
const IATA_MAP: &[(&str, &str)] = &[
    ("Edmonton", "YEG"),
    ("Vancouver", "YVR"),
    ("Toronto", "YYZ"),
    ("New York", "JFK"),
    ("London", "LHR"),
    ("Paris", "CDG"),
    ("Tokyo", "NRT"),
];

fn iata_code(city: &str) -> &str {
    IATA_MAP
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(city))
        .map(|(_, code)| *code)
        .unwrap_or(city)
}

pub struct FlightSearchTask {
    http: reqwest::Client,
    config: FlightConfig,
}

impl FlightSearchTask {
    pub fn new(http: reqwest::Client, config: FlightConfig) -> Self {
        Self { http, config }
    }

    fn credentials(&self) -> Result<(String, String), TaskError> {
        let id = std::env::var(&self.config.client_id_env)
            .map_err(|_| TaskError::Backend(format!("{} not set", self.config.client_id_env)))?;
        let secret = std::env::var(&self.config.client_secret_env).map_err(|_| {
            TaskError::Backend(format!("{} not set", self.config.client_secret_env))
        })?;
        Ok((id, secret))
    }

    /// Exchange client credentials for an access token
    async fn access_token(&self) -> Result<String, TaskError> {
        let (client_id, client_secret) = self.credentials()?;
        let url = format!("{}/v1/security/oauth2/token", self.config.base_url);

        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| TaskError::Backend(format!("token exchange failed: {e}")))?;

        if !response.status().is_success() {
            return Err(TaskError::Backend(format!(
                "token exchange returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TaskError::Backend(format!("token response unreadable: {e}")))?;

        body.get("access_token")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| TaskError::Backend("no access_token in token response".to_string()))
    }

    async fn search_offers(
        &self,
        token: &str,
        origin: &str,
        destination: &str,
        departure: &str,
        return_date: &str,
        budget: Option<f64>,
    ) -> Result<Vec<Value>, TaskError> {
        let mut query: Vec<(String, String)> = vec![
            ("originLocationCode".into(), origin.into()),
            ("destinationLocationCode".into(), destination.into()),
            ("departureDate".into(), departure.into()),
            ("returnDate".into(), return_date.into()),
            ("adults".into(), "1".into()),
            ("max".into(), "5".into()),
        ];
        if let Some(budget) = budget {
            query.push(("maxPrice".into(), format!("{}", budget as i64)));
            query.push(("currencyCode".into(), "CAD".into()));
        }

        let url = format!("{}/v2/shopping/flight-offers", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .query(&query)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| TaskError::Backend(format!("offers search failed: {e}")))?;

        if !response.status().is_success() {
            return Err(TaskError::Backend(format!(
                "offers search returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TaskError::Backend(format!("offers response unreadable: {e}")))?;

        Ok(body
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default())
    }
}

/// Reduce raw offers to carrier/price/duration for the top three
fn simplify_offers(offers: &[Value]) -> Vec<Value> {
    offers
        .iter()
        .take(3)
        .filter_map(|offer| {
            let itinerary = offer.get("itineraries")?.as_array()?.first()?;
            let price = offer.get("price")?;
            let carrier = itinerary
                .pointer("/segments/0/carrierCode")
                .and_then(|c| c.as_str())
                .unwrap_or("Unknown");

            Some(json!({
                "carrier": carrier,
                "price": format!(
                    "{} {}",
                    price.get("total").and_then(|t| t.as_str()).unwrap_or("?"),
                    price.get("currency").and_then(|c| c.as_str()).unwrap_or("CAD"),
                ),
                "duration": itinerary.get("duration").cloned().unwrap_or(Value::Null),
                "id": offer.get("id").cloned().unwrap_or(Value::Null),
            }))
        })
        .collect()
}

#[async_trait]
impl TaskHandler for FlightSearchTask {
    async fn run(&self, ctx: &ExecutionContext) -> Result<Value, TaskError> {
        let intent = read_intent(ctx)?;

        let origin_city = intent
            .origin_city
            .ok_or_else(|| TaskError::MissingInput("origin_city".to_string()))?;
        let destination = intent
            .destination
            .ok_or_else(|| TaskError::MissingInput("destination".to_string()))?;
        let dates = intent
            .travel_dates
            .ok_or_else(|| TaskError::MissingInput("travel_dates".to_string()))?;
        let departure = dates
            .departure
            .ok_or_else(|| TaskError::MissingInput("travel_dates.departure".to_string()))?;
        let return_date = dates
            .return_date
            .ok_or_else(|| TaskError::MissingInput("travel_dates.return".to_string()))?;

        let origin_code = iata_code(&origin_city);
        let dest_code = iata_code(&destination);

        debug!(origin = origin_code, destination = dest_code, "searching flight offers");

        let token = self.access_token().await?;
        let offers = self
            .search_offers(
                &token,
                origin_code,
                dest_code,
                &departure,
                &return_date,
                intent.budget_cad,
            )
            .await?;

        Ok(json!({
            "source": "amadeus",
            "origin": origin_code,
            "destination": dest_code,
            "offers": simplify_offers(&offers),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iata_mapping_is_case_insensitive() {
        assert_eq!(iata_code("Edmonton"), "YEG");
        assert_eq!(iata_code("edmonton"), "YEG");
        assert_eq!(iata_code("YEG"), "YEG");
        assert_eq!(iata_code("Springfield"), "Springfield");
    }

    #[test]
    fn test_simplify_offers_takes_top_three() {
        let offer = json!({
            "id": "1",
            "price": { "total": "812.00", "currency": "CAD" },
            "itineraries": [
                { "duration": "PT9H30M", "segments": [ { "carrierCode": "AC" } ] }
            ]
        });
        let offers = vec![offer.clone(), offer.clone(), offer.clone(), offer];

        let simplified = simplify_offers(&offers);
        assert_eq!(simplified.len(), 3);
        assert_eq!(simplified[0]["carrier"], "AC");
        assert_eq!(simplified[0]["price"], "812.00 CAD");
    }

    #[test]
    fn test_simplify_offers_skips_malformed_entries() {
        let offers = vec![json!({"id": "no-itinerary"})];
        assert!(simplify_offers(&offers).is_empty());
    }
}
