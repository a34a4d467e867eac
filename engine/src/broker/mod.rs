//! Request Broker
//!
//! Orchestrates one extraction round: fingerprint the normalized input,
//! short-circuit on a cached record, otherwise invoke the generation
//! backend at temperature zero, validate its output through the extraction
//! policy, and persist the result keyed by fingerprint.
//!
//! Idempotency contract: the backend is invoked at most once per unique
//! fingerprint (subject to store durability), and repeated submissions of
//! byte-identical input resolve to identical results. Store health is
//! never load-bearing — read errors degrade to cache misses, write errors
//! to a skipped persist.

use sdk::errors::EngineError;
use sdk::types::{ExtractedIntent, RequestRecord, RequestStatus, TokenUsage};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info};

use crate::config::{LlmConfig, StoreConfig};
use crate::llm::{ConverseRequest, TextGenerator};
use crate::policy;
use crate::store::requests::unix_now;
use crate::store::RequestRepository;

/// Sentinel input that raises a deliberate unhandled fault before any store
/// access. Exercised only by tests of the dead-letter path; never a
/// production behavior.
pub const CRASH_SENTINEL: &str = "FORCE_CRASH";

/// Fixed system instruction for the extraction call.
///
/// The validation rules and self-check are restated in code by the policy
/// pass; the prompt exists to make the backend's job easy, not to be
/// trusted.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a travel request parser. Your job is to extract structured travel preferences from natural language input and return ONLY valid JSON — no prose, no markdown, no explanation.

Extract the following fields:

REQUIRED:
- origin_city: The departure city or airport. Must be explicitly stated — do NOT infer from context, location, or prior knowledge.
- destination: The arrival city, region, or country. Must be specific enough for an API search. "somewhere warm" or "a beach" is NOT acceptable.
- travel_dates: An object with "departure" and "return" in YYYY-MM-DD format. Both must be clearly inferable from the request. Flag if ambiguous or contradictory.
- budget_cad: A numeric value in CAD. If given in another currency, convert using approximate rates. If a range is given, use the upper bound.

OPTIONAL (capture if present, null if absent):
- departure_time_preference: "morning" (06:00-10:00), "afternoon" (10:00-17:00), "evening" (17:00+), or null
- traveller_count: integer, default 1 if not stated
- activity_preferences: array of strings (e.g. ["hiking", "Japanese food"])
- accommodation_preference: e.g. "hotel", "Airbnb", "hostel", or null
- notes: any other relevant context from the request

VALIDATION RULES:
1. If origin_city is not explicitly stated, set it to null and add "origin_city" to missing_fields.
2. If destination is vague or non-specific (e.g. "somewhere warm", "a beach", "somewhere cheap"), set it to null and add "destination" to missing_fields.
3. Travel dates must be specific enough to pass to a flight search API. You must NOT infer specific dates from seasons (e.g. "summer", "winter") or vague timeframes. If vague, set travel_dates to null and add "travel_dates" to missing_fields.
4. If budget_cad is absent entirely, set it to null and add "budget_cad" to missing_fields. NEVER set budget_cad to null if a dollar amount was stated — even if it seems unrealistically low. The number the user says is what gets extracted, always.
5. If dates are contradictory, set travel_dates to null and add "travel_dates" to missing_fields.
6. If budget appears unrealistically low for the stated trip, still extract the stated amount but set budget_warning to a brief explanation.
7. If the input is not a travel request at all, set all fields to null and add "not_a_travel_request" to missing_fields.

STATUS RULE — THIS IS ABSOLUTE:
- Set status to "READY_TO_PROCESS" if and only if missing_fields is an empty array AND all four required fields (origin_city, destination, travel_dates, budget_cad) are non-null in extracted.
- Set status to "NEEDS_CLARIFICATION" in every other case.
- A non-null budget_warning does NOT affect status. A warning is informational only.

Return this exact JSON shape:
{
  "status": "READY_TO_PROCESS" | "NEEDS_CLARIFICATION",
  "missing_fields": [],
  "extracted": {
    "origin_city": ...,
    "destination": ...,
    "travel_dates": { "departure": ..., "return": ... },
    "budget_cad": ...,
    "departure_time_preference": ...,
    "traveller_count": ...,
    "activity_preferences": [...],
    "accommodation_preference": ...,
    "notes": ...
  },
  "budget_warning": null | "string explaining the concern",
  "clarification_needed": "one sentence explaining what is missing, or null if READY_TO_PROCESS"
}"#;

/// Result of one broker round
#[derive(Debug, Clone)]
pub struct BrokerOutcome {
    pub fingerprint: String,
    pub correlation_id: String,
    pub intent: ExtractedIntent,

    /// True when the result came from the store without a backend call
    pub cached: bool,
}

/// Collapse whitespace runs and trim, so visually identical requests map to
/// one fingerprint.
pub fn normalize_input(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Content-addressed request key: SHA-256 of the normalized text, hex
pub fn fingerprint(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_input(raw).as_bytes());
    hex::encode(hasher.finalize())
}

/// The idempotent intent-extraction broker
pub struct RequestBroker {
    backend: Arc<dyn TextGenerator>,
    requests: Arc<RequestRepository>,
    llm_config: LlmConfig,
    retention_days: i64,

    /// Per-fingerprint gates serializing concurrent identical submissions,
    /// so the second waits out the first and then hits the cache instead of
    /// re-invoking the backend. Distinct fingerprints never contend.
    in_flight: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RequestBroker {
    pub fn new(
        backend: Arc<dyn TextGenerator>,
        requests: Arc<RequestRepository>,
        llm_config: LlmConfig,
        store_config: &StoreConfig,
    ) -> Self {
        Self {
            backend,
            requests,
            llm_config,
            retention_days: store_config.retention_days,
            in_flight: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Handle one submission: cached result or fresh extraction.
    ///
    /// Error conditions: empty input is rejected with `ClientInput` and no
    /// backend call; a backend failure surfaces as `Backend` with nothing
    /// persisted; store failures are swallowed.
    pub async fn handle(
        &self,
        raw_text: &str,
        correlation_id: &str,
    ) -> Result<BrokerOutcome, EngineError> {
        let input = raw_text.trim();
        if input.is_empty() {
            return Err(EngineError::ClientInput("no input provided".to_string()));
        }
        if input == CRASH_SENTINEL {
            // Deliberate fault for dead-letter testing, raised before any
            // store access so no record is ever created for it.
            return Err(EngineError::FatalExecution(
                "deliberate crash-test fault".to_string(),
            ));
        }

        let fingerprint = fingerprint(input);

        let gate = self.acquire_gate(&fingerprint).await;
        let guard = gate.lock().await;
        let outcome = self.handle_locked(input, correlation_id, &fingerprint).await;
        drop(guard);
        // Our own clone must go before the count check, or the entry would
        // never be collectable.
        drop(gate);
        self.release_gate(&fingerprint).await;
        outcome
    }

    /// Take the per-fingerprint gate, creating it on first contention
    async fn acquire_gate(&self, fingerprint: &str) -> Arc<AsyncMutex<()>> {
        let mut gates = self.in_flight.lock().await;
        Arc::clone(
            gates
                .entry(fingerprint.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Drop the gate entry once no other submission holds it
    async fn release_gate(&self, fingerprint: &str) {
        let mut gates = self.in_flight.lock().await;
        if let Some(gate) = gates.get(fingerprint) {
            if Arc::strong_count(gate) == 1 {
                gates.remove(fingerprint);
            }
        }
    }

    /// Cache check, backend round, and persist — serialized per fingerprint
    async fn handle_locked(
        &self,
        input: &str,
        correlation_id: &str,
        fingerprint: &str,
    ) -> Result<BrokerOutcome, EngineError> {
        match self.requests.get(fingerprint).await {
            Ok(Some(record)) => {
                if let Ok(intent) = serde_json::from_value::<ExtractedIntent>(record.result.clone())
                {
                    info!(
                        correlation_id,
                        fingerprint = %fingerprint,
                        "cache hit, skipping backend call"
                    );
                    return Ok(BrokerOutcome {
                        fingerprint: fingerprint.to_string(),
                        correlation_id: correlation_id.to_string(),
                        intent,
                        cached: true,
                    });
                }
                // Unreadable payload from an older schema: fall through and
                // re-extract, the put_if_absent below becomes a no-op.
                error!(
                    correlation_id,
                    fingerprint = %fingerprint,
                    "cached record payload unreadable, re-extracting"
                );
            }
            Ok(None) => {}
            Err(e) => {
                // A store outage must not kill the service.
                error!(
                    correlation_id,
                    fingerprint = %fingerprint,
                    error = %e,
                    "store read failed, treating as cache miss"
                );
            }
        }

        info!(
            correlation_id,
            fingerprint = %fingerprint,
            input_length = input.len(),
            "invoking generation backend"
        );

        let completion = self
            .backend
            .converse(ConverseRequest {
                system: EXTRACTION_SYSTEM_PROMPT.to_string(),
                user_text: input.to_string(),
                max_tokens: self.llm_config.extraction_max_tokens,
                // Extraction, not generation: sampling stays deterministic.
                temperature: 0.0,
            })
            .await
            .map_err(|e| EngineError::Backend(e.to_string()))?;

        let mut intent = policy::normalize(&completion.text);
        intent.usage = Some(TokenUsage {
            input_tokens: completion.usage.input_tokens,
            output_tokens: completion.usage.output_tokens,
            model: self.llm_config.model.clone(),
        });

        self.persist(fingerprint, correlation_id, &intent).await;

        Ok(BrokerOutcome {
            fingerprint: fingerprint.to_string(),
            correlation_id: correlation_id.to_string(),
            intent,
            cached: false,
        })
    }

    /// Best-effort record creation; losing the put race is fine because an
    /// identical fingerprint means an identical result.
    async fn persist(&self, fingerprint: &str, correlation_id: &str, intent: &ExtractedIntent) {
        let now = match unix_now() {
            Ok(now) => now,
            Err(e) => {
                error!(error = %e, "clock unavailable, skipping persist");
                return;
            }
        };

        let result = match serde_json::to_value(intent) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "intent not serializable, skipping persist");
                return;
            }
        };

        let record = RequestRecord {
            fingerprint: fingerprint.to_string(),
            correlation_id: correlation_id.to_string(),
            status: RequestStatus::Pending,
            result,
            narrative: None,
            failure_cause: None,
            created_at: now,
            updated_at: now,
            expires_at: Some(now + self.retention_days * 24 * 60 * 60),
        };

        match self.requests.put_if_absent(&record).await {
            Ok(true) => debug!(fingerprint, "request record created"),
            Ok(false) => debug!(fingerprint, "request record already present"),
            Err(e) => error!(fingerprint, error = %e, "store write failed, continuing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint("Flying from Edmonton to Vancouver");
        let b = fingerprint("Flying from Edmonton to Vancouver");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_normalizes_whitespace() {
        let a = fingerprint("  Flying  from\tEdmonton\n to Vancouver ");
        let b = fingerprint("Flying from Edmonton to Vancouver");
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_inputs_distinct_fingerprints() {
        assert_ne!(fingerprint("to Vancouver"), fingerprint("to Victoria"));
    }

    #[test]
    fn test_normalize_input_collapses_runs() {
        assert_eq!(normalize_input("a  b\t\nc"), "a b c");
    }
}
