//! Intent and request record types
//!
//! These types are shared between the engine and the intake server. The
//! extraction envelope (`ExtractedIntent`) mirrors the exact JSON shape the
//! generation backend is instructed to produce, so the raw model output can
//! be deserialized directly before the policy pass re-derives its verdict.

use serde::{Deserialize, Serialize};

/// Extraction verdict for a travel request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    /// All four required fields are present and self-consistent
    ReadyToProcess,

    /// At least one required field is missing or invalid
    NeedsClarification,
}

impl IntentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            IntentStatus::ReadyToProcess => "READY_TO_PROCESS",
            IntentStatus::NeedsClarification => "NEEDS_CLARIFICATION",
        }
    }
}

/// Departure/return date pair in YYYY-MM-DD form
///
/// Both sides are optional at the wire level; the policy decides validity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TravelDates {
    #[serde(default)]
    pub departure: Option<String>,

    #[serde(rename = "return", default)]
    pub return_date: Option<String>,
}

/// Structured fields extracted from a free-text travel request
///
/// Required fields: `origin_city`, `destination`, `travel_dates`,
/// `budget_cad`. Everything else is captured when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IntentFields {
    #[serde(default)]
    pub origin_city: Option<String>,

    #[serde(default)]
    pub destination: Option<String>,

    #[serde(default)]
    pub travel_dates: Option<TravelDates>,

    /// Budget in CAD. A stated amount, however small, is never "missing".
    #[serde(default)]
    pub budget_cad: Option<f64>,

    /// "morning", "afternoon", "evening", or absent
    #[serde(default)]
    pub departure_time_preference: Option<String>,

    #[serde(default)]
    pub traveller_count: Option<u32>,

    #[serde(default)]
    pub activity_preferences: Option<Vec<String>>,

    #[serde(default)]
    pub accommodation_preference: Option<String>,

    #[serde(default)]
    pub notes: Option<String>,
}

/// Token accounting for one generation backend call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub model: String,
}

/// Full extraction envelope: verdict plus extracted fields
///
/// The policy pass recomputes `status`, `missing_fields`, and
/// `clarification_needed` from `extracted` — the backend's own claims for
/// those fields are never trusted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedIntent {
    pub status: IntentStatus,

    #[serde(default)]
    pub missing_fields: Vec<String>,

    #[serde(default)]
    pub extracted: IntentFields,

    #[serde(default)]
    pub budget_warning: Option<String>,

    #[serde(default)]
    pub clarification_needed: Option<String>,

    /// Token accounting, attached after the backend call
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub usage: Option<TokenUsage>,
}

impl ExtractedIntent {
    /// Envelope produced when the backend output is not parseable JSON
    pub fn parse_failure() -> Self {
        Self {
            status: IntentStatus::NeedsClarification,
            missing_fields: vec!["parsing_error".to_string()],
            extracted: IntentFields::default(),
            budget_warning: None,
            clarification_needed: Some("System error: could not parse intent.".to_string()),
            usage: None,
        }
    }

    /// True when the request can be handed to the research pipeline
    pub fn is_ready(&self) -> bool {
        self.status == IntentStatus::ReadyToProcess
    }
}

/// Lifecycle status of a persisted request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }

    /// Parse a stored status string; unknown values map to Failed.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "pending" => RequestStatus::Pending,
            "completed" => RequestStatus::Completed,
            _ => RequestStatus::Failed,
        }
    }
}

/// Persisted record for one unique request fingerprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Content-addressed key: SHA-256 of the normalized request text
    pub fingerprint: String,

    pub correlation_id: String,

    pub status: RequestStatus,

    /// Extraction result as recorded by the broker (opaque to the store)
    pub result: serde_json::Value,

    /// Synthesized itinerary narrative, set when status is Completed
    pub narrative: Option<String>,

    /// Truncated human-readable cause, set when status is Failed
    pub failure_cause: Option<String>,

    /// Unix timestamps (seconds)
    pub created_at: i64,
    pub updated_at: i64,

    /// Advisory retention boundary; expired rows are swept best-effort
    pub expires_at: Option<i64>,
}

/// Immediate response to a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub accepted: bool,
    pub fingerprint: String,
    pub correlation_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_status_wire_format() {
        let json = serde_json::to_string(&IntentStatus::ReadyToProcess).unwrap();
        assert_eq!(json, "\"READY_TO_PROCESS\"");

        let parsed: IntentStatus = serde_json::from_str("\"NEEDS_CLARIFICATION\"").unwrap();
        assert_eq!(parsed, IntentStatus::NeedsClarification);
    }

    #[test]
    fn test_travel_dates_return_keyword_rename() {
        let dates: TravelDates =
            serde_json::from_str(r#"{"departure":"2026-03-14","return":"2026-03-17"}"#).unwrap();
        assert_eq!(dates.departure.as_deref(), Some("2026-03-14"));
        assert_eq!(dates.return_date.as_deref(), Some("2026-03-17"));

        let back = serde_json::to_value(&dates).unwrap();
        assert!(back.get("return").is_some());
        assert!(back.get("return_date").is_none());
    }

    #[test]
    fn test_envelope_tolerates_missing_optional_keys() {
        let intent: ExtractedIntent = serde_json::from_str(
            r#"{"status":"NEEDS_CLARIFICATION","extracted":{"destination":"Tokyo"}}"#,
        )
        .unwrap();
        assert_eq!(intent.extracted.destination.as_deref(), Some("Tokyo"));
        assert!(intent.missing_fields.is_empty());
        assert!(intent.usage.is_none());
    }

    #[test]
    fn test_parse_failure_envelope() {
        let intent = ExtractedIntent::parse_failure();
        assert_eq!(intent.status, IntentStatus::NeedsClarification);
        assert_eq!(intent.missing_fields, vec!["parsing_error"]);
        assert!(!intent.is_ready());
    }

    #[test]
    fn test_request_status_round_trip() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Completed,
            RequestStatus::Failed,
        ] {
            assert_eq!(RequestStatus::from_str_lossy(status.as_str()), status);
        }
        assert_eq!(
            RequestStatus::from_str_lossy("garbage"),
            RequestStatus::Failed
        );
    }
}
