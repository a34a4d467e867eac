//! Property tests for the intent extraction policy
//!
//! The central invariant: READY_TO_PROCESS if and only if every required
//! field is present and the date range is self-consistent — regardless of
//! what the backend claimed about its own output.

use chrono::NaiveDate;
use proptest::prelude::*;
use serde_json::json;

use sdk::types::IntentStatus;
use wayfarer_engine::policy::normalize;

fn envelope(
    claimed_status: &str,
    claimed_missing: Vec<String>,
    origin: Option<String>,
    destination: Option<String>,
    travel_dates: Option<serde_json::Value>,
    budget: Option<f64>,
) -> String {
    json!({
        "status": claimed_status,
        "missing_fields": claimed_missing,
        "extracted": {
            "origin_city": origin,
            "destination": destination,
            "travel_dates": travel_dates,
            "budget_cad": budget,
        },
        "budget_warning": null,
        "clarification_needed": null
    })
    .to_string()
}

fn date(days_from_base: i64) -> String {
    let base = NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid base date");
    (base + chrono::Duration::days(days_from_base))
        .format("%Y-%m-%d")
        .to_string()
}

proptest! {
    /// READY_TO_PROCESS iff all four required fields are valid, for random
    /// field combinations and random (untrustworthy) backend verdicts.
    #[test]
    fn ready_iff_required_fields_present_and_dates_consistent(
        origin in proptest::option::of("[A-Za-z]{1,12}"),
        destination in proptest::option::of("[A-Za-z]{1,12}"),
        has_dates in any::<bool>(),
        departure_offset in 0i64..700,
        trip_length in -200i64..200,
        budget in proptest::option::of(0.0f64..20_000.0),
        claimed_ready in any::<bool>(),
        claimed_missing in proptest::collection::vec("[a-z_]{3,12}", 0..3),
    ) {
        let travel_dates = has_dates.then(|| json!({
            "departure": date(departure_offset),
            "return": date(departure_offset + trip_length),
        }));
        let dates_valid = has_dates && trip_length >= 0;

        let claimed_status = if claimed_ready { "READY_TO_PROCESS" } else { "NEEDS_CLARIFICATION" };
        let raw = envelope(
            claimed_status,
            claimed_missing,
            origin.clone(),
            destination.clone(),
            travel_dates,
            budget,
        );

        let intent = normalize(&raw);

        let expect_ready =
            origin.is_some() && destination.is_some() && dates_valid && budget.is_some();

        prop_assert_eq!(intent.is_ready(), expect_ready);
        prop_assert_eq!(intent.missing_fields.is_empty(), expect_ready);

        if expect_ready {
            prop_assert_eq!(intent.status, IntentStatus::ReadyToProcess);
            prop_assert!(intent.clarification_needed.is_none());
        } else {
            prop_assert_eq!(intent.status, IntentStatus::NeedsClarification);
            prop_assert!(intent.clarification_needed.is_some());
        }

        // Missing-field re-derivation matches field validity exactly
        prop_assert_eq!(intent.missing_fields.contains(&"origin_city".to_string()), origin.is_none());
        prop_assert_eq!(intent.missing_fields.contains(&"destination".to_string()), destination.is_none());
        prop_assert_eq!(intent.missing_fields.contains(&"travel_dates".to_string()), !dates_valid);
        prop_assert_eq!(intent.missing_fields.contains(&"budget_cad".to_string()), budget.is_none());
    }

    /// A stated budget, however small, never counts as missing.
    #[test]
    fn stated_budget_is_never_missing(budget in 0.0f64..99.0) {
        let raw = envelope(
            "NEEDS_CLARIFICATION",
            vec!["budget_cad".to_string()],
            Some("Edmonton".to_string()),
            Some("Vancouver".to_string()),
            Some(json!({ "departure": "2026-03-14", "return": "2026-03-17" })),
            Some(budget),
        );

        let intent = normalize(&raw);
        prop_assert!(intent.is_ready());
        prop_assert!(!intent.missing_fields.contains(&"budget_cad".to_string()));
        // Low but stated amounts warn without blocking
        prop_assert!(intent.budget_warning.is_some());
    }

    /// Unparseable backend output always yields the parsing-error envelope,
    /// never a panic and never READY.
    #[test]
    fn garbage_output_never_ready(raw in "[^{}]{0,200}") {
        let intent = normalize(&raw);
        prop_assert_eq!(intent.status, IntentStatus::NeedsClarification);
        prop_assert_eq!(intent.missing_fields.clone(), vec!["parsing_error".to_string()]);
    }

    /// Normalization is idempotent over its own output.
    #[test]
    fn normalize_is_idempotent(
        origin in proptest::option::of("[A-Za-z]{1,12}"),
        budget in proptest::option::of(0.0f64..20_000.0),
    ) {
        let raw = envelope(
            "READY_TO_PROCESS",
            vec![],
            origin,
            Some("Vancouver".to_string()),
            Some(json!({ "departure": "2026-03-14", "return": "2026-03-17" })),
            budget,
        );

        let first = normalize(&raw);
        let second = normalize(&serde_json::to_string(&first).expect("serializable"));
        prop_assert_eq!(first, second);
    }
}
