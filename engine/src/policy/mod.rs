//! Intent Extraction Policy
//!
//! Pure validation over whatever the generation backend produced. The
//! backend's own `status` and `missing_fields` claims are discarded and
//! re-derived from the extracted fields — the backend is an untrusted
//! input source and occasionally asserts READY_TO_PROCESS over a null
//! field. No I/O happens here.

use chrono::NaiveDate;
use sdk::types::{ExtractedIntent, IntentFields, IntentStatus};

use crate::llm::strip_markdown_fences;

/// Required field names as they appear on the wire and in
/// `missing_fields` entries.
const FIELD_ORIGIN: &str = "origin_city";
const FIELD_DESTINATION: &str = "destination";
const FIELD_DATES: &str = "travel_dates";
const FIELD_BUDGET: &str = "budget_cad";

/// Budget floor below which a warning is synthesized. The stated amount is
/// still extracted as-is; the warning never blocks processing.
const BUDGET_WARNING_FLOOR_CAD: f64 = 100.0;

/// Normalize raw backend output into a validated `ExtractedIntent`.
///
/// Strips markdown fences, parses the JSON envelope, then re-derives the
/// verdict. Unparseable output yields the parsing-error envelope rather
/// than an error: the policy always produces a well-formed intent.
pub fn normalize(raw_model_output: &str) -> ExtractedIntent {
    let stripped = strip_markdown_fences(raw_model_output);

    match serde_json::from_str::<ExtractedIntent>(&stripped) {
        Ok(parsed) => enforce_rules(parsed),
        Err(_) => ExtractedIntent::parse_failure(),
    }
}

/// Re-derive `missing_fields`, `status`, and `clarification_needed` from
/// the extracted fields alone.
pub fn enforce_rules(mut intent: ExtractedIntent) -> ExtractedIntent {
    let mut missing: Vec<String> = Vec::new();

    if !has_text(&intent.extracted.origin_city) {
        missing.push(FIELD_ORIGIN.to_string());
    }
    if !has_text(&intent.extracted.destination) {
        missing.push(FIELD_DESTINATION.to_string());
    }
    if !travel_dates_valid(&intent.extracted) {
        missing.push(FIELD_DATES.to_string());
    }
    // A stated amount — zero included — is never missing. Only absence
    // triggers the rule.
    if intent.extracted.budget_cad.is_none() {
        missing.push(FIELD_BUDGET.to_string());
    }

    if let Some(budget) = intent.extracted.budget_cad {
        if budget < BUDGET_WARNING_FLOOR_CAD && intent.budget_warning.is_none() {
            intent.budget_warning = Some(format!(
                "Stated budget of ${budget} CAD is unusually low; extracted as stated."
            ));
        }
    }

    if intent.extracted.traveller_count.is_none() {
        intent.extracted.traveller_count = Some(1);
    }

    intent.missing_fields = missing;

    if intent.missing_fields.is_empty() {
        intent.status = IntentStatus::ReadyToProcess;
        intent.clarification_needed = None;
    } else {
        intent.status = IntentStatus::NeedsClarification;
        if intent.clarification_needed.is_none() {
            intent.clarification_needed = Some(format!(
                "Missing required fields: {}",
                intent.missing_fields.join(", ")
            ));
        }
    }

    intent
}

fn has_text(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Both dates present, both parse as YYYY-MM-DD, departure on or before
/// return.
fn travel_dates_valid(fields: &IntentFields) -> bool {
    let Some(dates) = &fields.travel_dates else {
        return false;
    };
    let (Some(departure), Some(return_date)) = (&dates.departure, &dates.return_date) else {
        return false;
    };
    match (parse_date(departure), parse_date(return_date)) {
        (Some(dep), Some(ret)) => dep <= ret,
        _ => false,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}
