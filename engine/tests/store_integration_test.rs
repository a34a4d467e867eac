//! Integration tests for the request store

use sdk::types::{RequestRecord, RequestStatus};
use serde_json::json;
use tempfile::TempDir;

use wayfarer_engine::store::requests::MAX_FAILURE_CAUSE_CHARS;
use wayfarer_engine::store::Database;

fn record(fingerprint: &str, created_at: i64, expires_at: Option<i64>) -> RequestRecord {
    RequestRecord {
        fingerprint: fingerprint.to_string(),
        correlation_id: "cid-test".to_string(),
        status: RequestStatus::Pending,
        result: json!({ "status": "READY_TO_PROCESS" }),
        narrative: None,
        failure_cause: None,
        created_at,
        updated_at: created_at,
        expires_at,
    }
}

async fn open_db() -> (Database, TempDir) {
    let temp = TempDir::new().unwrap();
    let db = Database::new(&temp.path().join("requests.db")).await.unwrap();
    (db, temp)
}

#[tokio::test]
async fn test_put_if_absent_first_writer_wins() {
    let (db, _temp) = open_db().await;
    let requests = db.requests();

    let first = record("fp-1", 100, None);
    assert!(requests.put_if_absent(&first).await.unwrap());

    // Second put with different content must not replace the original
    let mut second = record("fp-1", 999, None);
    second.correlation_id = "cid-other".to_string();
    assert!(!requests.put_if_absent(&second).await.unwrap());

    let stored = requests.get("fp-1").await.unwrap().expect("present");
    assert_eq!(stored.correlation_id, "cid-test");
    assert_eq!(stored.created_at, 100);
}

#[tokio::test]
async fn test_get_missing_returns_none() {
    let (db, _temp) = open_db().await;
    assert!(db.requests().get("absent").await.unwrap().is_none());
}

#[tokio::test]
async fn test_mark_completed_attaches_narrative() {
    let (db, _temp) = open_db().await;
    let requests = db.requests();

    requests.put_if_absent(&record("fp-2", 100, None)).await.unwrap();
    requests
        .mark_completed("fp-2", "Here is your Vancouver itinerary.")
        .await
        .unwrap();

    let stored = requests.get("fp-2").await.unwrap().expect("present");
    assert_eq!(stored.status, RequestStatus::Completed);
    assert_eq!(
        stored.narrative.as_deref(),
        Some("Here is your Vancouver itinerary.")
    );
    assert!(stored.failure_cause.is_none());
    assert!(stored.updated_at >= stored.created_at);
}

#[tokio::test]
async fn test_mark_failed_truncates_cause() {
    let (db, _temp) = open_db().await;
    let requests = db.requests();

    requests.put_if_absent(&record("fp-3", 100, None)).await.unwrap();

    let long_cause = "x".repeat(5000);
    requests.mark_failed("fp-3", &long_cause).await.unwrap();

    let stored = requests.get("fp-3").await.unwrap().expect("present");
    assert_eq!(stored.status, RequestStatus::Failed);
    assert_eq!(
        stored.failure_cause.expect("cause").chars().count(),
        MAX_FAILURE_CAUSE_CHARS
    );
}

#[tokio::test]
async fn test_delete_expired_sweeps_only_past_expiry() {
    let (db, _temp) = open_db().await;
    let requests = db.requests();

    // One long expired, one expiring far in the future, one with no expiry
    requests.put_if_absent(&record("fp-old", 100, Some(200))).await.unwrap();
    requests
        .put_if_absent(&record("fp-fresh", 100, Some(i64::MAX)))
        .await
        .unwrap();
    requests.put_if_absent(&record("fp-keeper", 100, None)).await.unwrap();

    let removed = requests.delete_expired().await.unwrap();
    assert_eq!(removed, 1);

    assert!(requests.get("fp-old").await.unwrap().is_none());
    assert!(requests.get("fp-fresh").await.unwrap().is_some());
    assert!(requests.get("fp-keeper").await.unwrap().is_some());
}

#[tokio::test]
async fn test_result_payload_round_trips_as_json() {
    let (db, _temp) = open_db().await;
    let requests = db.requests();

    let mut rec = record("fp-4", 100, None);
    rec.result = json!({
        "status": "NEEDS_CLARIFICATION",
        "missing_fields": ["origin_city"],
        "extracted": { "destination": "Tokyo" }
    });
    requests.put_if_absent(&rec).await.unwrap();

    let stored = requests.get("fp-4").await.unwrap().expect("present");
    assert_eq!(stored.result["missing_fields"][0], "origin_city");
    assert_eq!(stored.result["extracted"]["destination"], "Tokyo");
}
