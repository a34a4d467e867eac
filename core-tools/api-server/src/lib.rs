//! Intake API Server
//!
//! Thin HTTP adapter over the engine's entry contract. Submissions are
//! accepted immediately (202) and processed asynchronously; terminal status
//! is retrievable by fingerprint.
//!
//! # Endpoints
//!
//! - POST /api/requests - Submit a travel request (202, or 400 on empty input)
//! - GET /api/requests/:fingerprint - Poll a request record
//! - GET /api/status - Server health

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sdk::errors::EngineError;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use wayfarer_engine::service::TravelService;

/// Server state shared across handlers
#[derive(Clone)]
struct ServerState {
    service: Arc<TravelService>,
}

/// Submission body
#[derive(Debug, Deserialize)]
struct SubmitRequest {
    input: String,
}

/// Build the intake router over a service handle
pub fn router(service: Arc<TravelService>) -> Router {
    Router::new()
        .route("/api/requests", post(submit_handler))
        .route("/api/requests/:fingerprint", get(fetch_handler))
        .route("/api/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(ServerState { service })
}

async fn submit_handler(
    State(state): State<ServerState>,
    Json(body): Json<SubmitRequest>,
) -> Response {
    match state.service.submit(&body.input) {
        Ok(receipt) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "message": "Request accepted",
                "requestId": receipt.fingerprint,
                "correlationId": receipt.correlation_id,
            })),
        )
            .into_response(),
        Err(EngineError::ClientInput(message)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": message })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "submission failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal Server Error" })),
            )
                .into_response()
        }
    }
}

async fn fetch_handler(
    State(state): State<ServerState>,
    Path(fingerprint): Path<String>,
) -> Response {
    match state.service.fetch(&fingerprint).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no record for fingerprint" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, fingerprint, "record fetch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal Server Error" })),
            )
                .into_response()
        }
    }
}

async fn status_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "wayfarer-intake" }))
}

/// Running intake server with graceful shutdown
pub struct ApiServer {
    addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ApiServer {
    /// Bind and start serving in a background task
    pub async fn start(service: Arc<TravelService>, bind_addr: &str) -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let app = router(service);

        tokio::spawn(async move {
            tracing::info!("intake server listening on http://{}", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_rx.await.ok();
                    tracing::info!("intake server shutting down gracefully");
                })
                .await
                .unwrap_or_else(|e| {
                    tracing::error!("intake server error: {}", e);
                });
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// The bound address (useful when binding port 0)
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal graceful shutdown
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use wayfarer_engine::config::Config;
    use wayfarer_engine::store::Database;

    async fn test_router() -> (Router, TempDir) {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.core.data_dir = temp.path().to_path_buf();
        // Background extraction must never reach a real backend from tests
        config.llm.base_url = "http://127.0.0.1:9".to_string();

        let db = Database::new(&config.db_path()).await.unwrap();
        let service = Arc::new(TravelService::from_config(&config, &db));
        (router(service), temp)
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (app, _temp) = test_router().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_empty_submission_rejected() {
        let (app, _temp) = test_router().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/requests")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"input": "   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_submission_accepted_with_receipt() {
        let (app, _temp) = test_router().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/requests")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"input": "Edmonton to Vancouver in March"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["requestId"].as_str().unwrap().len(), 64);
        assert!(json["correlationId"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_fingerprint_is_404() {
        let (app, _temp) = test_router().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/requests/deadbeef")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
