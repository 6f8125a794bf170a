//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::backend::EditRequest;
use crate::queue::{QueueStatus, TicketId};
use crate::service::EditService;
use crate::version::EDITLET_VERSION;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    pub status: &'static str,
    pub queue_length: usize,
    pub is_processing: bool,
    pub version: &'static str,
}

async fn health_check(State(service): State<Arc<EditService>>) -> Json<HealthCheckResponse> {
    let status = service.status(None);
    Json(HealthCheckResponse {
        // No setup phase: the backend is a remote API, usable from boot.
        status: "READY",
        queue_length: status.queue_length,
        is_processing: status.is_processing,
        version: EDITLET_VERSION,
    })
}

async fn create_edit(
    State(service): State<Arc<EditService>>,
    Json(request): Json<EditRequest>,
) -> impl IntoResponse {
    if request.image_data.is_empty() || request.prompt.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "error": "Missing imageData or prompt"
            })),
        );
    }

    let response = service.process(request).await;

    // Generation failure is data, not an HTTP error.
    (StatusCode::OK, Json(serde_json::json!(response)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusParams {
    queue_id: Option<String>,
}

async fn queue_status(
    State(service): State<Arc<EditService>>,
    Query(params): Query<StatusParams>,
) -> Json<QueueStatus> {
    // A malformed id reads as an unknown ticket: position 0, not current.
    let ticket = params
        .queue_id
        .as_deref()
        .and_then(|s| TicketId::parse(s).ok());
    Json(service.status(ticket))
}

pub fn routes(service: Arc<EditService>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/api/edits", post(create_edit))
        .route("/api/queue-status", get(queue_status))
        .with_state(service)
}
