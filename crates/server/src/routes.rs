use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use hearth_agent::orchestrator::{Orchestrator, QueryRequest, QueryResponse};

use crate::health;

#[derive(Clone)]
pub struct ApiState {
    orchestrator: Arc<Orchestrator>,
}

/// Body of `POST /query`. A turn carries free text, approvals for earlier
/// deferred calls, or both.
#[derive(Clone, Debug, Deserialize)]
pub struct ApiQueryRequest {
    pub user_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub approvals: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/query", post(run_query))
        .with_state(ApiState { orchestrator: Arc::clone(&orchestrator) })
        .merge(health::router(orchestrator))
}

async fn run_query(
    State(state): State<ApiState>,
    Json(body): Json<ApiQueryRequest>,
) -> Result<Json<QueryResponse>, (StatusCode, Json<ApiError>)> {
    let user_id = body.user_id.trim().to_string();
    if user_id.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError { error: "user_id is required".to_string() }),
        ));
    }
    if body.text.trim().is_empty() && body.approvals.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError { error: "a turn needs text, approvals, or both".to_string() }),
        ));
    }

    let request_id = Uuid::new_v4();
    info!(
        event_name = "api.query.received",
        request_id = %request_id,
        user_id = %user_id,
        approvals = body.approvals.len(),
        "query accepted"
    );

    let request = QueryRequest { text: body.text, approvals: body.approvals };
    let response = state.orchestrator.process_query(&user_id, request).await;

    info!(
        event_name = "api.query.answered",
        request_id = %request_id,
        user_id = %user_id,
        turn_id = %response.trace.turn_id,
        pending = response.pending.len(),
        "query answered"
    );

    Ok(Json(response))
}
