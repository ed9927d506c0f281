use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use hearth_agent::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct HealthState {
    orchestrator: Arc<Orchestrator>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub catalog: HealthCheck,
    pub checked_at: String,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { orchestrator })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let catalog = catalog_check(&state.orchestrator);
    let ready = catalog.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "hearth-server runtime initialized".to_string(),
        },
        catalog,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn catalog_check(orchestrator: &Orchestrator) -> HealthCheck {
    let tools = orchestrator.catalog().len();
    if tools == 0 {
        HealthCheck { status: "degraded", detail: "tool catalog is empty".to_string() }
    } else {
        HealthCheck { status: "ready", detail: format!("{tools} tools registered") }
    }
}
