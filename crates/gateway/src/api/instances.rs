//! Instance management endpoints.
//!
//! - `POST   /v1/instances`            create or resume a session
//! - `GET    /v1/instances`            list tracked instances with status
//! - `GET    /v1/instances/:id/status` one instance's status
//! - `DELETE /v1/instances/:id`        remove an instance

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use cw_sessions::CreateOutcome;

use crate::api::{api_error, error_response};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/instances
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateInstanceBody {
    #[serde(default)]
    pub instance_id: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateInstanceBody>,
) -> Response {
    if let Err(message) = check_instance_id(&state, &body.instance_id) {
        return api_error(StatusCode::BAD_REQUEST, message);
    }

    match state.registry.create_or_resume(&body.instance_id).await {
        Ok(CreateOutcome::Connected) => Json(serde_json::json!({
            "status": "connected",
            "connected": true,
        }))
        .into_response(),
        Ok(CreateOutcome::Pairing { qr }) => Json(serde_json::json!({
            "status": "qr",
            "qr": qr,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/instances
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list(State(state): State<AppState>) -> impl IntoResponse {
    let instances: Vec<serde_json::Value> = state
        .registry
        .list()
        .into_iter()
        .map(|id| {
            let status = state.registry.status(&id);
            serde_json::json!({
                "instance_id": id,
                "connected": status.connected,
            })
        })
        .collect();

    Json(serde_json::json!({ "instances": instances }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/instances/:id/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn status(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let status = state.registry.status(&id);
    Json(serde_json::json!({
        "connected": status.connected,
        "exists": status.exists,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/instances/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn remove(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    state.registry.delete(&id).await;
    Json(serde_json::json!({ "deleted": true }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn check_instance_id(state: &AppState, id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("instance_id is required");
    }
    if !state.instance_id_re.is_match(id) {
        return Err("instance_id may only contain letters, digits, '_' and '-'");
    }
    Ok(())
}
