//! Message sending endpoint.
//!
//! `POST /v1/messages/send` sends a text message through a connected
//! instance. Sends never race a mid-handshake socket: the handle is only
//! handed out while the session is fully connected.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::api::{api_error, error_response};
use crate::state::AppState;

/// Address domain for bare phone-number recipients.
const NETWORK_DOMAIN: &str = "s.chatwire.net";

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub message: String,
}

pub async fn send(State(state): State<AppState>, Json(body): Json<SendMessageBody>) -> Response {
    if body.instance_id.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "instance_id is required");
    }
    if body.message.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "message is required");
    }
    let to = match normalize_recipient(&body.to) {
        Ok(to) => to,
        Err(message) => return api_error(StatusCode::BAD_REQUEST, message),
    };

    let Some(handle) = state.registry.active_handle(&body.instance_id) else {
        return api_error(
            StatusCode::NOT_FOUND,
            format!("instance {:?} is not connected", body.instance_id),
        );
    };

    match handle.send_message(&to, &body.message).await {
        Ok(()) => {
            tracing::debug!(instance = %body.instance_id, to = %to, "message sent");
            Json(serde_json::json!({ "sent": true, "to": to })).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Turn a raw recipient into a network address. Already-qualified addresses
/// pass through; bare phone numbers are stripped to digits and qualified.
fn normalize_recipient(raw: &str) -> Result<String, &'static str> {
    if raw.is_empty() {
        return Err("to is required");
    }
    if raw.contains('@') {
        return Ok(raw.to_owned());
    }

    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 {
        return Err("to must contain at least 10 digits");
    }
    Ok(format!("{digits}@{NETWORK_DOMAIN}"))
}
