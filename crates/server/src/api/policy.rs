//! Admin endpoints for reading, pushing and reloading policies.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use tracing::info;

use warden_core::constants::{ERROR_BAD_JSON, ERROR_UNKNOWN};
use warden_policy::Policy;

use super::{error_response, json_response, AdminState};

/// `GET /_matrix/corporal/policy`
pub async fn get_policy(State(state): State<Arc<AdminState>>) -> Response {
    // May be null when nothing has been loaded or pushed yet.
    let policy = state.policy_store.get();
    json_response(
        StatusCode::OK,
        &serde_json::json!({ "policy": policy.as_deref() }),
    )
}

/// `PUT /_matrix/corporal/policy`
pub async fn put_policy(State(state): State<Arc<AdminState>>, body: Bytes) -> Response {
    let policy: Policy = match serde_json::from_slice(&body) {
        Ok(policy) => policy,
        Err(_) => {
            return error_response(StatusCode::BAD_REQUEST, ERROR_BAD_JSON, "Bad body payload");
        }
    };

    match state.policy_store.set(policy) {
        Ok(()) => {
            info!("admin API: policy pushed");
            json_response(StatusCode::OK, &serde_json::json!({}))
        }
        Err(e) => error_response(
            StatusCode::OK,
            ERROR_UNKNOWN,
            &format!("Failed to set policy: {e}"),
        ),
    }
}

/// `POST /_matrix/corporal/policy/provider/reload`
pub async fn reload_provider(State(state): State<Arc<AdminState>>) -> Response {
    let provider = Arc::clone(&state.policy_provider);
    // The reload happens in the background; the caller only triggers it.
    tokio::spawn(async move {
        provider.reload().await;
    });

    json_response(StatusCode::OK, &serde_json::json!({}))
}
