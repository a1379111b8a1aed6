//! Admin endpoints for minting and destroying user access tokens.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use warden_core::constants::{ERROR_INVALID_USERNAME, ERROR_UNKNOWN};
use warden_core::{is_full_user_id_of_domain, DeviceId, UserId};

use super::{error_response, json_response, AdminState};

#[derive(Debug, Deserialize)]
pub struct ObtainAccessTokenRequest {
    #[serde(rename = "deviceId")]
    pub device_id: String,

    /// 0 means the token should not expire.
    #[serde(rename = "validitySeconds", default)]
    pub validity_seconds: i64,
}

#[derive(Debug, Serialize)]
struct ObtainAccessTokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseAccessTokenRequest {
    #[serde(rename = "accessToken")]
    pub access_token: String,
}

/// `POST /_matrix/corporal/user/{userId}/access-token/new`
pub async fn obtain_access_token(
    State(state): State<Arc<AdminState>>,
    Path(user_id): Path<String>,
    Json(payload): Json<ObtainAccessTokenRequest>,
) -> Response {
    if !is_full_user_id_of_domain(&user_id, &state.homeserver_domain_name) {
        return error_response(
            StatusCode::BAD_REQUEST,
            ERROR_INVALID_USERNAME,
            &format!(
                "Bad user id ({user_id}) - not part of the homeserver domain ({})",
                state.homeserver_domain_name
            ),
        );
    }

    let valid_until = if payload.validity_seconds == 0 {
        None
    } else {
        Some(Utc::now() + Duration::seconds(payload.validity_seconds))
    };

    match state
        .connector
        .obtain_new_access_token_for_user_id(
            &UserId::new(&user_id),
            &DeviceId::new(&payload.device_id),
            valid_until,
        )
        .await
    {
        Ok(access_token) => {
            info!(user_id, device_id = payload.device_id, "admin API: minted access token");
            json_response(StatusCode::OK, &ObtainAccessTokenResponse { access_token })
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ERROR_UNKNOWN,
            &format!("Failed to obtain access token: {e}"),
        ),
    }
}

/// `DELETE /_matrix/corporal/user/{userId}/access-token`
pub async fn release_access_token(
    State(state): State<Arc<AdminState>>,
    Path(user_id): Path<String>,
    Json(payload): Json<ReleaseAccessTokenRequest>,
) -> Response {
    if !is_full_user_id_of_domain(&user_id, &state.homeserver_domain_name) {
        return error_response(
            StatusCode::BAD_REQUEST,
            ERROR_INVALID_USERNAME,
            &format!(
                "Bad user id ({user_id}) - not part of the homeserver domain ({})",
                state.homeserver_domain_name
            ),
        );
    }

    match state
        .connector
        .destroy_access_token(&UserId::new(&user_id), &payload.access_token)
        .await
    {
        Ok(()) => {
            info!(user_id, "admin API: destroyed access token");
            json_response(StatusCode::OK, &serde_json::json!({}))
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ERROR_UNKNOWN,
            &format!("Failed to destroy access token: {e}"),
        ),
    }
}
