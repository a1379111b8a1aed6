//! The private admin HTTP API.
//!
//! Bearer-token gated (constant-time comparison). Lets an external system
//! read and push policies, poke the provider, and mint or destroy access
//! tokens for managed users.

pub mod policy;
pub mod user;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::Router;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::info;

use warden_connector::MatrixConnector;
use warden_core::constants::{ERROR_MISSING_TOKEN, ERROR_UNKNOWN_TOKEN};
use warden_core::MatrixErrorBody;
use warden_policy::provider::PolicyProvider;
use warden_policy::PolicyStore;

/// Shared state of the admin API handlers.
pub struct AdminState {
    pub policy_store: Arc<PolicyStore>,
    pub policy_provider: Arc<dyn PolicyProvider>,
    pub connector: Arc<dyn MatrixConnector>,
    pub homeserver_domain_name: String,
    pub authorization_bearer_token: String,
}

/// Builds the admin router with its auth middleware.
#[must_use]
pub fn build_router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/_matrix/corporal/policy", get(policy::get_policy))
        .route("/_matrix/corporal/policy", put(policy::put_policy))
        .route(
            "/_matrix/corporal/policy/provider/reload",
            post(policy::reload_provider),
        )
        .route(
            "/_matrix/corporal/user/{user_id}/access-token/new",
            post(user::obtain_access_token),
        )
        .route(
            "/_matrix/corporal/user/{user_id}/access-token",
            delete(user::release_access_token),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            deny_unauthorized_access,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn deny_unauthorized_access(
    State(state): State<Arc<AdminState>>,
    request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default();

    if token.is_empty() {
        info!("admin API: rejecting (missing access token)");
        return error_response(
            StatusCode::UNAUTHORIZED,
            ERROR_MISSING_TOKEN,
            "Missing access token",
        );
    }

    let expected = state.authorization_bearer_token.as_bytes();
    if !bool::from(token.as_bytes().ct_eq(expected)) {
        info!("admin API: rejecting (bad access token)");
        return error_response(
            StatusCode::UNAUTHORIZED,
            ERROR_UNKNOWN_TOKEN,
            "Bad access token",
        );
    }

    next.run(request).await
}

pub(crate) fn error_response(status: StatusCode, errcode: &str, message: &str) -> Response {
    let body = serde_json::to_vec(&MatrixErrorBody::new(errcode, message)).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_default()
}

pub(crate) fn json_response(status: StatusCode, value: &impl serde::Serialize) -> Response {
    let body = serde_json::to_vec(value).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_default()
}
