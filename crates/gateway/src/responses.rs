//! Response construction helpers.
//!
//! Every response the gateway originates itself (errors, hook answers)
//! carries `Access-Control-Allow-Origin: *`, like the homeserver's own
//! responses do; web clients talk to us exactly as they would to it.

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};

use warden_core::MatrixErrorBody;
use warden_hook::HookResponse;

pub fn matrix_error(status: StatusCode, errcode: &str, message: &str) -> Response<Body> {
    let body = serde_json::to_vec(&MatrixErrorBody::new(errcode, message)).unwrap_or_default();

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from(body))
        .unwrap_or_default()
}

pub fn from_hook_response(hook_response: &HookResponse) -> Response<Body> {
    Response::builder()
        .status(StatusCode::from_u16(hook_response.status).unwrap_or(StatusCode::OK))
        .header(header::CONTENT_TYPE, hook_response.content_type.clone())
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from(hook_response.body.clone()))
        .unwrap_or_default()
}

pub fn plain_text(status: StatusCode, text: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from(text))
        .unwrap_or_default()
}

pub fn json(status: StatusCode, value: &impl serde::Serialize) -> Response<Body> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from(body))
        .unwrap_or_default()
}

/// The canonical answer to CORS preflights, identical on every server.
pub fn options_preflight() -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, HEAD, POST, PUT, DELETE, OPTIONS"),
        )
        .header(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("X-Requested-With, Content-Type, Authorization, Date"),
        )
        .body(Body::empty())
        .unwrap_or_default()
}
