//! The reverse-proxy leg: forwarding a buffered request upstream and
//! shaping the response on its way back.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode};
use tracing::{debug, warn};

use warden_core::constants::ERROR_UNKNOWN;
use warden_hook::{Executor, HookError, HookRequest, ResponseModifier, UpstreamResponse};

use crate::responses;

/// Headers that must not travel between the client and upstream legs.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|hop| name.eq_ignore_ascii_case(hop))
}

/// Forwards requests to the homeserver.
///
/// When no response modifiers are scheduled, the upstream body streams
/// straight through. With modifiers, the response is buffered, run through
/// the modifier chain, and re-emitted.
pub struct UpstreamProxy {
    upstream_base: String,
    client: reqwest::Client,
}

impl UpstreamProxy {
    /// `timeout` bounds the whole upstream exchange for buffered responses;
    /// it is the gateway's own write timeout that bounds streamed ones.
    #[must_use]
    pub fn new(upstream_base: impl Into<String>, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("HTTP client construction cannot fail with these options");

        let upstream_base: String = upstream_base.into();
        Self {
            upstream_base: upstream_base.trim_end_matches('/').to_owned(),
            client,
        }
    }

    /// Proxies `request` upstream, applying `modifiers` to the response.
    ///
    /// Upstream transport failures yield 502. A modifier that finds the
    /// response defying its expectations (JSON injection into a non-object)
    /// also yields 502 instead of silently forwarding.
    pub async fn proxy(
        &self,
        request: &HookRequest,
        modifiers: Vec<ResponseModifier>,
        executor: &Executor,
    ) -> Response<Body> {
        let upstream_response = match self.forward(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(uri = %request.uri, error = %e, "upstream request failed");
                return responses::matrix_error(
                    StatusCode::BAD_GATEWAY,
                    ERROR_UNKNOWN,
                    "Failed proxying to the upstream server",
                );
            }
        };

        if modifiers.is_empty() {
            debug!(uri = %request.uri, "proxying");
            return stream_through(upstream_response);
        }

        debug!(uri = %request.uri, "proxying (with response modification)");

        let mut buffered = match buffer_response(upstream_response).await {
            Ok(buffered) => buffered,
            Err(e) => {
                warn!(uri = %request.uri, error = %e, "failed reading upstream response");
                return responses::matrix_error(
                    StatusCode::BAD_GATEWAY,
                    ERROR_UNKNOWN,
                    "Failed proxying to the upstream server",
                );
            }
        };

        if let Err(e) = executor
            .apply_response_modifiers(modifiers, &mut buffered)
            .await
        {
            warn!(uri = %request.uri, error = %e, "response modification failed");
            return match e {
                HookError::ResponseBodyNotJsonObject(_) => responses::matrix_error(
                    StatusCode::BAD_GATEWAY,
                    ERROR_UNKNOWN,
                    "Upstream response defied response-modification expectations",
                ),
                _ => responses::matrix_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    ERROR_UNKNOWN,
                    "Hook execution failed, cannot proceed",
                ),
            };
        }

        emit_buffered(buffered)
    }

    /// Proxies without buffering either body: the fast path for catch-all
    /// requests that no hook cares about.
    pub async fn proxy_streaming(
        &self,
        method: &axum::http::Method,
        uri: &axum::http::Uri,
        headers: &axum::http::HeaderMap,
        body: Body,
    ) -> Response<Body> {
        let url = format!("{}{}", self.upstream_base, uri);
        let reqwest_method = method
            .as_str()
            .parse::<reqwest::Method>()
            .unwrap_or(reqwest::Method::GET);

        let mut builder = self.client.request(reqwest_method, &url);
        for (name, value) in headers {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_bytes());
        }
        builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));

        match builder.send().await {
            Ok(response) => stream_through(response),
            Err(e) => {
                warn!(uri = %uri, error = %e, "upstream request failed");
                responses::matrix_error(
                    StatusCode::BAD_GATEWAY,
                    ERROR_UNKNOWN,
                    "Failed proxying to the upstream server",
                )
            }
        }
    }

    async fn forward(&self, request: &HookRequest) -> Result<reqwest::Response, reqwest::Error> {
        let url = format!("{}{}", self.upstream_base, request.uri);
        eprintln!("DEBUG url={url:?} headers={:?}", request.headers);
        let method = request
            .method
            .parse::<reqwest::Method>()
            .unwrap_or(reqwest::Method::GET);

        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            if is_hop_by_hop(name) {
                continue;
            }
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        builder.send().await
    }
}

fn stream_through(upstream: reqwest::Response) -> Response<Body> {
    let mut builder = Response::builder().status(upstream.status().as_u16());

    if let Some(headers) = builder.headers_mut() {
        for (name, value) in upstream.headers() {
            // The body streams through unchanged, so content-length stays.
            if is_hop_by_hop(name.as_str()) && name.as_str() != "content-length" {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .unwrap_or_default()
}

async fn buffer_response(upstream: reqwest::Response) -> Result<UpstreamResponse, reqwest::Error> {
    let status = upstream.status().as_u16();

    let mut headers: HashMap<String, String> = HashMap::new();
    for (name, value) in upstream.headers() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        headers
            .entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    let body = upstream.bytes().await?.to_vec();

    Ok(UpstreamResponse {
        status,
        headers,
        body,
    })
}

fn emit_buffered(buffered: UpstreamResponse) -> Response<Body> {
    let mut builder =
        Response::builder().status(StatusCode::from_u16(buffered.status).unwrap_or(StatusCode::OK));

    if let Some(headers) = builder.headers_mut() {
        for (name, value) in &buffered.headers {
            if is_hop_by_hop(name) {
                continue;
            }
            let Ok(name) = name.parse::<HeaderName>() else {
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                continue;
            };
            headers.append(name, value);
        }
    }

    builder.body(Body::from(buffered.body)).unwrap_or_default()
}
