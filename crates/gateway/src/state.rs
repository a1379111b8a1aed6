//! Shared gateway state, threaded through every handler.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Uri};

use warden_core::SharedSecretAuthPasswordGenerator;
use warden_hook::{Executor, HookRequest};
use warden_policy::{Checker, PolicyStore};
use warden_userauth::Checker as UserAuthChecker;

use crate::hook_runner::HookRunner;
use crate::internal_auth::InternalAuthSettings;
use crate::mapping::UserMappingResolver;
use crate::proxy::UpstreamProxy;

/// Everything the gateway's handlers share.
pub struct GatewayState {
    pub policy_store: Arc<PolicyStore>,
    pub policy_checker: Checker,
    pub hook_executor: Arc<Executor>,
    pub hook_runner: HookRunner,
    pub user_auth_checker: Arc<UserAuthChecker>,
    pub password_generator: Arc<SharedSecretAuthPasswordGenerator>,
    pub resolver: Arc<UserMappingResolver>,
    pub proxy: Arc<UpstreamProxy>,
    pub homeserver_domain_name: String,
    pub internal_auth: InternalAuthSettings,
}

impl GatewayState {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        policy_store: Arc<PolicyStore>,
        hook_executor: Arc<Executor>,
        user_auth_checker: Arc<UserAuthChecker>,
        password_generator: Arc<SharedSecretAuthPasswordGenerator>,
        resolver: Arc<UserMappingResolver>,
        proxy: Arc<UpstreamProxy>,
        homeserver_domain_name: impl Into<String>,
        internal_auth: InternalAuthSettings,
    ) -> Self {
        let hook_runner = HookRunner::new(Arc::clone(&policy_store), Arc::clone(&hook_executor));
        Self {
            policy_store,
            policy_checker: Checker::new(),
            hook_executor,
            hook_runner,
            user_auth_checker,
            password_generator,
            resolver,
            proxy,
            homeserver_domain_name: homeserver_domain_name.into(),
            internal_auth,
        }
    }
}

/// Builds the buffered hook-facing request carrier out of axum parts.
///
/// Multi-valued headers collapse into comma-joined single values, which is
/// both what consulted REST services expect and what we forward upstream.
#[must_use]
pub fn hook_request_from_parts(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> HookRequest {
    let mut header_map: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        header_map
            .entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    HookRequest {
        uri: uri.to_string(),
        path: uri.path().to_owned(),
        method: method.as_str().to_owned(),
        headers: header_map,
        body: body.to_vec(),
        authenticated_user_id: None,
    }
}

/// Pulls the access token out of `Authorization: Bearer ...` or the legacy
/// `access_token` query parameter.
#[must_use]
pub fn extract_access_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                if !token.is_empty() {
                    return Some(token.to_owned());
                }
            }
        }
    }

    let query = uri.query()?;
    for pair in query.split('&') {
        if let Some(token) = pair.strip_prefix("access_token=") {
            if !token.is_empty() {
                return Some(token.to_owned());
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    #[test]
    fn bearer_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer tok-1".parse().unwrap());
        let uri: Uri = "/x?access_token=tok-2".parse().unwrap();
        assert_eq!(extract_access_token(&headers, &uri).as_deref(), Some("tok-1"));
    }

    #[test]
    fn query_parameter_fallback() {
        let headers = HeaderMap::new();
        let uri: Uri = "/x?foo=bar&access_token=tok-2".parse().unwrap();
        assert_eq!(extract_access_token(&headers, &uri).as_deref(), Some("tok-2"));
    }

    #[test]
    fn no_token_anywhere() {
        let headers = HeaderMap::new();
        let uri: Uri = "/x".parse().unwrap();
        assert!(extract_access_token(&headers, &uri).is_none());
    }

    #[test]
    fn hook_request_joins_duplicate_headers() {
        let mut headers = HeaderMap::new();
        headers.append("Accept-Encoding", "gzip".parse().unwrap());
        headers.append("Accept-Encoding", "deflate".parse().unwrap());
        let uri: Uri = "/path?q=1".parse().unwrap();
        let request =
            hook_request_from_parts(&Method::POST, &uri, &headers, Bytes::from_static(b"{}"));

        assert_eq!(request.headers["accept-encoding"], "gzip, deflate");
        assert_eq!(request.path, "/path");
        assert_eq!(request.uri, "/path?q=1");
    }
}
