//! The catch-all: every non-enumerated path still runs hooks and proxies.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request};
use axum::response::Response;
use tracing::debug;

use warden_hook::EventType;

use crate::responses;
use crate::routes::{read_body, run_hooks};
use crate::state::{extract_access_token, hook_request_from_parts, GatewayState};

/// Handles everything the enumerated routes did not claim.
///
/// Authentication here is best-effort: a token that does not resolve simply
/// leaves the request unauthenticated (hooks still want to know who the user
/// is when that is knowable). `OPTIONS` short-circuits with the canonical
/// CORS answer -- every Matrix server replies identically, so proxying would
/// be wasted work.
pub async fn catchall_handler(
    State(state): State<Arc<GatewayState>>,
    request: Request<Body>,
) -> Response {
    if request.method() == Method::OPTIONS {
        debug!("catch-all: replying to OPTIONS");
        return responses::options_preflight();
    }

    // When no hook matches this request, the body can stream straight
    // through without buffering (media uploads can be large).
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = request.headers().clone();

    let access_token = extract_access_token(&headers, &uri);
    let mut authenticated_user_id = None;
    if let Some(token) = &access_token {
        if let Ok(user_id) = state.resolver.resolve_by_access_token(token).await {
            authenticated_user_id = Some(user_id);
        }
    }
    let is_authenticated = authenticated_user_id.is_some();

    let event_types = ordered_event_types(is_authenticated);

    let policy = state.policy_store.get();
    let any_hook_matches = policy.as_ref().is_some_and(|policy| {
        policy.hooks.iter().any(|hook| {
            hook.event_type
                .is_some_and(|event_type| event_types.contains(&event_type))
                && hook
                    .matches_request(
                        method.as_str(),
                        uri.path(),
                        authenticated_user_id.as_deref(),
                    )
                    .unwrap_or(true)
        })
    });

    if policy.is_some() && !any_hook_matches {
        debug!(uri = %uri, "catch-all: proxying (streaming)");
        return state
            .proxy
            .proxy_streaming(&method, &uri, &headers, request.into_body())
            .await;
    }

    // Hooks are (or may be) in play: buffer the body and run the chains.
    let (parts, body) = match read_body(request).await {
        Ok(read) => read,
        Err(response) => return response,
    };

    let mut hook_request = hook_request_from_parts(&parts.method, &parts.uri, &parts.headers, body);
    hook_request.authenticated_user_id = authenticated_user_id;

    let mut modifiers = Vec::new();
    for event_type in event_types {
        if let Err(response) =
            run_hooks(&state, event_type, &mut hook_request, &mut modifiers).await
        {
            return response;
        }
    }

    state
        .proxy
        .proxy(&hook_request, modifiers, &state.hook_executor)
        .await
}

/// Before hooks first, then after hooks; the authenticated and
/// unauthenticated variants never run for the same request.
fn ordered_event_types(is_authenticated: bool) -> [EventType; 4] {
    if is_authenticated {
        [
            EventType::BeforeAnyRequest,
            EventType::BeforeAuthenticatedRequest,
            EventType::AfterAnyRequest,
            EventType::AfterAuthenticatedRequest,
        ]
    } else {
        [
            EventType::BeforeAnyRequest,
            EventType::BeforeUnauthenticatedRequest,
            EventType::AfterAnyRequest,
            EventType::AfterUnauthenticatedRequest,
        ]
    }
}
