//! The policy-checked route pipeline and the login handler.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use tracing::{debug, info};

use warden_core::constants::{ERROR_FORBIDDEN, ERROR_MISSING_TOKEN, ERROR_UNKNOWN_TOKEN};
use warden_hook::{EventType, HookRequest, ResponseModifier};

use crate::hook_runner::HookRunOutcome;
use crate::interceptor::{intercept_login, InterceptorOutcome};
use crate::policycheck::{CheckContext, PolicyCheckFn};
use crate::responses;
use crate::state::{extract_access_token, hook_request_from_parts, GatewayState};

/// Policy-checked routes buffer their bodies (small JSON documents); this
/// bounds a hostile payload.
const BODY_BUFFER_LIMIT: usize = 8 * 1024 * 1024;

/// One enumerated, policy-checked endpoint.
#[derive(Clone, Copy)]
pub struct RouteSpec {
    pub name: &'static str,
    pub check: PolicyCheckFn,
    /// Password reset supports a token-less flow; everything else demands a
    /// token.
    pub allow_unauthenticated: bool,
}

pub(crate) async fn read_body(request: Request<Body>) -> Result<(axum::http::request::Parts, Bytes), Response> {
    let (parts, body) = request.into_parts();
    match axum::body::to_bytes(body, BODY_BUFFER_LIMIT).await {
        Ok(bytes) => Ok((parts, bytes)),
        Err(_) => Err(responses::matrix_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "M_TOO_LARGE",
            "Request body too large",
        )),
    }
}

/// Runs one hook event type, converting terminal outcomes into responses.
pub(crate) async fn run_hooks(
    state: &GatewayState,
    event_type: EventType,
    request: &mut HookRequest,
    modifiers: &mut Vec<ResponseModifier>,
) -> Result<(), Response> {
    match state.hook_runner.run_all_matching_type(event_type, request).await {
        HookRunOutcome::Continue(scheduled) => {
            modifiers.extend(scheduled);
            Ok(())
        }
        HookRunOutcome::Terminal(response) => Err(responses::from_hook_response(&response)),
    }
}

/// The full pipeline for an enumerated endpoint: hooks, authentication,
/// policy check, more hooks, reverse proxy.
pub async fn policy_checked_pipeline(
    state: Arc<GatewayState>,
    spec: RouteSpec,
    params: HashMap<String, String>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = match read_body(request).await {
        Ok(read) => read,
        Err(response) => return response,
    };

    let access_token = extract_access_token(&parts.headers, &parts.uri);
    let mut hook_request =
        hook_request_from_parts(&parts.method, &parts.uri, &parts.headers, body);
    let mut modifiers = Vec::new();

    if let Err(response) = run_hooks(
        &state,
        EventType::BeforeAnyRequest,
        &mut hook_request,
        &mut modifiers,
    )
    .await
    {
        return response;
    }

    // Depending on the route, token-less requests may or may not go through.
    let is_authenticated = match &access_token {
        None if spec.allow_unauthenticated => {
            debug!(handler = spec.name, "missing token, allowing request through");
            false
        }
        None => {
            debug!(handler = spec.name, "rejecting (missing access token)");
            return responses::matrix_error(
                StatusCode::UNAUTHORIZED,
                ERROR_MISSING_TOKEN,
                "Missing access token",
            );
        }
        Some(token) => match state.resolver.resolve_by_access_token(token).await {
            Ok(user_id) => {
                hook_request.authenticated_user_id = Some(user_id);
                true
            }
            Err(e) => {
                debug!(handler = spec.name, error = %e, "rejecting (failed to map access token)");
                return responses::matrix_error(
                    StatusCode::FORBIDDEN,
                    ERROR_UNKNOWN_TOKEN,
                    "Failed mapping access token to user id",
                );
            }
        },
    };

    if is_authenticated {
        for event_type in [
            EventType::BeforeAuthenticatedRequest,
            EventType::BeforeAuthenticatedPolicyCheckedRequest,
        ] {
            if let Err(response) =
                run_hooks(&state, event_type, &mut hook_request, &mut modifiers).await
            {
                return response;
            }
        }
    }

    let Some(policy) = state.policy_store.get() else {
        info!(handler = spec.name, "denying (missing policy)");
        return responses::matrix_error(
            StatusCode::FORBIDDEN,
            ERROR_FORBIDDEN,
            "Policy does not exist (yet), so access cannot be allowed",
        );
    };

    let user_id = hook_request
        .authenticated_user_id
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();

    let verdict = (spec.check)(&CheckContext {
        policy: &policy,
        checker: &state.policy_checker,
        user_id: &user_id,
        params: &params,
        body: &hook_request.body,
    });

    if !verdict.allow {
        info!(
            handler = spec.name,
            errcode = %verdict.error_code,
            "denying ({}: {})", verdict.error_code, verdict.error_message
        );
        return responses::matrix_error(
            StatusCode::FORBIDDEN,
            &verdict.error_code,
            &verdict.error_message,
        );
    }

    // After hooks only schedule response modifiers; they cannot terminate
    // the request at this point.
    let mut after_events = vec![EventType::AfterAnyRequest];
    if is_authenticated {
        after_events.push(EventType::AfterAuthenticatedRequest);
        after_events.push(EventType::AfterAuthenticatedPolicyCheckedRequest);
    }
    for event_type in after_events {
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

/// The `/login` special case: hooks, interception, then proxy or deny.
pub async fn login_handler(
    State(state): State<Arc<GatewayState>>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = match read_body(request).await {
        Ok(read) => read,
        Err(response) => return response,
    };

    let mut hook_request =
        hook_request_from_parts(&parts.method, &parts.uri, &parts.headers, body);
    let mut modifiers = Vec::new();

    // Login runs the unauthenticated chains: even a successful login is not
    // an authenticated request in the token sense.
    for event_type in [
        EventType::BeforeAnyRequest,
        EventType::BeforeUnauthenticatedRequest,
        EventType::AfterAnyRequest,
        EventType::AfterUnauthenticatedRequest,
    ] {
        if let Err(response) =
            run_hooks(&state, event_type, &mut hook_request, &mut modifiers).await
        {
            return response;
        }
    }

    match intercept_login(&state, &mut hook_request).await {
        InterceptorOutcome::Deny { errcode, message } => {
            info!(handler = "login", errcode = %errcode, "denying ({errcode}: {message})");
            responses::matrix_error(StatusCode::FORBIDDEN, &errcode, &message)
        }
        InterceptorOutcome::Proxy => {
            state
                .proxy
                .proxy(&hook_request, modifiers, &state.hook_executor)
                .await
        }
    }
}

