//! The `/login` interceptor.
//!
//! Managed users authenticate against the policy; on success their login
//! request is rewritten to carry the shared-secret-derived password, which a
//! cooperating homeserver plugin accepts. Unmanaged users (and SSO logins)
//! pass through untouched.

use tracing::{debug, warn};

use warden_core::constants::{
    ERROR_BAD_JSON, ERROR_FORBIDDEN, ERROR_UNKNOWN, ERROR_USER_DEACTIVATED,
    LOGIN_IDENTIFIER_TYPE_PHONE, LOGIN_IDENTIFIER_TYPE_THIRD_PARTY, LOGIN_TYPE_PASSWORD,
    LOGIN_TYPE_TOKEN,
};
use warden_core::payloads::LoginRequest;
use warden_core::{determine_full_user_id, is_full_user_id_of_domain};
use warden_hook::HookRequest;
use warden_userauth::AuthType;

use crate::state::GatewayState;

/// What the interceptor decided about the login request.
pub enum InterceptorOutcome {
    /// Forward the (possibly rewritten) request upstream.
    Proxy,
    /// Answer 403 with this Matrix error.
    Deny { errcode: String, message: String },
}

fn deny(errcode: &str, message: impl Into<String>) -> InterceptorOutcome {
    InterceptorOutcome::Deny {
        errcode: errcode.to_owned(),
        message: message.into(),
    }
}

pub async fn intercept_login(
    state: &GatewayState,
    request: &mut HookRequest,
) -> InterceptorOutcome {
    let Ok(mut payload) = serde_json::from_slice::<LoginRequest>(&request.body) else {
        return deny(ERROR_BAD_JSON, "Bad input");
    };

    if payload.login_type == LOGIN_TYPE_TOKEN {
        // SSO token login (CAS/SAML); interfering would break the flow.
        return InterceptorOutcome::Proxy;
    }

    if payload.login_type != LOGIN_TYPE_PASSWORD {
        // Some unrecognized login flow. Block it to be on the safe side.
        return deny(
            ERROR_FORBIDDEN,
            format!("Denying login type: {}", payload.login_type),
        );
    }

    let Some(policy) = state.policy_store.get() else {
        return deny(ERROR_UNKNOWN, "Missing policy");
    };

    if payload.identifier.identifier_type == LOGIN_IDENTIFIER_TYPE_THIRD_PARTY
        || payload.identifier.identifier_type == LOGIN_IDENTIFIER_TYPE_PHONE
    {
        // 3pid login has security implications; it only passes when the
        // policy explicitly enables it.
        if policy.flags.allow_3pid_login {
            return InterceptorOutcome::Proxy;
        }
        return deny(
            ERROR_UNKNOWN,
            "3pid login requests are not allowed on this server",
        );
    }

    let user_id = if payload.identifier.user.is_empty() {
        // Old deprecated top-level field.
        payload.user.clone()
    } else {
        payload.identifier.user.clone()
    };

    let Ok(user_id_full) = determine_full_user_id(&user_id, &state.homeserver_domain_name) else {
        return deny(ERROR_FORBIDDEN, "Cannot interpret user id");
    };

    if !is_full_user_id_of_domain(user_id_full.as_str(), &state.homeserver_domain_name) {
        return deny(ERROR_FORBIDDEN, "Rejecting non-own domains");
    }

    let Some(user_policy) = policy.user_policy(user_id_full.as_str()) else {
        // Not a user we manage; the homeserver's own policies apply.
        return InterceptorOutcome::Proxy;
    };

    if !user_policy.active {
        return deny(ERROR_USER_DEACTIVATED, "Deactivated in policy");
    }

    if user_policy.auth_type == AuthType::Passthrough {
        // Authentication for passthrough users always happens upstream.
        return InterceptorOutcome::Proxy;
    }

    let is_authenticated = match state
        .user_auth_checker
        .check(
            user_id_full.as_str(),
            &payload.password,
            user_policy.auth_type,
            &user_policy.auth_credential,
        )
        .await
    {
        Ok(is_authenticated) => is_authenticated,
        Err(e) => {
            warn!(user_id = %user_id_full, error = %e, "authenticator error during login");
            return deny(ERROR_UNKNOWN, "Internal authenticator error");
        }
    };

    if !is_authenticated {
        return deny(ERROR_FORBIDDEN, "Failed authentication");
    }

    debug!(user_id = %user_id_full, auth_type = %user_policy.auth_type, "login authenticated, rewriting credentials");

    // Rewrite the password to the shared-secret-derived one; the upstream's
    // auth plugin recognises it and grants the login. Also normalize to the
    // full user id while we are at it.
    payload.user = user_id_full.to_string();
    payload.password = state
        .password_generator
        .generate_for_user_id(user_id_full.as_str());

    match serde_json::to_vec(&payload) {
        Ok(body) => {
            request.set_body(body);
            InterceptorOutcome::Proxy
        }
        Err(_) => deny(ERROR_UNKNOWN, "Internal error"),
    }
}
