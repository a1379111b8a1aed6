//! The internal check-credentials endpoint.
//!
//! A cooperating homeserver can delegate password checking back to us (the
//! same protocol as REST-auth password providers). The endpoint applies the
//! same policy logic as the login interceptor, and is fenced off by an IP
//! allow-list because it would otherwise be a password-probing oracle.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use ipnet::IpNet;
use tracing::{debug, info, warn};

use warden_core::constants::{ERROR_BAD_JSON, ERROR_FORBIDDEN, ERROR_UNKNOWN};
use warden_core::{determine_full_user_id, is_full_user_id_of_domain};
use warden_userauth::{AuthType, RestAuthRequest, RestAuthResponse};

use crate::responses;
use crate::state::GatewayState;

/// Where the internal auth endpoint accepts requests from.
#[derive(Debug, Clone)]
pub struct InternalAuthSettings {
    pub enabled: bool,
    /// `None` means any source is allowed (an explicitly-configured empty
    /// list). The default covers loopback, RFC1918, link-local and ULA.
    pub allowed_networks: Option<Vec<IpNet>>,
}

impl InternalAuthSettings {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            allowed_networks: None,
        }
    }

    /// Enabled, with the default local/private-network allow-list.
    #[must_use]
    pub fn enabled_with_default_allowlist() -> Self {
        Self {
            enabled: true,
            allowed_networks: Some(default_allowlist()),
        }
    }

    /// Enabled with explicit CIDRs. An empty list allows everything.
    pub fn enabled_with_cidrs(cidrs: &[String]) -> Result<Self, String> {
        if cidrs.is_empty() {
            return Ok(Self {
                enabled: true,
                allowed_networks: None,
            });
        }

        let mut networks = Vec::with_capacity(cidrs.len());
        for cidr in cidrs {
            networks.push(
                cidr.parse::<IpNet>()
                    .map_err(|e| format!("failed parsing `{cidr}`: {e}"))?,
            );
        }
        Ok(Self {
            enabled: true,
            allowed_networks: Some(networks),
        })
    }

    fn allows(&self, ip: IpAddr) -> bool {
        let Some(networks) = &self.allowed_networks else {
            return true;
        };

        if ip.is_loopback() {
            return true;
        }

        networks.iter().any(|network| network.contains(&ip))
    }
}

fn default_allowlist() -> Vec<IpNet> {
    [
        "127.0.0.0/8",    // IPv4 loopback
        "10.0.0.0/8",     // RFC1918
        "172.16.0.0/12",  // RFC1918
        "192.168.0.0/16", // RFC1918
        "169.254.0.0/16", // link-local
        "::1/128",        // IPv6 loopback
        "fe80::/10",      // IPv6 link-local
        "fc00::/7",       // IPv6 unique local
    ]
    .iter()
    .map(|cidr| cidr.parse().expect("static CIDR list parses"))
    .collect()
}

/// `POST /_matrix/corporal/_matrix-internal/identity/v1/check_credentials`
pub async fn check_credentials(
    State(state): State<Arc<GatewayState>>,
    request: Request<Body>,
) -> Response {
    if !state.internal_auth.enabled {
        return responses::matrix_error(
            StatusCode::FORBIDDEN,
            ERROR_FORBIDDEN,
            "Internal REST auth is not enabled",
        );
    }

    // Requests without a peer address (local test transports) count as local.
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|connect_info| connect_info.0);
    if let Some(peer) = peer {
        if !state.internal_auth.allows(peer.ip()) {
            debug!(peer = %peer, "internal auth: source address not allowed");
            return responses::matrix_error(
                StatusCode::FORBIDDEN,
                ERROR_FORBIDDEN,
                "Refusing to authenticate this HTTP request (bad source IP)",
            );
        }
    }

    let Ok(body) = axum::body::to_bytes(request.into_body(), 64 * 1024).await else {
        return responses::matrix_error(StatusCode::BAD_REQUEST, ERROR_BAD_JSON, "Bad request payload");
    };

    let Ok(payload) = serde_json::from_slice::<RestAuthRequest>(&body) else {
        return responses::matrix_error(StatusCode::BAD_REQUEST, ERROR_BAD_JSON, "Bad request payload");
    };

    let Some(policy) = state.policy_store.get() else {
        return responses::matrix_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            ERROR_UNKNOWN,
            "Missing policy",
        );
    };

    info!(user_id = %payload.user.id, "internal REST authentication");

    let Ok(user_id_full) =
        determine_full_user_id(&payload.user.id, &state.homeserver_domain_name)
    else {
        debug!("internal auth: cannot construct user id");
        return responses::json(StatusCode::OK, &RestAuthResponse::failure());
    };

    if !is_full_user_id_of_domain(user_id_full.as_str(), &state.homeserver_domain_name) {
        debug!(user_id = %user_id_full, "internal auth: refusing foreign users");
        return responses::json(StatusCode::OK, &RestAuthResponse::failure());
    }

    let Some(user_policy) = policy.user_policy(user_id_full.as_str()) else {
        debug!(user_id = %user_id_full, "internal auth: refusing non-managed user");
        return responses::json(StatusCode::OK, &RestAuthResponse::failure());
    };

    if !user_policy.active {
        debug!(user_id = %user_id_full, "internal auth: refusing deactivated user");
        return responses::json(StatusCode::OK, &RestAuthResponse::failure());
    }

    if user_policy.auth_type == AuthType::Passthrough {
        // Passthrough credentials live on the homeserver. It asking *us* to
        // verify them would go in circles; refuse.
        debug!(user_id = %user_id_full, "internal auth: refusing passthrough user");
        return responses::json(StatusCode::OK, &RestAuthResponse::failure());
    }

    let is_authenticated = match state
        .user_auth_checker
        .check(
            user_id_full.as_str(),
            &payload.user.password,
            user_policy.auth_type,
            &user_policy.auth_credential,
        )
        .await
    {
        Ok(is_authenticated) => is_authenticated,
        Err(e) => {
            warn!(user_id = %user_id_full, error = %e, "internal auth: authenticator error");
            return responses::matrix_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                ERROR_UNKNOWN,
                "Internal authenticator error",
            );
        }
    };

    if !is_authenticated {
        debug!(user_id = %user_id_full, "internal auth: authentication failed");
        return responses::json(StatusCode::OK, &RestAuthResponse::failure());
    }

    responses::json(
        StatusCode::OK,
        &RestAuthResponse::success(user_id_full.as_str(), &user_policy.display_name),
    )
}
