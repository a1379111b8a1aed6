//! Router assembly and serving.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use warden_core::constants::ERROR_FORBIDDEN;

use crate::catchall::catchall_handler;
use crate::internal_auth::check_credentials;
use crate::policycheck;
use crate::responses;
use crate::routes::{login_handler, policy_checked_pipeline, RouteSpec};
use crate::state::GatewayState;

/// Matches the version segment directly under `/_matrix/client/`.
fn version_segment_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^/_matrix/client/((?:r|v)\d+)(?:/|$)").expect("static regex compiles")
    })
}

/// Rejects Client-Server API versions the gateway does not capture.
///
/// Letting requests for unknown versions through would silently bypass all
/// of the enumerated interception, so unknown-but-version-shaped segments
/// get a hard 403. Non-version segments (`unstable`, ...) are not ours to
/// judge and flow to the catch-all.
async fn deny_unsupported_api_versions(request: Request<Body>, next: Next) -> Response {
    if let Some(captures) = version_segment_regex().captures(request.uri().path()) {
        let version = &captures[1];
        let supported = version == "r0" || version.starts_with('v');
        if !supported {
            return responses::matrix_error(
                StatusCode::FORBIDDEN,
                ERROR_FORBIDDEN,
                "API version not supported by gateway",
            );
        }
    }

    next.run(request).await
}

/// Liveness banner; also handy for checking that traffic actually transits
/// the gateway and not the homeserver directly.
async fn banner_handler() -> Response {
    responses::plain_text(StatusCode::OK, "warden is watching over this homeserver\n")
}

macro_rules! policy_checked {
    ($spec:expr) => {{
        let spec: RouteSpec = $spec;
        move |state: axum::extract::State<Arc<GatewayState>>,
              params: axum::extract::Path<HashMap<String, String>>,
              request: Request<Body>| async move {
            policy_checked_pipeline(state.0, spec, params.0, request).await
        }
    }};
}

/// Builds the full gateway router.
#[must_use]
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/_matrix/client/corporal", get(banner_handler))
        .route(
            "/_matrix/corporal/_matrix-internal/identity/v1/check_credentials",
            post(check_credentials),
        )
        // Synapse dislikes trailing-slash logins, but clients have been seen
        // sending them; handle both to be on the safe side.
        .route("/_matrix/client/{version}/login", post(login_handler))
        .route("/_matrix/client/{version}/login/", post(login_handler))
        .route(
            "/_matrix/client/{version}/createRoom",
            post(policy_checked!(RouteSpec {
                name: "room.create",
                check: policycheck::check_room_create,
                allow_unauthenticated: false,
            })),
        )
        .route(
            "/_matrix/client/{version}/rooms/{room_id}/leave",
            post(policy_checked!(RouteSpec {
                name: "room.leave",
                check: policycheck::check_room_leave,
                allow_unauthenticated: false,
            })),
        )
        // Kicking yourself is another way to leave; it gets its own check.
        .route(
            "/_matrix/client/{version}/rooms/{room_id}/kick",
            post(policy_checked!(RouteSpec {
                name: "room.kick",
                check: policycheck::check_room_kick,
                allow_unauthenticated: false,
            })),
        )
        // And so is putting membership=leave into your own member state.
        .route(
            "/_matrix/client/{version}/rooms/{room_id}/state/m.room.member/{member_id}",
            put(policy_checked!(RouteSpec {
                name: "room.member.state.set",
                check: policycheck::check_room_membership_state_change,
                allow_unauthenticated: false,
            })),
        )
        // Enabling encryption later is gated like encrypted-room creation.
        .route(
            "/_matrix/client/{version}/rooms/{room_id}/state/m.room.encryption",
            put(policy_checked!(RouteSpec {
                name: "room.enable_encryption",
                check: policycheck::check_room_encryption_state_change,
                allow_unauthenticated: false,
            })),
        )
        .route(
            "/_matrix/client/{version}/rooms/{room_id}/send/{event_type}/{txn_id}",
            put(policy_checked!(RouteSpec {
                name: "room.send_event",
                check: policycheck::check_room_send_event,
                allow_unauthenticated: false,
            })),
        )
        .route(
            "/_matrix/client/{version}/profile/{target_user_id}/displayname",
            put(policy_checked!(RouteSpec {
                name: "user.set_display_name",
                check: policycheck::check_profile_set_display_name,
                allow_unauthenticated: false,
            })),
        )
        .route(
            "/_matrix/client/{version}/profile/{target_user_id}/avatar_url",
            put(policy_checked!(RouteSpec {
                name: "user.set_avatar",
                check: policycheck::check_profile_set_avatar_url,
                allow_unauthenticated: false,
            })),
        )
        .route(
            "/_matrix/client/{version}/account/deactivate",
            post(policy_checked!(RouteSpec {
                name: "user.deactivate",
                check: policycheck::check_user_deactivate,
                allow_unauthenticated: false,
            })),
        )
        // Serves both authenticated password changes and the token-less
        // forgotten-password flow; the predicate tells them apart.
        .route(
            "/_matrix/client/{version}/account/password",
            post(policy_checked!(RouteSpec {
                name: "user.password",
                check: policycheck::check_user_set_password,
                allow_unauthenticated: true,
            })),
        )
        .fallback(catchall_handler)
        .layer(middleware::from_fn(deny_unsupported_api_versions))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the router until the token is cancelled, then drains in-flight
/// requests.
pub async fn serve(
    listen_address: &str,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_address).await?;
    info!(listen_address, "starting HTTP gateway server");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
}
