//! Gateway pipeline tests against a fake upstream homeserver.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

use warden_core::SharedSecretAuthPasswordGenerator;
use warden_gateway::{
    build_router, GatewayState, InternalAuthSettings, UpstreamProxy, UserMappingResolver,
};
use warden_hook::{Executor, RestConsultant};
use warden_policy::{AuthType, Policy, PolicyStore, UserPolicy, Validator};
use warden_userauth::Checker as UserAuthChecker;

const SHARED_SECRET: &str = "auth-shared-secret";

/// One request the fake upstream saw.
#[derive(Debug, Clone)]
struct RecordedRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

#[derive(Default)]
struct UpstreamLog {
    requests: Mutex<Vec<RecordedRequest>>,
}

impl UpstreamLog {
    fn record(&self, method: &Method, uri: &Uri, body: &[u8]) {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: method.to_string(),
            path: uri.path().to_owned(),
            body: body.to_vec(),
        });
    }

    fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// A minimal homeserver: answers who-am-i for `tok-<localpart>` tokens,
/// 200 `{"a":0}` everywhere else, recording everything it sees.
async fn fake_upstream() -> (String, Arc<UpstreamLog>) {
    let _ = tracing_subscriber::fmt::try_init();
    let log = Arc::new(UpstreamLog::default());

    async fn whoami(headers: HeaderMap) -> axum::response::Response {
        let token = headers
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .unwrap_or_default();

        match token.strip_prefix("tok-") {
            Some(localpart) => axum::Json(
                serde_json::json!({"user_id": format!("@{localpart}:example.com")}),
            )
            .into_response(),
            None => (
                StatusCode::UNAUTHORIZED,
                axum::Json(serde_json::json!({
                    "errcode": "M_UNKNOWN_TOKEN",
                    "error": "Unrecognised access token"
                })),
            )
                .into_response(),
        }
    }

    async fn record_and_answer(
        State(log): State<Arc<UpstreamLog>>,
        method: Method,
        uri: Uri,
        _headers: HeaderMap,
        body: Bytes,
    ) -> axum::response::Response {
        log.record(&method, &uri, &body);
        axum::Json(serde_json::json!({"a": 0})).into_response()
    }

    let router = Router::new()
        .route("/_matrix/client/r0/account/whoami", get(whoami))
        .fallback(record_and_answer)
        .with_state(Arc::clone(&log));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{address}"), log)
}

fn base_policy() -> Policy {
    serde_json::from_value(serde_json::json!({
        "schemaVersion": 1,
        "flags": {},
        "managedRoomIds": [],
        "users": [],
        "hooks": []
    }))
    .unwrap()
}

fn managed_user(id: &str, auth_type: &str, credential: &str) -> UserPolicy {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "active": true,
        "authType": auth_type,
        "authCredential": credential
    }))
    .unwrap()
}

async fn gateway_with_policy(upstream: &str, policy: Policy) -> axum_test::TestServer {
    let store = Arc::new(PolicyStore::new(Validator::new("example.com")));
    store.set(policy).unwrap();

    let state = Arc::new(GatewayState::new(
        store,
        Arc::new(Executor::new(RestConsultant::new(Duration::from_secs(5)))),
        Arc::new(UserAuthChecker::with_standard_authenticators(16)),
        Arc::new(SharedSecretAuthPasswordGenerator::new(SHARED_SECRET)),
        Arc::new(UserMappingResolver::new(
            upstream,
            128,
            Duration::from_secs(60),
        )),
        Arc::new(UpstreamProxy::new(upstream, Duration::from_secs(5))),
        "example.com",
        InternalAuthSettings::enabled_with_default_allowlist(),
    ));

    axum_test::TestServer::new(build_router(state)).unwrap()
}

#[tokio::test]
async fn banner_answers_without_proxying() {
    let (upstream, log) = fake_upstream().await;
    let server = gateway_with_policy(&upstream, base_policy()).await;

    let response = server.get("/_matrix/client/corporal").await;
    response.assert_status_ok();
    assert!(response.text().contains("warden"));
    assert!(log.recorded().is_empty());
}

#[tokio::test]
async fn unknown_api_versions_are_rejected() {
    let (upstream, log) = fake_upstream().await;
    let server = gateway_with_policy(&upstream, base_policy()).await;

    let response = server.get("/_matrix/client/r9/whatever").await;
    response.assert_status(StatusCode::FORBIDDEN);
    let body: serde_json::Value = response.json();
    assert_eq!(body["errcode"], "M_FORBIDDEN");
    assert!(log.recorded().is_empty());

    // v-versions and non-version segments are fine.
    let response = server.get("/_matrix/client/v3/some/path").await;
    response.assert_status_ok();
    let response = server.get("/_matrix/client/unstable/org.example/thing").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn policy_denies_room_creation_without_touching_upstream() {
    let (upstream, log) = fake_upstream().await;
    let mut policy = base_policy();
    policy.flags.forbid_room_creation = true;
    policy.users.push(managed_user("@alice:example.com", "plain", "pw"));
    let server = gateway_with_policy(&upstream, policy).await;

    let response = server
        .post("/_matrix/client/r0/createRoom")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_static("Bearer tok-alice"))
        .json(&serde_json::json!({"name": "A room"}))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    let body: serde_json::Value = response.json();
    assert_eq!(body["errcode"], "M_FORBIDDEN");
    assert_eq!(body["error"], "Denied by policy (cannot create rooms)");

    // who-am-i aside, the upstream never saw the createRoom.
    assert!(log
        .recorded()
        .iter()
        .all(|request| request.path != "/_matrix/client/r0/createRoom"));
}

#[tokio::test]
async fn missing_token_on_policy_checked_route_is_401() {
    let (upstream, _log) = fake_upstream().await;
    let server = gateway_with_policy(&upstream, base_policy()).await;

    let response = server
        .post("/_matrix/client/r0/createRoom")
        .json(&serde_json::json!({}))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["errcode"], "M_MISSING_TOKEN");
}

#[tokio::test]
async fn unresolvable_token_is_403() {
    let (upstream, _log) = fake_upstream().await;
    let server = gateway_with_policy(&upstream, base_policy()).await;

    let response = server
        .post("/_matrix/client/r0/createRoom")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_static("Bearer bogus"))
        .json(&serde_json::json!({}))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    let body: serde_json::Value = response.json();
    assert_eq!(body["errcode"], "M_UNKNOWN_TOKEN");
}

#[tokio::test]
async fn login_rewrites_the_password_for_managed_users() {
    let (upstream, log) = fake_upstream().await;

    let credential = hex::encode(Sha256::digest(b"s3cret"));
    let mut policy = base_policy();
    policy
        .users
        .push(managed_user("@carol:example.com", "sha256", &credential));
    let server = gateway_with_policy(&upstream, policy).await;

    let response = server
        .post("/_matrix/client/r0/login")
        .json(&serde_json::json!({
            "type": "m.login.password",
            "identifier": {"type": "m.id.user", "user": "carol"},
            "password": "s3cret"
        }))
        .await;
    response.assert_status_ok();

    let login_request = log
        .recorded()
        .into_iter()
        .find(|request| request.path == "/_matrix/client/r0/login")
        .expect("login must reach the upstream");

    let forwarded: serde_json::Value = serde_json::from_slice(&login_request.body).unwrap();

    // The password was swapped for the shared-secret-derived one.
    let mut mac = Hmac::<Sha512>::new_from_slice(SHARED_SECRET.as_bytes()).unwrap();
    mac.update(b"@carol:example.com");
    let expected_password = hex::encode(mac.finalize().into_bytes());

    assert_eq!(forwarded["password"], expected_password.as_str());
    assert_eq!(forwarded["user"], "@carol:example.com");
    assert_eq!(forwarded["identifier"]["user"], "carol");
}

#[tokio::test]
async fn login_with_a_wrong_password_is_denied() {
    let (upstream, log) = fake_upstream().await;

    let credential = hex::encode(Sha256::digest(b"s3cret"));
    let mut policy = base_policy();
    policy
        .users
        .push(managed_user("@carol:example.com", "sha256", &credential));
    let server = gateway_with_policy(&upstream, policy).await;

    let response = server
        .post("/_matrix/client/r0/login")
        .json(&serde_json::json!({
            "type": "m.login.password",
            "identifier": {"type": "m.id.user", "user": "carol"},
            "password": "wrong"
        }))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    let body: serde_json::Value = response.json();
    assert_eq!(body["errcode"], "M_FORBIDDEN");
    assert!(log.recorded().is_empty(), "no upstream call on failed login");
}

#[tokio::test]
async fn login_for_unmanaged_users_passes_through_untouched() {
    let (upstream, log) = fake_upstream().await;
    let server = gateway_with_policy(&upstream, base_policy()).await;

    let request_body = serde_json::json!({
        "type": "m.login.password",
        "identifier": {"type": "m.id.user", "user": "stranger"},
        "password": "whatever"
    });
    let response = server
        .post("/_matrix/client/r0/login")
        .json(&request_body)
        .await;
    response.assert_status_ok();

    let forwarded = &log.recorded()[0];
    let forwarded_body: serde_json::Value = serde_json::from_slice(&forwarded.body).unwrap();
    assert_eq!(forwarded_body["password"], "whatever");
}

#[tokio::test]
async fn deactivated_managed_user_cannot_log_in() {
    let (upstream, _log) = fake_upstream().await;

    let mut user = managed_user("@carol:example.com", "plain", "pw");
    user.active = false;
    let mut policy = base_policy();
    policy.users.push(user);
    let server = gateway_with_policy(&upstream, policy).await;

    let response = server
        .post("/_matrix/client/r0/login")
        .json(&serde_json::json!({
            "type": "m.login.password",
            "identifier": {"type": "m.id.user", "user": "carol"},
            "password": "pw"
        }))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    let body: serde_json::Value = response.json();
    assert_eq!(body["errcode"], "M_USER_DEACTIVATED");
}

#[tokio::test]
async fn after_hooks_inject_into_the_upstream_response_in_order() {
    let (upstream, _log) = fake_upstream().await;

    let mut policy = base_policy();
    policy.hooks = serde_json::from_value(serde_json::json!([
        {
            "id": "inject-x",
            "eventType": "afterAnyRequest",
            "action": "pass.modifiedResponse",
            "matchRules": [{"type": "route", "regex": "^/some/"}],
            "injectJSONIntoResponse": {"x": 1}
        },
        {
            "id": "inject-y",
            "eventType": "afterAnyRequest",
            "action": "pass.modifiedResponse",
            "matchRules": [{"type": "route", "regex": "^/some/"}],
            "injectJSONIntoResponse": {"y": 2}
        }
    ]))
    .unwrap();
    let server = gateway_with_policy(&upstream, policy).await;

    let response = server.get("/some/path").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["a"], 0, "upstream payload survives");
    assert_eq!(body["x"], 1);
    assert_eq!(body["y"], 2);
}

#[tokio::test]
async fn before_hook_rejection_short_circuits() {
    let (upstream, log) = fake_upstream().await;

    let mut policy = base_policy();
    policy.hooks = serde_json::from_value(serde_json::json!([
        {
            "id": "block-sync",
            "eventType": "beforeAnyRequest",
            "action": "reject",
            "matchRules": [{"type": "route", "regex": "/blocked$"}],
            "rejectionErrorCode": "M_FORBIDDEN",
            "rejectionErrorMessage": "blocked by hook"
        }
    ]))
    .unwrap();
    let server = gateway_with_policy(&upstream, policy).await;

    let response = server.get("/path/blocked").await;
    response.assert_status(StatusCode::FORBIDDEN);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "blocked by hook");
    assert!(log.recorded().is_empty());
}

#[tokio::test]
async fn consult_contingency_rejection_reaches_the_client() {
    let (upstream, log) = fake_upstream().await;

    let mut policy = base_policy();
    policy.hooks = serde_json::from_value(serde_json::json!([
        {
            "id": "consult-down",
            "eventType": "beforeAnyRequest",
            "action": "consult.RESTServiceURL",
            "matchRules": [{"type": "route", "regex": "/guarded$"}],
            "RESTServiceURL": "http://192.0.2.1:9/decide",
            "RESTServiceRequestTimeoutMilliseconds": 200,
            "RESTServiceContingencyHook": {
                "action": "reject",
                "rejectionErrorCode": "M_FORBIDDEN",
                "rejectionErrorMessage": "blocked"
            }
        }
    ]))
    .unwrap();
    let server = gateway_with_policy(&upstream, policy).await;

    let response = server.get("/path/guarded").await;
    response.assert_status(StatusCode::FORBIDDEN);
    let body: serde_json::Value = response.json();
    assert_eq!(body["errcode"], "M_FORBIDDEN");
    assert_eq!(body["error"], "blocked");
    assert!(log.recorded().is_empty());
}

#[tokio::test]
async fn options_preflight_is_answered_locally() {
    let (upstream, log) = fake_upstream().await;
    let server = gateway_with_policy(&upstream, base_policy()).await;

    let response = server
        .method(Method::OPTIONS, "/_matrix/client/r0/anything")
        .await;
    response.assert_status_ok();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
    assert!(log.recorded().is_empty());
}

#[tokio::test]
async fn internal_auth_checks_credentials_against_the_policy() {
    let (upstream, _log) = fake_upstream().await;

    let credential = hex::encode(Sha256::digest(b"s3cret"));
    let mut policy = base_policy();
    let mut carol = managed_user("@carol:example.com", "sha256", &credential);
    carol.display_name = "Carol".to_owned();
    policy.users.push(carol);
    let server = gateway_with_policy(&upstream, policy).await;

    let response = server
        .post("/_matrix/corporal/_matrix-internal/identity/v1/check_credentials")
        .json(&serde_json::json!({"user": {"id": "carol", "password": "s3cret"}}))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["auth"]["success"], true);
    assert_eq!(body["auth"]["mxid"], "@carol:example.com");
    assert_eq!(body["auth"]["profile"]["display_name"], "Carol");

    let response = server
        .post("/_matrix/corporal/_matrix-internal/identity/v1/check_credentials")
        .json(&serde_json::json!({"user": {"id": "carol", "password": "wrong"}}))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["auth"]["success"], false);
}

#[tokio::test]
async fn leave_of_a_mandated_room_is_denied_for_managed_users() {
    let (upstream, _log) = fake_upstream().await;

    let mut policy = base_policy();
    policy.managed_room_ids = vec![warden_core::RoomId::new("!r1:example.com")];
    let mut alice = managed_user("@alice:example.com", "plain", "pw");
    alice.joined_room_ids = vec![warden_core::RoomId::new("!r1:example.com")];
    policy.users.push(alice);
    let server = gateway_with_policy(&upstream, policy).await;

    let response = server
        .post("/_matrix/client/r0/rooms/!r1:example.com/leave")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_static("Bearer tok-alice"))
        .json(&serde_json::json!({}))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    // A room outside the mandate is leavable; the request reaches upstream.
    let response = server
        .post("/_matrix/client/r0/rooms/!other:example.com/leave")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_static("Bearer tok-alice"))
        .json(&serde_json::json!({}))
        .await;
    response.assert_status_ok();
}
