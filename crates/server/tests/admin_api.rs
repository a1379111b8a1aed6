//! Admin API tests over an in-memory stack.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};

use warden_connector::{
    AccessTokenContext, Avatar, ConnectorError, CurrentState, MatrixConnector,
};
use warden_core::payloads::ProfileResponse;
use warden_core::{DeviceId, RoomId, UserId};
use warden_policy::provider::PolicyProvider;
use warden_policy::{PolicyError, PolicyStore, Validator};
use warden_server::api::{build_router, AdminState};

const ADMIN_TOKEN: &str = "admin-bearer-token";

/// Only the token operations matter here; the rest is inert.
#[derive(Default)]
struct StubConnector {
    minted: AtomicU32,
    destroyed: Mutex<Vec<String>>,
}

#[async_trait]
impl MatrixConnector for StubConnector {
    async fn obtain_new_access_token_for_user_id(
        &self,
        user_id: &UserId,
        _device_id: &DeviceId,
        _valid_until: Option<DateTime<Utc>>,
    ) -> Result<String, ConnectorError> {
        let n = self.minted.fetch_add(1, Ordering::SeqCst);
        Ok(format!("minted-{}-{n}", user_id.as_str()))
    }

    async fn verify_access_token(
        &self,
        _user_id: &UserId,
        _access_token: &str,
    ) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn destroy_access_token(
        &self,
        _user_id: &UserId,
        access_token: &str,
    ) -> Result<(), ConnectorError> {
        self.destroyed.lock().unwrap().push(access_token.to_owned());
        Ok(())
    }

    async fn logout_all_access_tokens_for_user(
        &self,
        _ctx: &AccessTokenContext,
        _user_id: &UserId,
    ) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn ensure_user_account_exists(
        &self,
        _user_id: &UserId,
        _initial_password: &str,
    ) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn determine_current_state(
        &self,
        _ctx: &AccessTokenContext,
        _managed_user_ids: &[UserId],
        _admin_user_id: &UserId,
    ) -> Result<CurrentState, ConnectorError> {
        Ok(CurrentState::default())
    }

    async fn get_user_profile(
        &self,
        _ctx: &AccessTokenContext,
        _user_id: &UserId,
    ) -> Result<ProfileResponse, ConnectorError> {
        Ok(ProfileResponse::default())
    }

    async fn set_user_display_name(
        &self,
        _ctx: &AccessTokenContext,
        _user_id: &UserId,
        _display_name: &str,
    ) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn set_user_avatar(
        &self,
        _ctx: &AccessTokenContext,
        _user_id: &UserId,
        _avatar: Avatar,
    ) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn invite_user_to_room(
        &self,
        _ctx: &AccessTokenContext,
        _inviter_id: &UserId,
        _invitee_id: &UserId,
        _room_id: &RoomId,
    ) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn join_room(
        &self,
        _ctx: &AccessTokenContext,
        _user_id: &UserId,
        _room_id: &RoomId,
    ) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn leave_room(
        &self,
        _ctx: &AccessTokenContext,
        _user_id: &UserId,
        _room_id: &RoomId,
    ) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn kick_user_from_room(
        &self,
        _ctx: &AccessTokenContext,
        _kicker_user_id: &UserId,
        _kickee_user_id: &UserId,
        _room_id: &RoomId,
    ) -> Result<(), ConnectorError> {
        Ok(())
    }
}

#[derive(Default)]
struct StubProvider {
    reloads: AtomicU32,
}

#[async_trait]
impl PolicyProvider for StubProvider {
    fn provider_type(&self) -> &'static str {
        "stub"
    }

    async fn start(&self) -> Result<(), PolicyError> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    server: axum_test::TestServer,
    connector: Arc<StubConnector>,
    provider: Arc<StubProvider>,
    store: Arc<PolicyStore>,
}

fn harness() -> Harness {
    let store = Arc::new(PolicyStore::new(Validator::new("example.com")));
    let connector = Arc::new(StubConnector::default());
    let provider = Arc::new(StubProvider::default());

    let state = Arc::new(AdminState {
        policy_store: Arc::clone(&store),
        policy_provider: Arc::clone(&provider) as Arc<dyn PolicyProvider>,
        connector: Arc::clone(&connector) as Arc<dyn MatrixConnector>,
        homeserver_domain_name: "example.com".to_owned(),
        authorization_bearer_token: ADMIN_TOKEN.to_owned(),
    });

    Harness {
        server: axum_test::TestServer::new(build_router(state)).unwrap(),
        connector,
        provider,
        store,
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let harness = harness();
    let response = harness.server.get("/_matrix/corporal/policy").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["errcode"], "M_MISSING_TOKEN");
}

#[tokio::test]
async fn wrong_token_is_unauthorized() {
    let harness = harness();
    let response = harness
        .server
        .get("/_matrix/corporal/policy")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_static("Bearer wrong"))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["errcode"], "M_UNKNOWN_TOKEN");
}

#[tokio::test]
async fn policy_roundtrip_through_the_api() {
    let harness = harness();

    // Nothing loaded yet.
    let response = harness
        .server
        .get("/_matrix/corporal/policy")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&bearer(ADMIN_TOKEN)).unwrap())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["policy"].is_null());

    // Push one.
    let policy = serde_json::json!({
        "schemaVersion": 1,
        "identificationStamp": "push-1",
        "users": [],
        "hooks": []
    });
    let response = harness
        .server
        .put("/_matrix/corporal/policy")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&bearer(ADMIN_TOKEN)).unwrap())
        .json(&policy)
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body.get("errcode").is_none(), "push must succeed: {body}");

    // The store took it, and the API mirrors it back.
    assert_eq!(
        harness.store.get().unwrap().identification_stamp.as_deref(),
        Some("push-1")
    );
    let response = harness
        .server
        .get("/_matrix/corporal/policy")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&bearer(ADMIN_TOKEN)).unwrap())
        .await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["policy"]["identificationStamp"], "push-1");
}

#[tokio::test]
async fn invalid_policy_push_reports_the_validation_error() {
    let harness = harness();

    let policy = serde_json::json!({
        "schemaVersion": 99,
        "users": []
    });
    let response = harness
        .server
        .put("/_matrix/corporal/policy")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&bearer(ADMIN_TOKEN)).unwrap())
        .json(&policy)
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["errcode"], "M_UNKNOWN");
    assert!(harness.store.get().is_none());
}

#[tokio::test]
async fn undecodable_policy_push_is_bad_json() {
    let harness = harness();

    let response = harness
        .server
        .put("/_matrix/corporal/policy")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&bearer(ADMIN_TOKEN)).unwrap())
        .text("not json")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["errcode"], "M_BAD_JSON");
}

#[tokio::test]
async fn provider_reload_is_triggered_in_the_background() {
    let harness = harness();

    let response = harness
        .server
        .post("/_matrix/corporal/policy/provider/reload")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&bearer(ADMIN_TOKEN)).unwrap())
        .await;
    response.assert_status_ok();

    for _ in 0..50 {
        if harness.provider.reloads.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(harness.provider.reloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn access_tokens_are_minted_for_managed_domain_users_only() {
    let harness = harness();

    let response = harness
        .server
        .post("/_matrix/corporal/user/@alice:example.com/access-token/new")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&bearer(ADMIN_TOKEN)).unwrap())
        .json(&serde_json::json!({"deviceId": "ops-device", "validitySeconds": 0}))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["accessToken"]
        .as_str()
        .unwrap()
        .starts_with("minted-@alice:example.com"));

    let response = harness
        .server
        .post("/_matrix/corporal/user/@eve:other.org/access-token/new")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&bearer(ADMIN_TOKEN)).unwrap())
        .json(&serde_json::json!({"deviceId": "ops-device", "validitySeconds": 0}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["errcode"], "M_INVALID_USERNAME");
}

#[tokio::test]
async fn access_tokens_are_destroyed_on_request() {
    let harness = harness();

    let response = harness
        .server
        .delete("/_matrix/corporal/user/@alice:example.com/access-token")
        .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&bearer(ADMIN_TOKEN)).unwrap())
        .json(&serde_json::json!({"accessToken": "doomed-token"}))
        .await;
    response.assert_status_ok();

    assert_eq!(
        harness.connector.destroyed.lock().unwrap().as_slice(),
        &["doomed-token".to_owned()]
    );
}
