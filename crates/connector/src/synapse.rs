//! The Synapse-specific connector: admin registration, admin token minting
//! and whole-server user listing.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde_json::Value;
use sha1::Sha1;
use tracing::debug;

use warden_core::constants::{ERROR_USER_IN_USE, REGISTRATION_TYPE_SHARED_SECRET};
use warden_core::payloads::{
    AdminUserLoginResponse, AdminUsersResponse, ProfileResponse, RegisterNonceResponse,
    RegisterRequest, RegisterResponse,
};
use warden_core::{user_id_local_part, DeviceId, RoomId, UserId};

use crate::api::{escape, ApiConnector};
use crate::avatar::Avatar;
use crate::connector::MatrixConnector;
use crate::error::ConnectorError;
use crate::retry::with_rate_limit_retries;
use crate::state::{CurrentState, CurrentUserState};
use crate::token_context::AccessTokenContext;

type HmacSha1 = Hmac<Sha1>;

const DEVICE_ID_INTERNAL: &str = "warden";

/// Connector for a Synapse homeserver.
///
/// Built on the generic [`ApiConnector`] for everything the Client-Server
/// API can express, plus the Synapse admin APIs for the rest. Token
/// acquisition goes through the admin login API (no visible client devices
/// get created), powered by a dedicated, never-expiring token context for
/// the internal reconciliator user.
pub struct SynapseConnector {
    api: Arc<ApiConnector>,

    registration_shared_secret: String,
    reconciliator_user_id: UserId,

    /// Tokens for the reconciliator user only. Deliberately driven by the
    /// plain [`ApiConnector`]: the admin login API cannot log in as self.
    reconciliator_token_context: AccessTokenContext,
    reconciliator_token_lock: tokio::sync::Mutex<()>,
}

impl SynapseConnector {
    #[must_use]
    pub fn new(
        api: Arc<ApiConnector>,
        registration_shared_secret: impl Into<String>,
        reconciliator_user_id: UserId,
    ) -> Self {
        let reconciliator_token_context = AccessTokenContext::new(
            Arc::clone(&api) as Arc<dyn MatrixConnector>,
            DeviceId::new(DEVICE_ID_INTERNAL),
            // Never expires; released manually from `release()`.
            None,
        );

        Self {
            api,
            registration_shared_secret: registration_shared_secret.into(),
            reconciliator_user_id,
            reconciliator_token_context,
            reconciliator_token_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn reconciliator_access_token(&self) -> Result<String, ConnectorError> {
        let _guard = self.reconciliator_token_lock.lock().await;
        self.reconciliator_token_context
            .get_token(&self.reconciliator_user_id)
            .await
    }
}

/// The MAC scheme of Synapse's shared-secret registration API, as computed
/// by its own `register_new_matrix_user` script.
fn compute_registration_mac(
    registration_shared_secret: &str,
    nonce: &str,
    username: &str,
    password: &str,
) -> String {
    let mut mac = HmacSha1::new_from_slice(registration_shared_secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(nonce.as_bytes());
    mac.update(b"\x00");
    mac.update(username.as_bytes());
    mac.update(b"\x00");
    mac.update(password.as_bytes());
    mac.update(b"\x00");
    mac.update(b"notadmin");
    hex::encode(mac.finalize().into_bytes())
}

#[async_trait]
impl MatrixConnector for SynapseConnector {
    /// Mints a token through `POST /_synapse/admin/v1/users/{id}/login`.
    ///
    /// Unlike password logins, these tokens create no devices: nothing to
    /// federate, nothing polluting the user's device list. Tokens for the
    /// reconciliator user itself fall back to the password-login path, both
    /// because the admin API refuses to log in as self and because handing
    /// out our own internal token would let consumers destroy it.
    async fn obtain_new_access_token_for_user_id(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<String, ConnectorError> {
        if user_id == &self.reconciliator_user_id {
            return self
                .api
                .obtain_new_access_token_for_user_id(user_id, device_id, valid_until)
                .await;
        }

        let admin_token = self.reconciliator_access_token().await.map_err(|e| {
            ConnectorError::Other(format!(
                "could not obtain access token for `{}`, necessary for obtaining a token for `{user_id}`: {e}",
                self.reconciliator_user_id
            ))
        })?;

        let url = self
            .api
            .prefixless_url(&format!("/_synapse/admin/v1/users/{}/login", escape(user_id.as_str())));

        let mut payload = serde_json::Map::new();
        if let Some(valid_until) = valid_until {
            payload.insert(
                "valid_until_ms".to_owned(),
                Value::from(valid_until.timestamp_millis()),
            );
        }

        let response: AdminUserLoginResponse = self
            .api
            .send_json(Method::POST, &url, Some(&admin_token), &Value::Object(payload))
            .await?;

        Ok(response.access_token)
    }

    async fn verify_access_token(
        &self,
        user_id: &UserId,
        access_token: &str,
    ) -> Result<(), ConnectorError> {
        self.api.verify_access_token(user_id, access_token).await
    }

    async fn destroy_access_token(
        &self,
        user_id: &UserId,
        access_token: &str,
    ) -> Result<(), ConnectorError> {
        self.api.destroy_access_token(user_id, access_token).await
    }

    async fn logout_all_access_tokens_for_user(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
    ) -> Result<(), ConnectorError> {
        self.api.logout_all_access_tokens_for_user(ctx, user_id).await
    }

    /// Registers the account through the shared-secret admin API. Accounts
    /// that already exist are fine: we only care that they exist, not who
    /// created them.
    async fn ensure_user_account_exists(
        &self,
        user_id: &UserId,
        initial_password: &str,
    ) -> Result<(), ConnectorError> {
        let username = user_id_local_part(user_id.as_str())?;
        let register_url = self.api.prefixless_url("/_synapse/admin/v1/register");

        let nonce_response: RegisterNonceResponse =
            with_rate_limit_retries("user.register.nonce", || {
                self.api.get_json(&register_url, None)
            })
            .await?;

        let payload = RegisterRequest {
            nonce: nonce_response.nonce.clone(),
            username: username.clone(),
            password: initial_password.to_owned(),
            mac: compute_registration_mac(
                &self.registration_shared_secret,
                &nonce_response.nonce,
                &username,
                initial_password,
            ),
            registration_type: REGISTRATION_TYPE_SHARED_SECRET.to_owned(),
            admin: false,
        };

        let result: Result<RegisterResponse, _> =
            with_rate_limit_retries("user.register.actual", || {
                self.api.send_json(Method::POST, &register_url, None, &payload)
            })
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_matrix_code(ERROR_USER_IN_USE) => return Ok(()),
            Err(e) => return Err(e),
        };

        // Registration mints an access token automatically. We have no use
        // for it; get rid of it to keep things clean.
        if !response.access_token.is_empty() {
            if let Err(e) = self
                .api
                .destroy_access_token(user_id, &response.access_token)
                .await
            {
                debug!(user_id = %user_id, error = %e, "could not log out registration token");
            }
        }

        Ok(())
    }

    /// Lists users through the admin API, then reads the full state of each
    /// managed user that actually exists. Non-existent users are skipped:
    /// there is no state to fetch, only authentication errors to collect.
    async fn determine_current_state(
        &self,
        ctx: &AccessTokenContext,
        managed_user_ids: &[UserId],
        admin_user_id: &UserId,
    ) -> Result<CurrentState, ConnectorError> {
        let admin_token = ctx.get_token(admin_user_id).await?;

        // No pagination: one large page covering everyone, guests excluded,
        // deactivated accounts included.
        let url = self.api.prefixless_url(
            "/_synapse/admin/v2/users?limit=100000000000&guests=false&deactivated=true",
        );
        let listing: AdminUsersResponse = self.api.get_json(&url, Some(&admin_token)).await?;

        let existing_user_ids: Vec<&str> =
            listing.users.iter().map(|user| user.id.as_str()).collect();

        let mut users: Vec<CurrentUserState> = Vec::new();
        for user_id in managed_user_ids {
            if !existing_user_ids.contains(&user_id.as_str()) {
                continue;
            }
            users.push(self.api.get_user_state_by_user_id(ctx, user_id).await?);
        }

        Ok(CurrentState { users })
    }

    async fn get_user_profile(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
    ) -> Result<ProfileResponse, ConnectorError> {
        self.api.get_user_profile(ctx, user_id).await
    }

    async fn set_user_display_name(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
        display_name: &str,
    ) -> Result<(), ConnectorError> {
        self.api.set_user_display_name(ctx, user_id, display_name).await
    }

    async fn set_user_avatar(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
        avatar: Avatar,
    ) -> Result<(), ConnectorError> {
        self.api.set_user_avatar(ctx, user_id, avatar).await
    }

    async fn invite_user_to_room(
        &self,
        ctx: &AccessTokenContext,
        inviter_id: &UserId,
        invitee_id: &UserId,
        room_id: &RoomId,
    ) -> Result<(), ConnectorError> {
        self.api
            .invite_user_to_room(ctx, inviter_id, invitee_id, room_id)
            .await
    }

    async fn join_room(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<(), ConnectorError> {
        self.api.join_room(ctx, user_id, room_id).await
    }

    async fn leave_room(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<(), ConnectorError> {
        self.api.leave_room(ctx, user_id, room_id).await
    }

    async fn kick_user_from_room(
        &self,
        ctx: &AccessTokenContext,
        kicker_user_id: &UserId,
        kickee_user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<(), ConnectorError> {
        self.api
            .kick_user_from_room(ctx, kicker_user_id, kickee_user_id, room_id)
            .await
    }

    async fn release(&self) {
        self.reconciliator_token_context.release().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_mac_is_stable_hmac_sha1_hex() {
        let mac = compute_registration_mac("reg-secret", "nonce-1", "alice", "pw");
        // SHA-1 digest, hex-encoded.
        assert_eq!(mac.len(), 40);
        assert!(mac.chars().all(|c| c.is_ascii_hexdigit()));

        // Deterministic, and sensitive to each input.
        assert_eq!(
            mac,
            compute_registration_mac("reg-secret", "nonce-1", "alice", "pw")
        );
        assert_ne!(
            mac,
            compute_registration_mac("reg-secret", "nonce-2", "alice", "pw")
        );
        assert_ne!(
            mac,
            compute_registration_mac("reg-secret", "nonce-1", "alice", "other")
        );
        assert_ne!(
            mac,
            compute_registration_mac("other-secret", "nonce-1", "alice", "pw")
        );
    }
}
