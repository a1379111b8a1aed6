//! The implementation-agnostic connector, speaking the Client-Server API.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use warden_core::constants::{
    ACCOUNT_DATA_TYPE_AVATAR_SOURCE_URI_HASHES, ERROR_NOT_FOUND, ERROR_UNKNOWN_TOKEN,
    LOGIN_IDENTIFIER_TYPE_USER, LOGIN_TYPE_PASSWORD,
};
use warden_core::payloads::{
    DisplayNameRequest, JoinedRoomsResponse, LoginIdentifier, LoginRequest, LoginResponse,
    MatrixErrorBody, MediaUploadResponse, ProfileResponse, RoomMembershipRequest, WhoAmIResponse,
};
use warden_core::{
    clean_deactivation_marker, is_deactivated_display_name, DeviceId, RoomId,
    SharedSecretAuthPasswordGenerator, UserId,
};

use crate::avatar::{avatar_source_uri_hash, Avatar};
use crate::connector::MatrixConnector;
use crate::error::ConnectorError;
use crate::retry::with_rate_limit_retries;
use crate::state::{CurrentState, CurrentUserState};
use crate::token_context::AccessTokenContext;

/// Characters escaped when a dynamic value lands in a URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

pub(crate) fn escape(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Generic Matrix connector over the Client-Server API.
///
/// Operations that cannot be expressed with standard APIs
/// (account registration, whole-server user listing) answer
/// [`ConnectorError::Unsupported`]; the Synapse connector provides them.
pub struct ApiConnector {
    homeserver_api_endpoint: String,
    password_generator: SharedSecretAuthPasswordGenerator,
    client: reqwest::Client,
}

impl ApiConnector {
    /// `timeout` bounds every upstream call. Homeservers have been seen
    /// getting stuck on requests forever; we refuse to get stuck with them.
    #[must_use]
    pub fn new(
        homeserver_api_endpoint: impl Into<String>,
        password_generator: SharedSecretAuthPasswordGenerator,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("HTTP client construction cannot fail with these options");

        let homeserver_api_endpoint: String = homeserver_api_endpoint.into();

        Self {
            homeserver_api_endpoint: homeserver_api_endpoint.trim_end_matches('/').to_owned(),
            password_generator,
            client,
        }
    }

    /// A URL under the Client-Server prefix.
    pub(crate) fn cs_url(&self, suffix: &str) -> String {
        format!("{}/_matrix/client/r0{suffix}", self.homeserver_api_endpoint)
    }

    /// A URL directly under the homeserver root (admin APIs, media).
    pub(crate) fn prefixless_url(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.homeserver_api_endpoint)
    }

    async fn execute<R: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        access_token: Option<&str>,
        body: Option<Value>,
    ) -> Result<R, ConnectorError> {
        let mut builder = self.client.request(method, url);
        if let Some(token) = access_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            return Err(decode_error(status.as_u16(), &bytes));
        }

        serde_json::from_slice(&bytes).map_err(|e| {
            ConnectorError::Other(format!("failed decoding response from {url}: {e}"))
        })
    }

    pub(crate) async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        access_token: Option<&str>,
    ) -> Result<R, ConnectorError> {
        self.execute(Method::GET, url, access_token, None).await
    }

    pub(crate) async fn send_json<B: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        access_token: Option<&str>,
        body: &B,
    ) -> Result<R, ConnectorError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ConnectorError::Other(format!("failed encoding request body: {e}")))?;
        self.execute(method, url, access_token, Some(body)).await
    }

    /// Uploads bytes to the media store and returns the resulting MXC URI.
    pub(crate) async fn upload_media(
        &self,
        access_token: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<MediaUploadResponse, ConnectorError> {
        let url = self.prefixless_url("/_matrix/media/r0/upload");

        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(decode_error(status.as_u16(), &bytes));
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| ConnectorError::Other(format!("failed decoding upload response: {e}")))
    }

    async fn set_avatar_url(
        &self,
        access_token: &str,
        user_id: &UserId,
        avatar_url: &str,
    ) -> Result<(), ConnectorError> {
        let url = self.cs_url(&format!("/profile/{}/avatar_url", escape(user_id.as_str())));
        let _: Value = self
            .send_json(
                Method::PUT,
                &url,
                Some(access_token),
                &serde_json::json!({ "avatar_url": avatar_url }),
            )
            .await?;
        Ok(())
    }

    /// Reads an account-data event's content; missing data is an empty map.
    pub(crate) async fn get_user_account_data(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
        data_type: &str,
    ) -> Result<Map<String, Value>, ConnectorError> {
        let token = ctx.get_token(user_id).await?;
        let url = self.cs_url(&format!(
            "/user/{}/account_data/{}",
            escape(user_id.as_str()),
            escape(data_type)
        ));

        match self.get_json::<Map<String, Value>>(&url, Some(&token)).await {
            Ok(content) => Ok(content),
            Err(e) if e.is_matrix_code(ERROR_NOT_FOUND) => Ok(Map::new()),
            Err(e) => Err(e),
        }
    }

    async fn put_user_account_data(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
        data_type: &str,
        content: &Value,
    ) -> Result<(), ConnectorError> {
        let token = ctx.get_token(user_id).await?;
        let url = self.cs_url(&format!(
            "/user/{}/account_data/{}",
            escape(user_id.as_str()),
            escape(data_type)
        ));
        let _: Value = self
            .send_json(Method::PUT, &url, Some(&token), content)
            .await?;
        Ok(())
    }

    async fn get_joined_room_ids(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
    ) -> Result<Vec<RoomId>, ConnectorError> {
        let token = ctx.get_token(user_id).await?;
        let response: JoinedRoomsResponse = self
            .get_json(&self.cs_url("/joined_rooms"), Some(&token))
            .await?;
        Ok(response.joined_rooms.into_iter().map(RoomId::new).collect())
    }

    /// Maps the profile's MXC URI back to the source-URI hash recorded in
    /// account data. An unknown MXC URI (somebody changed the avatar behind
    /// our back) yields an empty hash.
    async fn determine_avatar_source_uri_hash(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
        mxc_uri: &str,
    ) -> Result<String, ConnectorError> {
        let content = self
            .get_user_account_data(ctx, user_id, ACCOUNT_DATA_TYPE_AVATAR_SOURCE_URI_HASHES)
            .await?;

        Ok(content
            .get(mxc_uri)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned())
    }

    /// Assembles the full upstream state for one existing user.
    pub(crate) async fn get_user_state_by_user_id(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
    ) -> Result<CurrentUserState, ConnectorError> {
        let joined_room_ids = self.get_joined_room_ids(ctx, user_id).await?;
        let profile = self.get_user_profile(ctx, user_id).await?;

        let is_deactivated = is_deactivated_display_name(&profile.display_name);
        // Strip the marker so downstream comparisons see the real name and
        // don't schedule spurious display-name writes.
        let display_name = if is_deactivated {
            clean_deactivation_marker(&profile.display_name)
        } else {
            profile.display_name.clone()
        };

        let avatar_hash = if profile.avatar_url.is_empty() {
            // No avatar is equivalent to deriving from an empty source URI.
            avatar_source_uri_hash("")
        } else {
            self.determine_avatar_source_uri_hash(ctx, user_id, &profile.avatar_url)
                .await?
        };

        Ok(CurrentUserState {
            id: user_id.clone(),
            active: !is_deactivated,
            display_name,
            avatar_mxc_uri: profile.avatar_url,
            avatar_source_uri_hash: avatar_hash,
            joined_room_ids,
        })
    }
}

fn decode_error(status: u16, body: &[u8]) -> ConnectorError {
    if let Ok(matrix_error) = serde_json::from_slice::<MatrixErrorBody>(body) {
        return ConnectorError::Matrix {
            status,
            errcode: matrix_error.errcode,
            error: matrix_error.error,
        };
    }
    ConnectorError::Other(format!(
        "unexpected HTTP {status} response: {}",
        String::from_utf8_lossy(&body[..body.len().min(256)])
    ))
}

#[async_trait]
impl MatrixConnector for ApiConnector {
    /// Logs in with the shared-secret-derived password. `valid_until` is
    /// ignored: the specced `/login` API has no token-expiry knob.
    async fn obtain_new_access_token_for_user_id(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        _valid_until: Option<DateTime<Utc>>,
    ) -> Result<String, ConnectorError> {
        let url = self.cs_url("/login");
        let payload = LoginRequest {
            login_type: LOGIN_TYPE_PASSWORD.to_owned(),
            // Old deprecated field, kept for maximum compatibility.
            user: user_id.to_string(),
            identifier: LoginIdentifier {
                identifier_type: LOGIN_IDENTIFIER_TYPE_USER.to_owned(),
                user: user_id.to_string(),
            },
            password: self.password_generator.generate_for_user_id(user_id.as_str()),
            device_id: device_id.to_string(),
            ..LoginRequest::default()
        };

        let response: LoginResponse = with_rate_limit_retries("user.obtain_access_token", || {
            self.send_json(Method::POST, &url, None, &payload)
        })
        .await?;

        Ok(response.access_token)
    }

    async fn verify_access_token(
        &self,
        user_id: &UserId,
        access_token: &str,
    ) -> Result<(), ConnectorError> {
        let response: WhoAmIResponse = self
            .get_json(&self.cs_url("/account/whoami"), Some(access_token))
            .await?;

        if response.user_id != user_id.as_str() {
            return Err(ConnectorError::TokenMismatch {
                expected: user_id.to_string(),
                actual: response.user_id,
            });
        }

        Ok(())
    }

    async fn destroy_access_token(
        &self,
        _user_id: &UserId,
        access_token: &str,
    ) -> Result<(), ConnectorError> {
        let result: Result<Value, _> = self
            .send_json(
                Method::POST,
                &self.cs_url("/logout"),
                Some(access_token),
                &serde_json::json!({}),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            // Tokens that already stopped working are as destroyed as it gets.
            Err(e) if e.is_matrix_code(ERROR_UNKNOWN_TOKEN) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn logout_all_access_tokens_for_user(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
    ) -> Result<(), ConnectorError> {
        let token = ctx.get_token(user_id).await?;
        let _: Value = self
            .send_json(
                Method::POST,
                &self.cs_url("/logout/all"),
                Some(&token),
                &serde_json::json!({}),
            )
            .await?;

        // "Logout all" also killed the token we just used. Clear it from the
        // context so later work re-acquires instead of failing.
        ctx.clear(user_id);

        Ok(())
    }

    async fn ensure_user_account_exists(
        &self,
        _user_id: &UserId,
        _initial_password: &str,
    ) -> Result<(), ConnectorError> {
        // Account registration has no implementation-agnostic API.
        Err(ConnectorError::Unsupported("ensure_user_account_exists"))
    }

    async fn determine_current_state(
        &self,
        _ctx: &AccessTokenContext,
        _managed_user_ids: &[UserId],
        _admin_user_id: &UserId,
    ) -> Result<CurrentState, ConnectorError> {
        // Listing all users has no implementation-agnostic API.
        Err(ConnectorError::Unsupported("determine_current_state"))
    }

    async fn get_user_profile(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
    ) -> Result<ProfileResponse, ConnectorError> {
        let token = ctx.get_token(user_id).await?;
        let url = self.cs_url(&format!("/profile/{}", escape(user_id.as_str())));
        self.get_json(&url, Some(&token)).await
    }

    async fn set_user_display_name(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
        display_name: &str,
    ) -> Result<(), ConnectorError> {
        let token = ctx.get_token(user_id).await?;
        let url = self.cs_url(&format!("/profile/{}/displayname", escape(user_id.as_str())));
        let payload = DisplayNameRequest {
            display_name: display_name.to_owned(),
        };

        let _: Value = with_rate_limit_retries("user.set_display_name", || {
            self.send_json(Method::PUT, &url, Some(&token), &payload)
        })
        .await?;
        Ok(())
    }

    async fn set_user_avatar(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
        avatar: Avatar,
    ) -> Result<(), ConnectorError> {
        let token = ctx.get_token(user_id).await?;

        if avatar.content_type.is_empty() {
            // Removal request: deassociate the avatar from the profile but
            // leave the stored image alone. We may not own it, and it may be
            // referenced elsewhere.
            return with_rate_limit_retries("user.set_avatar", || {
                self.set_avatar_url(&token, user_id, "")
            })
            .await;
        }

        // The upload itself is not retried: we cannot tell how much of the
        // body the server consumed on a failed attempt.
        let uploaded = self
            .upload_media(&token, &avatar.content_type, avatar.body.clone())
            .await?;
        let mxc_uri = uploaded.content_uri;

        with_rate_limit_retries("user.set_avatar", || {
            self.set_avatar_url(&token, user_id, &mxc_uri)
        })
        .await?;

        // Record which source URI this avatar derives from. Prior content at
        // the key is overwritten wholesale: only the current avatar matters.
        let content = serde_json::json!({ &mxc_uri: avatar.uri_hash });
        with_rate_limit_retries("user.store_avatar_source_uri_hash", || {
            self.put_user_account_data(
                ctx,
                user_id,
                ACCOUNT_DATA_TYPE_AVATAR_SOURCE_URI_HASHES,
                &content,
            )
        })
        .await
    }

    async fn invite_user_to_room(
        &self,
        ctx: &AccessTokenContext,
        inviter_id: &UserId,
        invitee_id: &UserId,
        room_id: &RoomId,
    ) -> Result<(), ConnectorError> {
        let token = ctx.get_token(inviter_id).await?;
        let url = self.cs_url(&format!("/rooms/{}/invite", escape(room_id.as_str())));
        let payload = RoomMembershipRequest {
            user_id: invitee_id.to_string(),
            reason: None,
        };

        let _: Value = with_rate_limit_retries("room.invite", || {
            self.send_json(Method::POST, &url, Some(&token), &payload)
        })
        .await?;
        Ok(())
    }

    async fn join_room(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<(), ConnectorError> {
        let token = ctx.get_token(user_id).await?;
        let url = self.cs_url(&format!("/join/{}", escape(room_id.as_str())));

        // Joining an already-joined room succeeds, so this is idempotent.
        let body = serde_json::json!({});
        let _: Value = with_rate_limit_retries("room.join", || {
            self.send_json(Method::POST, &url, Some(&token), &body)
        })
        .await?;
        Ok(())
    }

    async fn leave_room(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<(), ConnectorError> {
        let token = ctx.get_token(user_id).await?;
        let url = self.cs_url(&format!("/rooms/{}/leave", escape(room_id.as_str())));

        let body = serde_json::json!({});
        let _: Value = with_rate_limit_retries("room.leave", || {
            self.send_json(Method::POST, &url, Some(&token), &body)
        })
        .await?;
        Ok(())
    }

    async fn kick_user_from_room(
        &self,
        ctx: &AccessTokenContext,
        kicker_user_id: &UserId,
        kickee_user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<(), ConnectorError> {
        if kicker_user_id == kickee_user_id {
            return Err(ConnectorError::Other(format!(
                "kicking self ({kicker_user_id}) does not make sense"
            )));
        }

        let token = ctx.get_token(kicker_user_id).await?;
        let url = self.cs_url(&format!("/rooms/{}/kick", escape(room_id.as_str())));
        let payload = RoomMembershipRequest {
            user_id: kickee_user_id.to_string(),
            reason: None,
        };

        let _: Value = with_rate_limit_retries("room.kick", || {
            self.send_json(Method::POST, &url, Some(&token), &payload)
        })
        .await?;
        Ok(())
    }
}
