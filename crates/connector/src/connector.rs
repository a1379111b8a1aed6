//! The connector contract consumed by the reconciler and gateway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use warden_core::payloads::ProfileResponse;
use warden_core::{DeviceId, RoomId, UserId};

use crate::avatar::Avatar;
use crate::error::ConnectorError;
use crate::state::CurrentState;
use crate::token_context::AccessTokenContext;

/// Everything the system needs from the upstream homeserver.
///
/// Object-safe so the reconciler, the token contexts and the admin API can
/// share one `Arc<dyn MatrixConnector>`. The generic [`crate::ApiConnector`]
/// implements the Client-Server parts; operations that require server-specific
/// admin APIs answer [`ConnectorError::Unsupported`] there and come alive in
/// the admin-capable [`crate::SynapseConnector`].
#[async_trait]
pub trait MatrixConnector: Send + Sync {
    /// Obtains a brand-new access token for the user.
    ///
    /// `valid_until` of `None` means the token should not expire.
    async fn obtain_new_access_token_for_user_id(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<String, ConnectorError>;

    /// Confirms a token actually identifies `user_id` (who-am-I call).
    async fn verify_access_token(
        &self,
        user_id: &UserId,
        access_token: &str,
    ) -> Result<(), ConnectorError>;

    /// Invalidates one token. Tokens the server no longer recognises are
    /// treated as already destroyed.
    async fn destroy_access_token(
        &self,
        user_id: &UserId,
        access_token: &str,
    ) -> Result<(), ConnectorError>;

    /// Invalidates all of the user's tokens, then clears the user from `ctx`
    /// so future needs re-acquire.
    async fn logout_all_access_tokens_for_user(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
    ) -> Result<(), ConnectorError>;

    /// Makes sure the account exists, creating it with `initial_password` if
    /// needed. Existing accounts are left alone.
    async fn ensure_user_account_exists(
        &self,
        user_id: &UserId,
        initial_password: &str,
    ) -> Result<(), ConnectorError>;

    /// Reads the upstream state for the given managed users.
    async fn determine_current_state(
        &self,
        ctx: &AccessTokenContext,
        managed_user_ids: &[UserId],
        admin_user_id: &UserId,
    ) -> Result<CurrentState, ConnectorError>;

    async fn get_user_profile(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
    ) -> Result<ProfileResponse, ConnectorError>;

    async fn set_user_display_name(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
        display_name: &str,
    ) -> Result<(), ConnectorError>;

    /// Uploads the avatar (unless it is a removal), points the profile at it
    /// and records the source-URI hash in the user's account data.
    async fn set_user_avatar(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
        avatar: Avatar,
    ) -> Result<(), ConnectorError>;

    async fn invite_user_to_room(
        &self,
        ctx: &AccessTokenContext,
        inviter_id: &UserId,
        invitee_id: &UserId,
        room_id: &RoomId,
    ) -> Result<(), ConnectorError>;

    async fn join_room(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<(), ConnectorError>;

    async fn leave_room(
        &self,
        ctx: &AccessTokenContext,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<(), ConnectorError>;

    async fn kick_user_from_room(
        &self,
        ctx: &AccessTokenContext,
        kicker_user_id: &UserId,
        kickee_user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<(), ConnectorError>;

    /// Releases any internal long-lived resources (tokens) the connector
    /// holds. Called once at shutdown.
    async fn release(&self) {}
}
