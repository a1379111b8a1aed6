//! Wire payloads for the Client-Server and Synapse admin APIs.
//!
//! Only the requests/responses the gateway and connector actually touch are
//! modeled. Unknown fields are ignored on input; optional fields are omitted
//! on output so rewritten request bodies stay minimal.

use serde::{Deserialize, Serialize};

/// The canonical Matrix error body: `{"errcode": "M_...", "error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixErrorBody {
    pub errcode: String,
    pub error: String,
}

impl MatrixErrorBody {
    #[must_use]
    pub fn new(errcode: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            errcode: errcode.into(),
            error: error.into(),
        }
    }
}

/// Request payload for `POST /_matrix/client/{r0|v3}/login`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "type")]
    pub login_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub medium: String,

    /// Deprecated in favor of `identifier`, but still sent by old clients.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub initial_device_display_name: String,

    #[serde(default)]
    pub identifier: LoginIdentifier,
}

/// The `identifier` object inside a login request.
///
/// Different identifier types carry different fields; we only need the user
/// variant's single field and the type tag for the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginIdentifier {
    #[serde(rename = "type", default)]
    pub identifier_type: String,

    #[serde(default)]
    pub user: String,
}

/// Response payload for a successful `/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
}

/// Response for `GET /_matrix/client/{r0|v3}/account/whoami`.
#[derive(Debug, Clone, Deserialize)]
pub struct WhoAmIResponse {
    pub user_id: String,
}

/// Response for `GET /_matrix/client/{r0|v3}/profile/{userId}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileResponse {
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default, rename = "displayname")]
    pub display_name: String,
}

/// Request payload for `PUT /profile/{userId}/displayname`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayNameRequest {
    #[serde(default, rename = "displayname")]
    pub display_name: String,
}

/// Request payload for `PUT /profile/{userId}/avatar_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarUrlRequest {
    #[serde(default)]
    pub avatar_url: String,
}

/// Response for `GET /_matrix/client/{r0|v3}/joined_rooms`.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinedRoomsResponse {
    pub joined_rooms: Vec<String>,
}

/// Response for `GET /_synapse/admin/v2/users`.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminUsersResponse {
    #[serde(default)]
    pub users: Vec<AdminUserEntry>,
}

/// One user entity in the admin users listing.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminUserEntry {
    #[serde(rename = "name")]
    pub id: String,
    #[serde(default, rename = "displayname")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Response for `POST /_synapse/admin/v1/users/{userId}/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminUserLoginResponse {
    pub access_token: String,
}

/// Response for `GET /_synapse/admin/v1/register`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterNonceResponse {
    pub nonce: String,
}

/// Request payload for `POST /_synapse/admin/v1/register`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub nonce: String,
    pub username: String,
    pub password: String,
    pub mac: String,
    #[serde(rename = "type")]
    pub registration_type: String,
    pub admin: bool,
}

/// Response for `POST /_synapse/admin/v1/register`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub user_id: String,
}

/// Response for `POST /_matrix/media/r0/upload`.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaUploadResponse {
    pub content_uri: String,
}

/// Request payload for `POST /rooms/{roomId}/kick` (and `/invite`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMembershipRequest {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The slice of `POST /createRoom` the policy checker inspects.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub initial_state: Vec<InitialStateEvent>,
}

/// One entry of a create-room `initial_state` list.
#[derive(Debug, Clone, Deserialize)]
pub struct InitialStateEvent {
    #[serde(rename = "type")]
    pub event_type: String,
}

/// The slice of `PUT /rooms/{roomId}/state/m.room.member/{memberId}` the
/// policy checker inspects.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemberStateRequest {
    #[serde(default)]
    pub membership: String,
}
