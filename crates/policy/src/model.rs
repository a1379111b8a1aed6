//! The policy document, as provided externally in JSON.

use serde::{Deserialize, Serialize};

use warden_core::{RoomId, UserId};
use warden_hook::Hook;
use warden_userauth::AuthType;

/// The root policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    /// Opaque marker the policy author may use to identify this revision.
    /// Informational only.
    #[serde(rename = "identificationStamp", default, skip_serializing_if = "Option::is_none")]
    pub identification_stamp: Option<String>,

    #[serde(default)]
    pub flags: PolicyFlags,

    /// Rooms the system recognises. Membership reconciliation and leave
    /// protection only ever concern these.
    #[serde(rename = "managedRoomIds", default)]
    pub managed_room_ids: Vec<RoomId>,

    #[serde(default)]
    pub users: Vec<UserPolicy>,

    #[serde(default)]
    pub hooks: Vec<Hook>,
}

impl Policy {
    /// The ids of all managed users, in policy order.
    pub fn managed_user_ids(&self) -> Vec<UserId> {
        self.users.iter().map(|user| user.id.clone()).collect()
    }

    /// Finds the policy entry for a user, if the user is managed.
    #[must_use]
    pub fn user_policy(&self, user_id: &str) -> Option<&UserPolicy> {
        self.users.iter().find(|user| user.id.as_str() == user_id)
    }
}

/// Global boolean switches. Per-user overrides exist for the room-creation
/// family; everything else applies server-wide.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyFlags {
    /// Whether users may keep display names that deviate from the policy.
    #[serde(rename = "allowCustomUserDisplayNames")]
    pub allow_custom_user_display_names: bool,

    /// Whether users may keep avatars that deviate from the policy.
    #[serde(rename = "allowCustomUserAvatars")]
    pub allow_custom_user_avatars: bool,

    /// Whether passthrough-authenticated users may change their homeserver
    /// password themselves.
    #[serde(rename = "allowCustomPassthroughUserPasswords")]
    pub allow_custom_passthrough_user_passwords: bool,

    /// Whether the token-less forgotten-password flow is allowed through.
    #[serde(rename = "allowUnauthenticatedPasswordResets")]
    pub allow_unauthenticated_password_resets: bool,

    /// Default for room creation. A `UserPolicy` override wins.
    #[serde(rename = "forbidRoomCreation")]
    pub forbid_room_creation: bool,

    /// Default for creating encrypted rooms (or encrypting existing ones).
    #[serde(rename = "forbidEncryptedRoomCreation")]
    pub forbid_encrypted_room_creation: bool,

    /// Default for creating unencrypted rooms.
    #[serde(rename = "forbidUnencryptedRoomCreation")]
    pub forbid_unencrypted_room_creation: bool,

    /// Whether third-party-identifier login requests pass through.
    #[serde(rename = "allow3pidLogin")]
    pub allow_3pid_login: bool,
}

/// One managed user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPolicy {
    pub id: UserId,

    pub active: bool,

    #[serde(rename = "authType")]
    pub auth_type: AuthType,

    /// Meaning depends on `auth_type`: a hash digest, a plaintext password,
    /// a URL (rest) or a bootstrap password (passthrough).
    #[serde(rename = "authCredential", default)]
    pub auth_credential: String,

    #[serde(rename = "displayName", default)]
    pub display_name: String,

    /// Empty, an inline `data:` URI, or an HTTP URL.
    #[serde(rename = "avatarUri", default)]
    pub avatar_uri: String,

    #[serde(rename = "joinedRoomIds", default)]
    pub joined_room_ids: Vec<RoomId>,

    /// Overrides `PolicyFlags::forbid_room_creation` when set.
    #[serde(rename = "forbidRoomCreation", default, skip_serializing_if = "Option::is_none")]
    pub forbid_room_creation: Option<bool>,

    /// Overrides `PolicyFlags::forbid_encrypted_room_creation` when set.
    #[serde(
        rename = "forbidEncryptedRoomCreation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub forbid_encrypted_room_creation: Option<bool>,

    /// Overrides `PolicyFlags::forbid_unencrypted_room_creation` when set.
    #[serde(
        rename = "forbidUnencryptedRoomCreation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub forbid_unencrypted_room_creation: Option<bool>,
}

impl UserPolicy {
    /// Whether this user is in the given managed room's membership set.
    #[must_use]
    pub fn is_joined_to_room(&self, room_id: &str) -> bool {
        self.joined_room_ids
            .iter()
            .any(|room| room.as_str() == room_id)
    }
}
