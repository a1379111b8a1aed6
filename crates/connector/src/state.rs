//! Snapshots of the upstream's observable state for managed users.

use warden_core::{RoomId, UserId};

/// What the homeserver currently knows about the managed users.
///
/// Users from the policy that do not exist upstream yet are simply absent.
#[derive(Debug, Clone, Default)]
pub struct CurrentState {
    pub users: Vec<CurrentUserState>,
}

impl CurrentState {
    #[must_use]
    pub fn user_state(&self, user_id: &str) -> Option<&CurrentUserState> {
        self.users.iter().find(|user| user.id.as_str() == user_id)
    }
}

/// One managed user's upstream state.
#[derive(Debug, Clone)]
pub struct CurrentUserState {
    pub id: UserId,

    /// Derived from the deactivation display-name marker; the marker itself
    /// is already stripped from `display_name`.
    pub active: bool,

    pub display_name: String,

    /// The media-store URI of the current avatar, if any.
    pub avatar_mxc_uri: String,

    /// SHA-512 hex digest of the source URI the current avatar was derived
    /// from. The empty source URI's digest when no avatar is set.
    pub avatar_source_uri_hash: String,

    pub joined_room_ids: Vec<RoomId>,
}

impl CurrentUserState {
    #[must_use]
    pub fn is_joined_to_room(&self, room_id: &str) -> bool {
        self.joined_room_ids
            .iter()
            .any(|room| room.as_str() == room_id)
    }
}
