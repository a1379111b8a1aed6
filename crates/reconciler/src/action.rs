//! The vocabulary of reconciliation actions.

use std::fmt;

use warden_core::{RoomId, UserId};

/// One step toward aligning the homeserver with the policy.
///
/// Each variant carries exactly the payload its handler needs; the original
/// loosely-typed payload maps became enum fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationAction {
    CreateUser { user_id: UserId, password: String },
    ActivateUser { user_id: UserId },
    DeactivateUser { user_id: UserId },
    SetDisplayName { user_id: UserId, display_name: String },
    SetAvatar { user_id: UserId, avatar_uri: String },
    JoinRoom { user_id: UserId, room_id: RoomId },
    LeaveRoom { user_id: UserId, room_id: RoomId },
}

impl ReconciliationAction {
    /// Stable dotted name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateUser { .. } => "user.create",
            Self::ActivateUser { .. } => "user.activate",
            Self::DeactivateUser { .. } => "user.deactivate",
            Self::SetDisplayName { .. } => "user.set_display_name",
            Self::SetAvatar { .. } => "user.set_avatar",
            Self::JoinRoom { .. } => "room.join",
            Self::LeaveRoom { .. } => "room.leave",
        }
    }

    /// The user this action concerns.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        match self {
            Self::CreateUser { user_id, .. }
            | Self::ActivateUser { user_id }
            | Self::DeactivateUser { user_id }
            | Self::SetDisplayName { user_id, .. }
            | Self::SetAvatar { user_id, .. }
            | Self::JoinRoom { user_id, .. }
            | Self::LeaveRoom { user_id, .. } => user_id,
        }
    }
}

impl fmt::Display for ReconciliationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind(), self.user_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_display() {
        let action = ReconciliationAction::JoinRoom {
            user_id: UserId::new("@a:example.com"),
            room_id: RoomId::new("!r:example.com"),
        };
        assert_eq!(action.kind(), "room.join");
        assert_eq!(action.to_string(), "room.join (@a:example.com)");
    }
}
