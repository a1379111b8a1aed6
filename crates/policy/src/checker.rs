//! Pure policy predicates shared by the gateway's per-route checks.

use crate::model::Policy;

/// Answers membership/profile questions against a policy.
///
/// Unmanaged users always get a permissive answer here; whatever the
/// homeserver decides for them is none of our business.
#[derive(Debug, Default, Clone, Copy)]
pub struct Checker;

impl Checker {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Leaving a room is just one way of changing your own membership state.
    #[must_use]
    pub fn can_user_leave_room(&self, policy: &Policy, user_id: &str, room_id: &str) -> bool {
        self.can_user_change_own_membership_state_in_room(policy, user_id, room_id)
    }

    /// A managed user may not change their own membership in a room their
    /// policy mandates them to be in.
    #[must_use]
    pub fn can_user_change_own_membership_state_in_room(
        &self,
        policy: &Policy,
        user_id: &str,
        room_id: &str,
    ) -> bool {
        match policy.user_policy(user_id) {
            Some(user_policy) => !user_policy.is_joined_to_room(room_id),
            None => true,
        }
    }

    #[must_use]
    pub fn can_user_use_custom_display_name(&self, policy: &Policy, _user_id: &str) -> bool {
        policy.flags.allow_custom_user_display_names
    }

    #[must_use]
    pub fn can_user_use_custom_avatar(&self, policy: &Policy, _user_id: &str) -> bool {
        policy.flags.allow_custom_user_avatars
    }

    /// Whether room creation is forbidden for this user, the per-user
    /// override taking precedence over the global flag.
    #[must_use]
    pub fn is_room_creation_forbidden(&self, policy: &Policy, user_id: &str) -> bool {
        policy
            .user_policy(user_id)
            .and_then(|user| user.forbid_room_creation)
            .unwrap_or(policy.flags.forbid_room_creation)
    }

    /// Like [`Checker::is_room_creation_forbidden`], for encrypted rooms.
    /// Also gates enabling encryption on an existing room.
    #[must_use]
    pub fn is_encrypted_room_creation_forbidden(&self, policy: &Policy, user_id: &str) -> bool {
        policy
            .user_policy(user_id)
            .and_then(|user| user.forbid_encrypted_room_creation)
            .unwrap_or(policy.flags.forbid_encrypted_room_creation)
    }

    /// Like [`Checker::is_room_creation_forbidden`], for unencrypted rooms.
    #[must_use]
    pub fn is_unencrypted_room_creation_forbidden(&self, policy: &Policy, user_id: &str) -> bool {
        policy
            .user_policy(user_id)
            .and_then(|user| user.forbid_unencrypted_room_creation)
            .unwrap_or(policy.flags.forbid_unencrypted_room_creation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PolicyFlags, UserPolicy};
    use warden_userauth::AuthType;
    use warden_core::{RoomId, UserId};

    fn policy() -> Policy {
        Policy {
            schema_version: 1,
            identification_stamp: None,
            flags: PolicyFlags {
                forbid_room_creation: true,
                ..PolicyFlags::default()
            },
            managed_room_ids: vec![RoomId::new("!r1:example.com")],
            users: vec![UserPolicy {
                id: UserId::new("@alice:example.com"),
                active: true,
                auth_type: AuthType::Plain,
                auth_credential: String::new(),
                display_name: String::new(),
                avatar_uri: String::new(),
                joined_room_ids: vec![RoomId::new("!r1:example.com")],
                forbid_room_creation: None,
                forbid_encrypted_room_creation: Some(false),
                forbid_unencrypted_room_creation: None,
            }],
            hooks: Vec::new(),
        }
    }

    #[test]
    fn mandated_membership_blocks_self_leave() {
        let checker = Checker::new();
        let policy = policy();
        assert!(!checker.can_user_leave_room(&policy, "@alice:example.com", "!r1:example.com"));
        assert!(checker.can_user_leave_room(&policy, "@alice:example.com", "!other:example.com"));
    }

    #[test]
    fn unmanaged_users_are_unconstrained() {
        let checker = Checker::new();
        let policy = policy();
        assert!(checker.can_user_leave_room(&policy, "@stranger:example.com", "!r1:example.com"));
        // The global room-creation default still applies to everyone.
        assert!(checker.is_room_creation_forbidden(&policy, "@stranger:example.com"));
    }

    #[test]
    fn per_user_override_beats_global_flag() {
        let checker = Checker::new();
        let mut policy = policy();

        // Global forbid applies to alice (no override for plain creation).
        assert!(checker.is_room_creation_forbidden(&policy, "@alice:example.com"));

        // The explicit per-user override wins for encrypted creation.
        policy.flags.forbid_encrypted_room_creation = true;
        assert!(!checker.is_encrypted_room_creation_forbidden(&policy, "@alice:example.com"));
    }
}
