//! Room-related predicates: creation, encryption, membership changes.

use warden_core::constants::{ERROR_BAD_JSON, ERROR_FORBIDDEN};
use warden_core::payloads::{CreateRoomRequest, RoomMembershipRequest};

use super::{CheckContext, PolicyCheckResponse};

const ENCRYPTION_EVENT_TYPE: &str = "m.room.encryption";

/// `POST /createRoom`
///
/// Gated on the room-creation flags (per-user override first), then on the
/// encrypted/unencrypted split, decided by whether the initial state carries
/// an encryption event.
pub fn check_room_create(ctx: &CheckContext<'_>) -> PolicyCheckResponse {
    if ctx.checker.is_room_creation_forbidden(ctx.policy, ctx.user_id) {
        return PolicyCheckResponse::deny(
            ERROR_FORBIDDEN,
            "Denied by policy (cannot create rooms)",
        );
    }

    let payload: CreateRoomRequest = match serde_json::from_slice(ctx.body) {
        Ok(payload) => payload,
        Err(_) if ctx.body.is_empty() => CreateRoomRequest::default(),
        Err(e) => return PolicyCheckResponse::deny(ERROR_BAD_JSON, &e.to_string()),
    };

    let creates_encrypted_room = payload
        .initial_state
        .iter()
        .any(|event| event.event_type == ENCRYPTION_EVENT_TYPE);

    if creates_encrypted_room {
        if ctx
            .checker
            .is_encrypted_room_creation_forbidden(ctx.policy, ctx.user_id)
        {
            return PolicyCheckResponse::deny(
                ERROR_FORBIDDEN,
                "Denied by policy (cannot create encrypted rooms)",
            );
        }
    } else if ctx
        .checker
        .is_unencrypted_room_creation_forbidden(ctx.policy, ctx.user_id)
    {
        return PolicyCheckResponse::deny(
            ERROR_FORBIDDEN,
            "Denied by policy (cannot create unencrypted rooms)",
        );
    }

    PolicyCheckResponse::allow()
}

/// `PUT /rooms/{roomId}/state/m.room.encryption`
///
/// Enabling encryption on an existing room is gated like creating an
/// encrypted room.
pub fn check_room_encryption_state_change(ctx: &CheckContext<'_>) -> PolicyCheckResponse {
    if ctx
        .checker
        .is_encrypted_room_creation_forbidden(ctx.policy, ctx.user_id)
    {
        return PolicyCheckResponse::deny(
            ERROR_FORBIDDEN,
            "Denied by policy (cannot enable encryption)",
        );
    }

    PolicyCheckResponse::allow()
}

/// `POST /rooms/{roomId}/leave`
pub fn check_room_leave(ctx: &CheckContext<'_>) -> PolicyCheckResponse {
    if !ctx
        .checker
        .can_user_leave_room(ctx.policy, ctx.user_id, ctx.param("room_id"))
    {
        return PolicyCheckResponse::deny(ERROR_FORBIDDEN, "Denied by policy");
    }

    PolicyCheckResponse::allow()
}

/// `POST /rooms/{roomId}/kick`
///
/// Self-kicks are gated like leaves; kicking somebody else passes through
/// for the homeserver's own power checks to sort out.
pub fn check_room_kick(ctx: &CheckContext<'_>) -> PolicyCheckResponse {
    if ctx.checker.can_user_change_own_membership_state_in_room(
        ctx.policy,
        ctx.user_id,
        ctx.param("room_id"),
    ) {
        // Whether this kicks self or another, it is allowed either way.
        return PolicyCheckResponse::allow();
    }

    let payload: RoomMembershipRequest = match serde_json::from_slice(ctx.body) {
        Ok(payload) => payload,
        Err(e) => return PolicyCheckResponse::deny(ERROR_BAD_JSON, &e.to_string()),
    };

    if payload.user_id == ctx.user_id {
        // Already established that self-membership changes are off-limits.
        return PolicyCheckResponse::deny(ERROR_FORBIDDEN, "Denied by policy");
    }

    PolicyCheckResponse::allow()
}

/// `PUT /rooms/{roomId}/state/m.room.member/{memberId}`
///
/// Covers leaves, joins and in-room profile changes expressed as member
/// state. Somebody else's membership passes through; your own is gated.
pub fn check_room_membership_state_change(ctx: &CheckContext<'_>) -> PolicyCheckResponse {
    if ctx.user_id != ctx.param("member_id") {
        return PolicyCheckResponse::allow();
    }

    if !ctx.checker.can_user_change_own_membership_state_in_room(
        ctx.policy,
        ctx.user_id,
        ctx.param("room_id"),
    ) {
        return PolicyCheckResponse::deny(ERROR_FORBIDDEN, "Denied by policy");
    }

    PolicyCheckResponse::allow()
}

/// `PUT /rooms/{roomId}/send/{eventType}/{txnId}`
///
/// Unconstrained; the route is enumerated so the policy-checked hook event
/// types fire for message sends.
pub fn check_room_send_event(_ctx: &CheckContext<'_>) -> PolicyCheckResponse {
    PolicyCheckResponse::allow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use warden_core::{RoomId, UserId};
    use warden_policy::{AuthType, Checker, Policy, PolicyFlags, UserPolicy};

    fn policy(flags: PolicyFlags) -> Policy {
        Policy {
            schema_version: 1,
            identification_stamp: None,
            flags,
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
                forbid_encrypted_room_creation: None,
                forbid_unencrypted_room_creation: None,
            }],
            hooks: Vec::new(),
        }
    }

    fn check(
        check_fn: super::super::PolicyCheckFn,
        policy: &Policy,
        user_id: &str,
        params: &[(&str, &str)],
        body: &[u8],
    ) -> PolicyCheckResponse {
        let params: HashMap<String, String> = params
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        let checker = Checker::new();
        check_fn(&CheckContext {
            policy,
            checker: &checker,
            user_id,
            params: &params,
            body,
        })
    }

    #[test]
    fn room_creation_denied_by_global_flag() {
        let policy = policy(PolicyFlags {
            forbid_room_creation: true,
            ..PolicyFlags::default()
        });
        let verdict = check(check_room_create, &policy, "@alice:example.com", &[], b"{}");
        assert!(!verdict.allow);
        assert_eq!(verdict.error_code, "M_FORBIDDEN");
        assert_eq!(verdict.error_message, "Denied by policy (cannot create rooms)");
    }

    #[test]
    fn encrypted_room_creation_gated_by_initial_state() {
        let policy = policy(PolicyFlags {
            forbid_encrypted_room_creation: true,
            ..PolicyFlags::default()
        });

        let encrypted_body = serde_json::json!({
            "initial_state": [{"type": "m.room.encryption", "content": {}}]
        });
        let verdict = check(
            check_room_create,
            &policy,
            "@alice:example.com",
            &[],
            encrypted_body.to_string().as_bytes(),
        );
        assert!(!verdict.allow);

        // An unencrypted creation is still fine.
        let verdict = check(check_room_create, &policy, "@alice:example.com", &[], b"{}");
        assert!(verdict.allow);
    }

    #[test]
    fn unencrypted_room_creation_gate() {
        let policy = policy(PolicyFlags {
            forbid_unencrypted_room_creation: true,
            ..PolicyFlags::default()
        });

        let verdict = check(check_room_create, &policy, "@alice:example.com", &[], b"{}");
        assert!(!verdict.allow);

        let encrypted_body = serde_json::json!({
            "initial_state": [{"type": "m.room.encryption", "content": {}}]
        });
        let verdict = check(
            check_room_create,
            &policy,
            "@alice:example.com",
            &[],
            encrypted_body.to_string().as_bytes(),
        );
        assert!(verdict.allow);
    }

    #[test]
    fn leaving_a_mandated_room_is_denied() {
        let policy = policy(PolicyFlags::default());
        let verdict = check(
            check_room_leave,
            &policy,
            "@alice:example.com",
            &[("room_id", "!r1:example.com")],
            b"{}",
        );
        assert!(!verdict.allow);

        let verdict = check(
            check_room_leave,
            &policy,
            "@alice:example.com",
            &[("room_id", "!other:example.com")],
            b"{}",
        );
        assert!(verdict.allow);
    }

    #[test]
    fn kicking_self_out_of_a_mandated_room_is_denied_but_kicking_others_passes() {
        let policy = policy(PolicyFlags::default());

        let self_kick = serde_json::json!({"user_id": "@alice:example.com"});
        let verdict = check(
            check_room_kick,
            &policy,
            "@alice:example.com",
            &[("room_id", "!r1:example.com")],
            self_kick.to_string().as_bytes(),
        );
        assert!(!verdict.allow);

        let other_kick = serde_json::json!({"user_id": "@bob:example.com"});
        let verdict = check(
            check_room_kick,
            &policy,
            "@alice:example.com",
            &[("room_id", "!r1:example.com")],
            other_kick.to_string().as_bytes(),
        );
        assert!(verdict.allow);
    }

    #[test]
    fn own_member_state_in_mandated_room_is_denied() {
        let policy = policy(PolicyFlags::default());

        let verdict = check(
            check_room_membership_state_change,
            &policy,
            "@alice:example.com",
            &[
                ("room_id", "!r1:example.com"),
                ("member_id", "@alice:example.com"),
            ],
            b"{\"membership\":\"leave\"}",
        );
        assert!(!verdict.allow);

        // Somebody else's member state passes through.
        let verdict = check(
            check_room_membership_state_change,
            &policy,
            "@alice:example.com",
            &[
                ("room_id", "!r1:example.com"),
                ("member_id", "@bob:example.com"),
            ],
            b"{\"membership\":\"leave\"}",
        );
        assert!(verdict.allow);
    }

    #[test]
    fn send_event_is_unconstrained() {
        let policy = policy(PolicyFlags::default());
        let verdict = check(
            check_room_send_event,
            &policy,
            "@alice:example.com",
            &[("room_id", "!r1:example.com")],
            b"{}",
        );
        assert!(verdict.allow);
    }
}
