//! Account-lifecycle predicates: deactivation and password changes.

use warden_core::constants::ERROR_FORBIDDEN;
use warden_userauth::AuthType;

use super::{CheckContext, PolicyCheckResponse};

/// `POST /account/deactivate`
///
/// Managed accounts live and die by the policy, never by their own hand.
pub fn check_user_deactivate(ctx: &CheckContext<'_>) -> PolicyCheckResponse {
    if ctx.policy.user_policy(ctx.user_id).is_none() {
        return PolicyCheckResponse::allow();
    }

    PolicyCheckResponse::deny(ERROR_FORBIDDEN, "Denied")
}

/// `POST /account/password`
///
/// Serves two flows: authenticated password changes and the token-less
/// forgotten-password flow. Managed non-passthrough users never change
/// passwords here (their credential lives in the policy); passthrough users
/// may, if the policy says so; the anonymous flow has its own switch.
pub fn check_user_set_password(ctx: &CheckContext<'_>) -> PolicyCheckResponse {
    if ctx.user_id.is_empty() {
        if ctx.policy.flags.allow_unauthenticated_password_resets {
            return PolicyCheckResponse::allow();
        }
        return PolicyCheckResponse::deny(ERROR_FORBIDDEN, "Denied");
    }

    let Some(user_policy) = ctx.policy.user_policy(ctx.user_id) else {
        return PolicyCheckResponse::allow();
    };

    if user_policy.auth_type == AuthType::Passthrough {
        if ctx.policy.flags.allow_custom_passthrough_user_passwords {
            return PolicyCheckResponse::allow();
        }
        return PolicyCheckResponse::deny(ERROR_FORBIDDEN, "Denied");
    }

    PolicyCheckResponse::deny(ERROR_FORBIDDEN, "Denied")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use warden_core::UserId;
    use warden_policy::{Checker, Policy, PolicyFlags, UserPolicy};

    fn policy(flags: PolicyFlags, auth_type: AuthType) -> Policy {
        Policy {
            schema_version: 1,
            identification_stamp: None,
            flags,
            managed_room_ids: Vec::new(),
            users: vec![UserPolicy {
                id: UserId::new("@alice:example.com"),
                active: true,
                auth_type,
                auth_credential: String::new(),
                display_name: String::new(),
                avatar_uri: String::new(),
                joined_room_ids: Vec::new(),
                forbid_room_creation: None,
                forbid_encrypted_room_creation: None,
                forbid_unencrypted_room_creation: None,
            }],
            hooks: Vec::new(),
        }
    }

    fn run(check_fn: super::super::PolicyCheckFn, policy: &Policy, user_id: &str) -> bool {
        let params = HashMap::new();
        let checker = Checker::new();
        check_fn(&CheckContext {
            policy,
            checker: &checker,
            user_id,
            params: &params,
            body: b"{}",
        })
        .allow
    }

    #[test]
    fn managed_users_cannot_self_deactivate() {
        let policy = policy(PolicyFlags::default(), AuthType::Plain);
        assert!(!run(check_user_deactivate, &policy, "@alice:example.com"));
        assert!(run(check_user_deactivate, &policy, "@stranger:example.com"));
    }

    #[test]
    fn managed_non_passthrough_password_changes_are_denied() {
        let policy = policy(PolicyFlags::default(), AuthType::Sha256);
        assert!(!run(check_user_set_password, &policy, "@alice:example.com"));
        assert!(run(check_user_set_password, &policy, "@stranger:example.com"));
    }

    #[test]
    fn passthrough_password_changes_follow_the_flag() {
        let denied = policy(PolicyFlags::default(), AuthType::Passthrough);
        assert!(!run(check_user_set_password, &denied, "@alice:example.com"));

        let allowed = policy(
            PolicyFlags {
                allow_custom_passthrough_user_passwords: true,
                ..PolicyFlags::default()
            },
            AuthType::Passthrough,
        );
        assert!(run(check_user_set_password, &allowed, "@alice:example.com"));
    }

    #[test]
    fn anonymous_password_resets_follow_the_flag() {
        let denied = policy(PolicyFlags::default(), AuthType::Plain);
        assert!(!run(check_user_set_password, &denied, ""));

        let allowed = policy(
            PolicyFlags {
                allow_unauthenticated_password_resets: true,
                ..PolicyFlags::default()
            },
            AuthType::Plain,
        );
        assert!(run(check_user_set_password, &allowed, ""));
    }
}
