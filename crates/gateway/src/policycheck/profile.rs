//! Profile predicates: display name and avatar self-edits.

use warden_core::constants::{ERROR_BAD_JSON, ERROR_FORBIDDEN};
use warden_core::is_deactivated_display_name;
use warden_core::payloads::DisplayNameRequest;

use super::{CheckContext, PolicyCheckResponse};

/// `PUT /profile/{targetUserId}/displayname`
pub fn check_profile_set_display_name(ctx: &CheckContext<'_>) -> PolicyCheckResponse {
    if ctx.user_id != ctx.param("target_user_id") {
        // Setting somebody else's name is the homeserver's problem.
        return PolicyCheckResponse::allow();
    }

    if ctx.policy.user_policy(ctx.user_id).is_none() {
        return PolicyCheckResponse::allow();
    }

    if !ctx
        .checker
        .can_user_use_custom_display_name(ctx.policy, ctx.user_id)
    {
        return PolicyCheckResponse::deny(ERROR_FORBIDDEN, "Denied by policy");
    }

    let payload: DisplayNameRequest = match serde_json::from_slice(ctx.body) {
        Ok(payload) => payload,
        Err(e) => return PolicyCheckResponse::deny(ERROR_BAD_JSON, &e.to_string()),
    };

    // Nobody gets to masquerade as a deactivated account.
    if is_deactivated_display_name(&payload.display_name) {
        return PolicyCheckResponse::deny(ERROR_FORBIDDEN, "Denied - unallowed display name");
    }

    PolicyCheckResponse::allow()
}

/// `PUT /profile/{targetUserId}/avatar_url`
pub fn check_profile_set_avatar_url(ctx: &CheckContext<'_>) -> PolicyCheckResponse {
    if ctx.user_id != ctx.param("target_user_id") {
        return PolicyCheckResponse::allow();
    }

    if ctx.policy.user_policy(ctx.user_id).is_none() {
        return PolicyCheckResponse::allow();
    }

    if !ctx
        .checker
        .can_user_use_custom_avatar(ctx.policy, ctx.user_id)
    {
        return PolicyCheckResponse::deny(ERROR_FORBIDDEN, "Denied by policy");
    }

    PolicyCheckResponse::allow()
}
