//! The pure reconciliation diff.
//!
//! No I/O happens here: the caller supplies the observed upstream state, and
//! this module answers with the ordered actions that would align it with the
//! policy. Action order matters -- most prominently, membership leaves are
//! scheduled ahead of deactivation, because leaving first is cleaner.

use tracing::warn;

use warden_connector::{avatar_source_uri_hash, CurrentState, CurrentUserState};
use warden_core::generate_initial_password;
use warden_policy::{AuthType, Policy, UserPolicy};

use crate::action::ReconciliationAction;

/// Computes the ordered action list that drives `current_state` toward
/// `policy`. Users are processed in policy order.
#[must_use]
pub fn compute_reconciliation_actions(
    current_state: &CurrentState,
    policy: &Policy,
) -> Vec<ReconciliationAction> {
    let mut actions = Vec::new();

    for user_policy in &policy.users {
        let current = current_state.user_state(user_policy.id.as_str());
        compute_user_changes(current, policy, user_policy, &mut actions);
    }

    actions
}

fn compute_user_changes(
    current: Option<&CurrentUserState>,
    policy: &Policy,
    user_policy: &UserPolicy,
    actions: &mut Vec<ReconciliationAction>,
) {
    compute_activation_changes(current, policy, user_policy, actions);

    if !user_policy.active {
        // Accounts that never existed, or that are being deactivated now, do
        // not go through profile and membership alignment. Leaves still
        // happen: activation-change computation schedules them ahead of the
        // deactivation itself.
        return;
    }

    let Some(current) = current else {
        // Brand-new account: it gets created first, profile data applies
        // regardless of the custom-name/avatar flags.
        if !user_policy.display_name.is_empty() {
            actions.push(ReconciliationAction::SetDisplayName {
                user_id: user_policy.id.clone(),
                display_name: user_policy.display_name.clone(),
            });
        }
        if !user_policy.avatar_uri.is_empty() {
            actions.push(ReconciliationAction::SetAvatar {
                user_id: user_policy.id.clone(),
                avatar_uri: user_policy.avatar_uri.clone(),
            });
        }
        compute_room_changes(None, policy, user_policy, actions);
        return;
    };

    compute_display_name_changes(current, policy, user_policy, actions);
    compute_avatar_changes(current, policy, user_policy, actions);
    compute_room_changes(Some(current), policy, user_policy, actions);
}

fn compute_activation_changes(
    current: Option<&CurrentUserState>,
    policy: &Policy,
    user_policy: &UserPolicy,
    actions: &mut Vec<ReconciliationAction>,
) {
    let Some(current) = current else {
        if user_policy.active {
            actions.push(ReconciliationAction::CreateUser {
                user_id: user_policy.id.clone(),
                password: generate_initial_password_for_user(user_policy),
            });
        }
        return;
    };

    if !user_policy.active {
        // Make the account leave all managed rooms before deactivating it.
        compute_room_changes(Some(current), policy, user_policy, actions);
    }

    if current.active {
        if !user_policy.active {
            actions.push(ReconciliationAction::DeactivateUser {
                user_id: user_policy.id.clone(),
            });
        }
    } else if user_policy.active {
        actions.push(ReconciliationAction::ActivateUser {
            user_id: user_policy.id.clone(),
        });
    }
}

fn compute_display_name_changes(
    current: &CurrentUserState,
    policy: &Policy,
    user_policy: &UserPolicy,
    actions: &mut Vec<ReconciliationAction>,
) {
    let should_set = if policy.flags.allow_custom_user_display_names {
        // Custom names are allowed, but empty names are still worth filling
        // in -- if the policy has something to offer.
        current.display_name.is_empty() && !user_policy.display_name.is_empty()
    } else {
        current.display_name != user_policy.display_name
    };

    if should_set {
        actions.push(ReconciliationAction::SetDisplayName {
            user_id: user_policy.id.clone(),
            display_name: user_policy.display_name.clone(),
        });
    }
}

fn compute_avatar_changes(
    current: &CurrentUserState,
    policy: &Policy,
    user_policy: &UserPolicy,
    actions: &mut Vec<ReconciliationAction>,
) {
    let should_set = if policy.flags.allow_custom_user_avatars {
        current.avatar_source_uri_hash == avatar_source_uri_hash("")
            && !user_policy.avatar_uri.is_empty()
    } else {
        current.avatar_source_uri_hash != avatar_source_uri_hash(&user_policy.avatar_uri)
    };

    if should_set {
        actions.push(ReconciliationAction::SetAvatar {
            user_id: user_policy.id.clone(),
            avatar_uri: user_policy.avatar_uri.clone(),
        });
    }
}

fn compute_room_changes(
    current: Option<&CurrentUserState>,
    policy: &Policy,
    user_policy: &UserPolicy,
    actions: &mut Vec<ReconciliationAction>,
) {
    let is_managed = |room_id: &str| {
        policy
            .managed_room_ids
            .iter()
            .any(|managed| managed.as_str() == room_id)
    };

    for room_id in &user_policy.joined_room_ids {
        if !is_managed(room_id.as_str()) {
            warn!(
                user_id = %user_policy.id,
                room_id = %room_id,
                "user is supposed to be joined to a room that is not managed"
            );
            continue;
        }

        if current.is_some_and(|current| current.is_joined_to_room(room_id.as_str())) {
            continue;
        }

        actions.push(ReconciliationAction::JoinRoom {
            user_id: user_policy.id.clone(),
            room_id: room_id.clone(),
        });
    }

    if let Some(current) = current {
        for room_id in &current.joined_room_ids {
            // Rooms we do not manage are rightfully ignored.
            if !is_managed(room_id.as_str()) {
                continue;
            }

            if user_policy.is_joined_to_room(room_id.as_str()) {
                continue;
            }

            actions.push(ReconciliationAction::LeaveRoom {
                user_id: user_policy.id.clone(),
                room_id: room_id.clone(),
            });
        }
    }
}

/// Passthrough users are created with the policy-specified initial password;
/// the homeserver authenticates them from then on. Everyone else gets a
/// random throwaway password -- tokens for them are minted via the shared
/// secret, never via the stored password.
fn generate_initial_password_for_user(user_policy: &UserPolicy) -> String {
    if user_policy.auth_type == AuthType::Passthrough {
        return user_policy.auth_credential.clone();
    }

    generate_initial_password()
}
