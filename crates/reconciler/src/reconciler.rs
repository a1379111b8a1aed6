//! Applying a computed action list against the homeserver.

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, instrument};

use warden_connector::{
    AccessTokenContext, AvatarReader, MatrixConnector,
};
use warden_core::{
    clean_deactivation_marker, is_deactivated_display_name, DeviceId, UserId,
    DEACTIVATED_ACCOUNT_PREFIX_MARKER,
};
use warden_policy::Policy;

use crate::action::ReconciliationAction;
use crate::computator::compute_reconciliation_actions;
use crate::error::ReconcileError;

const DEVICE_ID_RECONCILER: &str = "warden-reconciler";

/// Tokens obtained for a pass stay valid this long. Passes normally finish
/// well within the window; if one does not, the context transparently
/// re-obtains on expiry. Larger values just mean fewer logins.
const TOKEN_VALIDITY_MINUTES: i64 = 12;

/// Executes reconciliation passes: read state, diff, apply.
pub struct Reconciler {
    connector: Arc<dyn MatrixConnector>,
    reconciliator_user_id: UserId,
    avatar_reader: AvatarReader,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        connector: Arc<dyn MatrixConnector>,
        reconciliator_user_id: UserId,
        avatar_reader: AvatarReader,
    ) -> Self {
        Self {
            connector,
            reconciliator_user_id,
            avatar_reader,
        }
    }

    /// Runs one full pass against the given policy.
    ///
    /// Actions apply sequentially; the first failure aborts the pass (the
    /// caller decides whether to retry). Tokens acquired along the way are
    /// always released, pass outcome notwithstanding.
    pub async fn reconcile(&self, policy: &Policy) -> Result<(), ReconcileError> {
        let ctx = AccessTokenContext::new(
            Arc::clone(&self.connector),
            DeviceId::new(DEVICE_ID_RECONCILER),
            Some(Duration::minutes(TOKEN_VALIDITY_MINUTES)),
        );

        let result = self.reconcile_with_context(&ctx, policy).await;
        ctx.release().await;
        result
    }

    async fn reconcile_with_context(
        &self,
        ctx: &AccessTokenContext,
        policy: &Policy,
    ) -> Result<(), ReconcileError> {
        let current_state = self
            .connector
            .determine_current_state(
                ctx,
                &policy.managed_user_ids(),
                &self.reconciliator_user_id,
            )
            .await
            .map_err(ReconcileError::CurrentState)?;

        let actions = compute_reconciliation_actions(&current_state, policy);
        info!(action_count = actions.len(), "computed reconciliation actions");

        for action in actions {
            self.apply(ctx, &action).await.map_err(|source| {
                ReconcileError::Action {
                    action: action.to_string(),
                    source,
                }
            })?;
            info!(action = %action, "completed reconciliation handler");
        }

        Ok(())
    }

    #[instrument(skip(self, ctx, action), fields(action = %action))]
    async fn apply(
        &self,
        ctx: &AccessTokenContext,
        action: &ReconciliationAction,
    ) -> Result<(), warden_connector::ConnectorError> {
        match action {
            ReconciliationAction::CreateUser { user_id, password } => {
                self.connector
                    .ensure_user_account_exists(user_id, password)
                    .await
            }

            ReconciliationAction::SetDisplayName {
                user_id,
                display_name,
            } => {
                self.connector
                    .set_user_display_name(ctx, user_id, display_name)
                    .await
            }

            ReconciliationAction::SetAvatar {
                user_id,
                avatar_uri,
            } => {
                // The avatar is read lazily, only when an action demands it.
                let avatar = self.avatar_reader.read(avatar_uri).await?;
                self.connector.set_user_avatar(ctx, user_id, avatar).await
            }

            ReconciliationAction::ActivateUser { user_id } => {
                let profile = self.connector.get_user_profile(ctx, user_id).await?;
                if !is_deactivated_display_name(&profile.display_name) {
                    // Already done. Nothing to do.
                    return Ok(());
                }
                let restored = clean_deactivation_marker(&profile.display_name);
                self.connector
                    .set_user_display_name(ctx, user_id, &restored)
                    .await
            }

            ReconciliationAction::DeactivateUser { user_id } => {
                let profile = self.connector.get_user_profile(ctx, user_id).await?;

                self.connector
                    .logout_all_access_tokens_for_user(ctx, user_id)
                    .await?;

                // Soft deactivation: the account stays, the marker in the
                // display name carries the state.
                if !is_deactivated_display_name(&profile.display_name) {
                    let marked =
                        format!("{DEACTIVATED_ACCOUNT_PREFIX_MARKER}{}", profile.display_name);
                    self.connector
                        .set_user_display_name(ctx, user_id, &marked)
                        .await?;
                }
                Ok(())
            }

            ReconciliationAction::JoinRoom { user_id, room_id } => {
                // The internal user invites; the managed user accepts.
                self.connector
                    .invite_user_to_room(ctx, &self.reconciliator_user_id, user_id, room_id)
                    .await?;
                self.connector.join_room(ctx, user_id, room_id).await
            }

            ReconciliationAction::LeaveRoom { user_id, room_id } => {
                self.connector.leave_room(ctx, user_id, room_id).await
            }
        }
    }
}
