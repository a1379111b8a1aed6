//! Per-device access-token pooling.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, warn};

use warden_core::{DeviceId, UserId};

use crate::connector::MatrixConnector;
use crate::error::ConnectorError;

/// One pooled token, possibly with an expiry.
#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    valid_until: Option<DateTime<Utc>>,
}

impl AccessToken {
    fn expired(&self) -> bool {
        self.valid_until.is_some_and(|valid_until| valid_until < Utc::now())
    }
}

/// Amortizes per-user login credentials across a unit of work.
///
/// Reconciliation passes create one of these, pull tokens for whichever
/// managed users they need to act as, and release everything at the end.
/// Lookups for different users never block each other; two concurrent
/// lookups for the *same* user may both log in -- duplicated work, not an
/// error, and the spare token simply gets destroyed on release.
pub struct AccessTokenContext {
    connector: Arc<dyn MatrixConnector>,
    device_id: DeviceId,
    /// `None` means tokens should never expire (the internal long-lived
    /// context); otherwise each obtained token carries this validity window.
    validity: Option<Duration>,

    tokens: DashMap<UserId, AccessToken>,
}

impl AccessTokenContext {
    #[must_use]
    pub fn new(
        connector: Arc<dyn MatrixConnector>,
        device_id: DeviceId,
        validity: Option<Duration>,
    ) -> Self {
        Self {
            connector,
            device_id,
            validity,
            tokens: DashMap::new(),
        }
    }

    /// Returns a working token for the user, obtaining one if the pool has
    /// none (or only an expired one).
    ///
    /// Freshly-obtained tokens are verified with a who-am-I call before
    /// being pooled; a token identifying somebody else is an error.
    pub async fn get_token(&self, user_id: &UserId) -> Result<String, ConnectorError> {
        if let Some(entry) = self.tokens.get(user_id) {
            if !entry.expired() {
                return Ok(entry.token.clone());
            }
            // Expired entries cannot be destroyed upstream (the server
            // already refuses them); forget and re-obtain.
            drop(entry);
            debug!(user_id = %user_id, "pooled access token expired, re-obtaining");
            self.clear(user_id);
        }

        let valid_until = self.validity.map(|validity| Utc::now() + validity);

        let token = self
            .connector
            .obtain_new_access_token_for_user_id(user_id, &self.device_id, valid_until)
            .await?;

        self.connector.verify_access_token(user_id, &token).await?;

        self.tokens.insert(
            user_id.clone(),
            AccessToken {
                token: token.clone(),
                valid_until,
            },
        );

        Ok(token)
    }

    /// Forgets the pooled token for one user, without destroying it.
    pub fn clear(&self, user_id: &UserId) {
        self.tokens.remove(user_id);
    }

    /// Destroys every pooled token, in parallel, best-effort: cleanup
    /// failures are logged and swallowed.
    pub async fn release(&self) {
        let drained: Vec<(UserId, AccessToken)> = {
            let mut entries = Vec::new();
            for entry in self.tokens.iter() {
                entries.push((entry.key().clone(), entry.value().clone()));
            }
            self.tokens.clear();
            entries
        };

        let destructions = drained.into_iter().map(|(user_id, token)| {
            let connector = Arc::clone(&self.connector);
            async move {
                if let Err(e) = connector.destroy_access_token(&user_id, &token.token).await {
                    warn!(user_id = %user_id, error = %e, "failed destroying access token");
                }
            }
        });

        join_all(destructions).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use warden_core::payloads::ProfileResponse;
    use warden_core::RoomId;

    use crate::avatar::Avatar;
    use crate::state::CurrentState;

    /// Counts logins/logouts and hands out sequential tokens.
    #[derive(Default)]
    struct CountingConnector {
        obtained: AtomicU32,
        destroyed: Mutex<Vec<String>>,
        verify_failures: AtomicU32,
    }

    #[async_trait]
    impl MatrixConnector for CountingConnector {
        async fn obtain_new_access_token_for_user_id(
            &self,
            user_id: &UserId,
            _device_id: &DeviceId,
            _valid_until: Option<DateTime<Utc>>,
        ) -> Result<String, ConnectorError> {
            let n = self.obtained.fetch_add(1, Ordering::SeqCst);
            Ok(format!("token-{}-{n}", user_id.as_str()))
        }

        async fn verify_access_token(
            &self,
            _user_id: &UserId,
            _access_token: &str,
        ) -> Result<(), ConnectorError> {
            if self.verify_failures.load(Ordering::SeqCst) > 0 {
                self.verify_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ConnectorError::TokenMismatch {
                    expected: "someone".to_owned(),
                    actual: "someone-else".to_owned(),
                });
            }
            Ok(())
        }

        async fn destroy_access_token(
            &self,
            _user_id: &UserId,
            access_token: &str,
        ) -> Result<(), ConnectorError> {
            self.destroyed.lock().unwrap().push(access_token.to_owned());
            Ok(())
        }

        async fn logout_all_access_tokens_for_user(
            &self,
            _ctx: &AccessTokenContext,
            _user_id: &UserId,
        ) -> Result<(), ConnectorError> {
            Ok(())
        }

        async fn ensure_user_account_exists(
            &self,
            _user_id: &UserId,
            _initial_password: &str,
        ) -> Result<(), ConnectorError> {
            Ok(())
        }

        async fn determine_current_state(
            &self,
            _ctx: &AccessTokenContext,
            _managed_user_ids: &[UserId],
            _admin_user_id: &UserId,
        ) -> Result<CurrentState, ConnectorError> {
            Ok(CurrentState::default())
        }

        async fn get_user_profile(
            &self,
            _ctx: &AccessTokenContext,
            _user_id: &UserId,
        ) -> Result<ProfileResponse, ConnectorError> {
            Ok(ProfileResponse::default())
        }

        async fn set_user_display_name(
            &self,
            _ctx: &AccessTokenContext,
            _user_id: &UserId,
            _display_name: &str,
        ) -> Result<(), ConnectorError> {
            Ok(())
        }

        async fn set_user_avatar(
            &self,
            _ctx: &AccessTokenContext,
            _user_id: &UserId,
            _avatar: Avatar,
        ) -> Result<(), ConnectorError> {
            Ok(())
        }

        async fn invite_user_to_room(
            &self,
            _ctx: &AccessTokenContext,
            _inviter_id: &UserId,
            _invitee_id: &UserId,
            _room_id: &RoomId,
        ) -> Result<(), ConnectorError> {
            Ok(())
        }

        async fn join_room(
            &self,
            _ctx: &AccessTokenContext,
            _user_id: &UserId,
            _room_id: &RoomId,
        ) -> Result<(), ConnectorError> {
            Ok(())
        }

        async fn leave_room(
            &self,
            _ctx: &AccessTokenContext,
            _user_id: &UserId,
            _room_id: &RoomId,
        ) -> Result<(), ConnectorError> {
            Ok(())
        }

        async fn kick_user_from_room(
            &self,
            _ctx: &AccessTokenContext,
            _kicker_user_id: &UserId,
            _kickee_user_id: &UserId,
            _room_id: &RoomId,
        ) -> Result<(), ConnectorError> {
            Ok(())
        }
    }

    fn context_with(
        connector: Arc<CountingConnector>,
        validity: Option<Duration>,
    ) -> AccessTokenContext {
        AccessTokenContext::new(connector, DeviceId::new("test-device"), validity)
    }

    #[tokio::test]
    async fn tokens_are_reused_until_released() {
        let connector = Arc::new(CountingConnector::default());
        let ctx = context_with(Arc::clone(&connector), None);
        let alice = UserId::new("@alice:example.com");

        let first = ctx.get_token(&alice).await.unwrap();
        let second = ctx.get_token(&alice).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(connector.obtained.load(Ordering::SeqCst), 1);

        ctx.release().await;
        assert_eq!(connector.destroyed.lock().unwrap().as_slice(), &[first]);

        // After release the pool is empty and a new login happens.
        let third = ctx.get_token(&alice).await.unwrap();
        assert_ne!(third, second);
    }

    #[tokio::test]
    async fn expired_tokens_are_replaced() {
        let connector = Arc::new(CountingConnector::default());
        // Negative validity: every token is born expired.
        let ctx = context_with(Arc::clone(&connector), Some(Duration::seconds(-1)));
        let alice = UserId::new("@alice:example.com");

        let first = ctx.get_token(&alice).await.unwrap();
        let second = ctx.get_token(&alice).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(connector.obtained.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn verification_failure_is_not_pooled() {
        let connector = Arc::new(CountingConnector::default());
        connector.verify_failures.store(1, Ordering::SeqCst);
        let ctx = context_with(Arc::clone(&connector), None);
        let alice = UserId::new("@alice:example.com");

        assert!(ctx.get_token(&alice).await.is_err());

        // The next call starts clean and succeeds.
        ctx.get_token(&alice).await.unwrap();
    }

    #[tokio::test]
    async fn clear_forgets_without_destroying() {
        let connector = Arc::new(CountingConnector::default());
        let ctx = context_with(Arc::clone(&connector), None);
        let alice = UserId::new("@alice:example.com");

        ctx.get_token(&alice).await.unwrap();
        ctx.clear(&alice);
        assert!(connector.destroyed.lock().unwrap().is_empty());

        ctx.get_token(&alice).await.unwrap();
        assert_eq!(connector.obtained.load(Ordering::SeqCst), 2);
    }
}
