//! Cache-fallback wrapping for flaky authenticators.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::AuthError;
use crate::types::AuthType;
use crate::Authenticator;

/// Wraps another authenticator for resilience.
///
/// The inner authenticator is always attempted first -- fresh data beats
/// cached data. When it fails (not "wrong password", but "could not check"),
/// the last outcome cached for the same `(user, password, credential)` triple
/// is served instead, for as long as the cache retains it.
///
/// Used for the REST scheme, where a short outage of the remote service
/// would otherwise lock every managed user out.
pub struct CacheFallbackAuthenticator {
    auth_type: AuthType,
    inner: Arc<dyn Authenticator>,
    cache: moka::sync::Cache<String, bool>,
}

impl CacheFallbackAuthenticator {
    #[must_use]
    pub fn new(
        auth_type: AuthType,
        inner: Arc<dyn Authenticator>,
        cache_capacity: u64,
    ) -> Self {
        Self {
            auth_type,
            inner,
            cache: moka::sync::Cache::new(cache_capacity),
        }
    }

    /// Outcomes are keyed by a digest of the whole triple, so a changed
    /// credential or password can never serve a stale answer.
    fn cache_key(user_id: &str, given_password: &str, auth_credential: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(user_id.as_bytes());
        hasher.update(b"|");
        hasher.update(given_password.as_bytes());
        hasher.update(b"|");
        hasher.update(auth_credential.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl Authenticator for CacheFallbackAuthenticator {
    fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    async fn authenticate(
        &self,
        user_id: &str,
        given_password: &str,
        auth_credential: &str,
    ) -> Result<bool, AuthError> {
        let key = Self::cache_key(user_id, given_password, auth_credential);

        match self
            .inner
            .authenticate(user_id, given_password, auth_credential)
            .await
        {
            Ok(is_authenticated) => {
                // Remember this outcome in case the next check cannot reach
                // the source of truth.
                self.cache.insert(key, is_authenticated);
                Ok(is_authenticated)
            }
            Err(upstream_error) => match self.cache.get(&key) {
                Some(cached) => {
                    info!(
                        user_id,
                        error = %upstream_error,
                        "serving cached auth outcome after upstream authenticator failure"
                    );
                    Ok(cached)
                }
                None => Err(upstream_error),
            },
        }
    }
}
