//! The authenticator registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bcrypt::BcryptAuthenticator;
use crate::caching::CacheFallbackAuthenticator;
use crate::error::AuthError;
use crate::hash;
use crate::plain::PlainAuthenticator;
use crate::rest::RestAuthenticator;
use crate::types::AuthType;
use crate::Authenticator;

/// Dispatches credential checks to the authenticator registered for the
/// user's scheme.
pub struct Checker {
    authenticators: HashMap<AuthType, Arc<dyn Authenticator>>,
}

impl Checker {
    /// An empty registry. Register authenticators before checking.
    #[must_use]
    pub fn new() -> Self {
        Self {
            authenticators: HashMap::new(),
        }
    }

    /// The standard production registry: plain, the digest family, bcrypt,
    /// and REST wrapped in a cache fallback so a remote-service outage keeps
    /// serving last-seen outcomes.
    #[must_use]
    pub fn with_standard_authenticators(rest_cache_capacity: u64) -> Self {
        let mut checker = Self::new();
        checker.register(Arc::new(PlainAuthenticator));
        checker.register(Arc::new(hash::md5()));
        checker.register(Arc::new(hash::sha1()));
        checker.register(Arc::new(hash::sha256()));
        checker.register(Arc::new(hash::sha512()));
        checker.register(Arc::new(BcryptAuthenticator));
        checker.register(Arc::new(CacheFallbackAuthenticator::new(
            AuthType::Rest,
            Arc::new(RestAuthenticator::new()),
            rest_cache_capacity,
        )));
        checker
    }

    pub fn register(&mut self, authenticator: Arc<dyn Authenticator>) {
        self.authenticators
            .insert(authenticator.auth_type(), authenticator);
    }

    /// Checks `given_password` for `user_id` under the given scheme.
    pub async fn check(
        &self,
        user_id: &str,
        given_password: &str,
        auth_type: AuthType,
        auth_credential: &str,
    ) -> Result<bool, AuthError> {
        let authenticator = self
            .authenticators
            .get(&auth_type)
            .ok_or(AuthError::UnsupportedAuthType(auth_type))?;

        authenticator
            .authenticate(user_id, given_password, auth_credential)
            .await
    }
}

impl Default for Checker {
    fn default() -> Self {
        Self::new()
    }
}
