//! Credential checking for managed users.
//!
//! Each managed user carries an authentication scheme (`authType`) and an
//! opaque credential whose meaning depends on that scheme. The [`Checker`]
//! is a dispatch table over [`Authenticator`] implementations, one per
//! scheme. Passthrough is the exception: it is never evaluated here, the
//! homeserver authenticates those users itself.

pub mod bcrypt;
pub mod caching;
pub mod checker;
pub mod error;
pub mod hash;
pub mod plain;
pub mod rest;
pub mod types;

pub use caching::CacheFallbackAuthenticator;
pub use checker::Checker;
pub use error::AuthError;
pub use rest::{RestAuthRequest, RestAuthResponse, RestAuthenticator};
pub use types::AuthType;

use async_trait::async_trait;

/// One way of verifying a password against a stored credential.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// The scheme this authenticator handles.
    fn auth_type(&self) -> AuthType;

    /// Verifies `given_password` for `user_id` against `auth_credential`.
    ///
    /// `Ok(false)` means the credentials simply do not match; `Err` means the
    /// check itself could not be carried out.
    async fn authenticate(
        &self,
        user_id: &str,
        given_password: &str,
        auth_credential: &str,
    ) -> Result<bool, AuthError>;
}
