//! Bcrypt credential verification.

use async_trait::async_trait;

use crate::error::AuthError;
use crate::types::AuthType;
use crate::Authenticator;

/// Inputs longer than this are rejected outright to bound hashing cost.
const MAX_PASSWORD_LENGTH: usize = 4096;

/// Verifies a password against a stored bcrypt hash.
pub struct BcryptAuthenticator;

#[async_trait]
impl Authenticator for BcryptAuthenticator {
    fn auth_type(&self) -> AuthType {
        AuthType::Bcrypt
    }

    async fn authenticate(
        &self,
        _user_id: &str,
        given_password: &str,
        auth_credential: &str,
    ) -> Result<bool, AuthError> {
        if given_password.len() > MAX_PASSWORD_LENGTH {
            return Err(AuthError::PasswordTooLong(given_password.len()));
        }

        bcrypt::verify(given_password, auth_credential)
            .map_err(|e| AuthError::BadStoredCredential(e.to_string()))
    }
}
