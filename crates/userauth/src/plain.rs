//! Plaintext credential comparison.

use async_trait::async_trait;
use subtle::ConstantTimeEq;

use crate::error::AuthError;
use crate::types::AuthType;
use crate::Authenticator;

/// Compares the given password against the stored plaintext credential in
/// constant time.
pub struct PlainAuthenticator;

#[async_trait]
impl Authenticator for PlainAuthenticator {
    fn auth_type(&self) -> AuthType {
        AuthType::Plain
    }

    async fn authenticate(
        &self,
        _user_id: &str,
        given_password: &str,
        auth_credential: &str,
    ) -> Result<bool, AuthError> {
        Ok(given_password
            .as_bytes()
            .ct_eq(auth_credential.as_bytes())
            .into())
    }
}
