//! Digest-based credential comparison (md5, sha1, sha256, sha512).

use std::marker::PhantomData;

use async_trait::async_trait;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::error::AuthError;
use crate::types::AuthType;
use crate::Authenticator;

/// Verifies a password against a stored hex-encoded digest of it.
pub struct HashAuthenticator<D> {
    auth_type: AuthType,
    _digest: PhantomData<fn() -> D>,
}

impl<D> HashAuthenticator<D> {
    fn new(auth_type: AuthType) -> Self {
        Self {
            auth_type,
            _digest: PhantomData,
        }
    }
}

#[must_use]
pub fn md5() -> HashAuthenticator<Md5> {
    HashAuthenticator::new(AuthType::Md5)
}

#[must_use]
pub fn sha1() -> HashAuthenticator<Sha1> {
    HashAuthenticator::new(AuthType::Sha1)
}

#[must_use]
pub fn sha256() -> HashAuthenticator<Sha256> {
    HashAuthenticator::new(AuthType::Sha256)
}

#[must_use]
pub fn sha512() -> HashAuthenticator<Sha512> {
    HashAuthenticator::new(AuthType::Sha512)
}

#[async_trait]
impl<D: Digest + Send + Sync> Authenticator for HashAuthenticator<D> {
    fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    async fn authenticate(
        &self,
        _user_id: &str,
        given_password: &str,
        auth_credential: &str,
    ) -> Result<bool, AuthError> {
        let expected = hex::decode(auth_credential)
            .map_err(|e| AuthError::BadStoredCredential(e.to_string()))?;

        let digest = D::digest(given_password.as_bytes());

        // ct_eq over slices of unequal length is simply a non-match.
        Ok(expected.as_slice().ct_eq(digest.as_slice()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sha256_digest_matches() {
        // hex(SHA256("s3cret"))
        let credential = hex::encode(Sha256::digest(b"s3cret"));
        let authenticator = sha256();
        assert!(authenticator
            .authenticate("@carol:example.com", "s3cret", &credential)
            .await
            .unwrap());
        assert!(!authenticator
            .authenticate("@carol:example.com", "wrong", &credential)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn each_scheme_reports_its_type() {
        assert_eq!(md5().auth_type(), AuthType::Md5);
        assert_eq!(sha1().auth_type(), AuthType::Sha1);
        assert_eq!(sha256().auth_type(), AuthType::Sha256);
        assert_eq!(sha512().auth_type(), AuthType::Sha512);
    }

    #[tokio::test]
    async fn sha512_digest_matches() {
        let credential = hex::encode(Sha512::digest(b"pa55"));
        assert!(sha512()
            .authenticate("@a:example.com", "pa55", &credential)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn non_hex_credential_is_an_error() {
        let err = sha256()
            .authenticate("@a:example.com", "pw", "not-hex!")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::BadStoredCredential(_)));
    }
}
