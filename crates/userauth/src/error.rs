use thiserror::Error;

use crate::types::AuthType;

/// Errors from credential checking. A failed match is not an error; these
/// mean the check could not be performed at all.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unsupported authenticator: {0}")]
    UnsupportedAuthType(AuthType),

    /// Overlong inputs are rejected before hashing to bound cost.
    #[error("rejecting overlong password ({0} bytes)")]
    PasswordTooLong(usize),

    #[error("stored credential is not usable: {0}")]
    BadStoredCredential(String),

    #[error("REST authentication call failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("non-OK HTTP response from {url}: {status}")]
    RestServiceFailed { url: String, status: u16 },

    #[error("failed decoding REST authentication response from {url}: {reason}")]
    RestServiceBadResponse { url: String, reason: String },
}
