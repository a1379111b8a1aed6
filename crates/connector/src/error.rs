use thiserror::Error;

/// Errors from talking to the upstream homeserver.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The homeserver answered with a canonical Matrix error body.
    #[error("matrix error {errcode} (HTTP {status}): {error}")]
    Matrix {
        status: u16,
        errcode: String,
        error: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A freshly-obtained token identified somebody else.
    #[error("access token for {expected} actually belongs to {actual}")]
    TokenMismatch { expected: String, actual: String },

    /// The operation needs a homeserver-specific connector variant.
    #[error("not implemented by this connector: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Identity(#[from] warden_core::identity::IdentityError),

    #[error("failed reading avatar from `{uri}`: {reason}")]
    AvatarRead { uri: String, reason: String },

    #[error("{0}")]
    Other(String),
}

impl ConnectorError {
    /// Whether this is a Matrix-level error with the given `errcode`.
    #[must_use]
    pub fn is_matrix_code(&self, code: &str) -> bool {
        matches!(self, Self::Matrix { errcode, .. } if errcode == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::constants::ERROR_LIMIT_EXCEEDED;

    #[test]
    fn matrix_code_matching() {
        let err = ConnectorError::Matrix {
            status: 429,
            errcode: ERROR_LIMIT_EXCEEDED.to_owned(),
            error: "Too Many Requests".to_owned(),
        };
        assert!(err.is_matrix_code(ERROR_LIMIT_EXCEEDED));
        assert!(!err.is_matrix_code("M_FORBIDDEN"));

        let other = ConnectorError::Other("boom".to_owned());
        assert!(!other.is_matrix_code(ERROR_LIMIT_EXCEEDED));
    }
}
