//! REST-delegated credential verification.
//!
//! The stored credential is a URL. We POST `{"user": {"id", "password"}}` to
//! it and expect `{"auth": {"success": bool, ...}}` back. The request and
//! response formats are shared with the gateway's own internal
//! check-credentials endpoint, so a homeserver configured to delegate
//! password checks to us can also be pointed at another service using the
//! same shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::types::AuthType;
use crate::Authenticator;

/// The request body sent to a REST authentication service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestAuthRequest {
    pub user: RestAuthRequestUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestAuthRequestUser {
    pub id: String,
    pub password: String,
}

impl RestAuthRequest {
    #[must_use]
    pub fn new(id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: RestAuthRequestUser {
                id: id.into(),
                password: password.into(),
            },
        }
    }
}

/// The response body of a REST authentication service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestAuthResponse {
    pub auth: RestAuthResponseAuth,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestAuthResponseAuth {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mxid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<RestAuthResponseProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestAuthResponseProfile {
    #[serde(default)]
    pub display_name: String,
}

impl RestAuthResponse {
    /// The canonical "no" answer.
    #[must_use]
    pub fn failure() -> Self {
        Self::default()
    }

    /// A successful answer carrying the authenticated id and profile.
    #[must_use]
    pub fn success(mxid: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            auth: RestAuthResponseAuth {
                success: true,
                mxid: Some(mxid.into()),
                profile: Some(RestAuthResponseProfile {
                    display_name: display_name.into(),
                }),
            },
        }
    }
}

/// Delegates the credential check to the service named by the credential URL.
pub struct RestAuthenticator {
    client: reqwest::Client,
}

impl RestAuthenticator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Useful for sharing a connection pool or tightening timeouts.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for RestAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for RestAuthenticator {
    fn auth_type(&self) -> AuthType {
        AuthType::Rest
    }

    async fn authenticate(
        &self,
        user_id: &str,
        given_password: &str,
        auth_credential: &str,
    ) -> Result<bool, AuthError> {
        let url = auth_credential;
        let payload = RestAuthRequest::new(user_id, given_password);

        let response = self.client.post(url).json(&payload).send().await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(AuthError::RestServiceFailed {
                url: url.to_owned(),
                status: response.status().as_u16(),
            });
        }

        let result: RestAuthResponse =
            response
                .json()
                .await
                .map_err(|e| AuthError::RestServiceBadResponse {
                    url: url.to_owned(),
                    reason: e.to_string(),
                })?;

        Ok(result.auth.success)
    }
}
