//! Access-token to user-id resolution, cached.

use std::time::Duration;

use moka::future::Cache;
use thiserror::Error;
use tracing::debug;

use warden_core::constants::ERROR_UNKNOWN_TOKEN;
use warden_core::payloads::{MatrixErrorBody, WhoAmIResponse};
use warden_core::UserId;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The homeserver does not recognise this token. Cached, so repeated
    /// probes with a dead token cost no round-trips.
    #[error("unknown token")]
    UnknownToken,

    /// Something between us and the homeserver failed; not cached.
    #[error("failed resolving token: {0}")]
    Transient(String),
}

/// What the cache remembers about a token.
#[derive(Debug, Clone)]
enum Resolution {
    User(UserId),
    UnknownToken,
}

/// Resolves access tokens to user ids via who-am-I, with an LRU+TTL cache.
pub struct UserMappingResolver {
    homeserver_api_endpoint: String,
    client: reqwest::Client,
    cache: Cache<String, Resolution>,
}

impl UserMappingResolver {
    #[must_use]
    pub fn new(
        homeserver_api_endpoint: impl Into<String>,
        cache_capacity: u64,
        entry_ttl: Duration,
    ) -> Self {
        let homeserver_api_endpoint: String = homeserver_api_endpoint.into();
        Self {
            homeserver_api_endpoint: homeserver_api_endpoint.trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
            cache: Cache::builder()
                .max_capacity(cache_capacity)
                .time_to_live(entry_ttl)
                .build(),
        }
    }

    /// Maps a token to the user it belongs to.
    pub async fn resolve_by_access_token(&self, access_token: &str) -> Result<UserId, ResolveError> {
        if let Some(cached) = self.cache.get(access_token).await {
            return match cached {
                Resolution::User(user_id) => {
                    debug!(user_id = %user_id, "resolved token from cache");
                    Ok(user_id)
                }
                Resolution::UnknownToken => {
                    debug!("unknown token, from cache");
                    Err(ResolveError::UnknownToken)
                }
            };
        }

        debug!("token not cached, asking the homeserver");

        let url = format!(
            "{}/_matrix/client/r0/account/whoami",
            self.homeserver_api_endpoint
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ResolveError::Transient(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ResolveError::Transient(e.to_string()))?;

        if status.is_success() {
            let whoami: WhoAmIResponse = serde_json::from_slice(&bytes)
                .map_err(|e| ResolveError::Transient(e.to_string()))?;
            let user_id = UserId::new(whoami.user_id);
            self.cache
                .insert(access_token.to_owned(), Resolution::User(user_id.clone()))
                .await;
            debug!(user_id = %user_id, "resolved token from server");
            return Ok(user_id);
        }

        // Only an explicit "unknown token" answer is cached; transient
        // failures must not poison the cache.
        if let Ok(matrix_error) = serde_json::from_slice::<MatrixErrorBody>(&bytes) {
            if matrix_error.errcode == ERROR_UNKNOWN_TOKEN {
                self.cache
                    .insert(access_token.to_owned(), Resolution::UnknownToken)
                    .await;
                return Err(ResolveError::UnknownToken);
            }
        }

        Err(ResolveError::Transient(format!(
            "unexpected HTTP {status} from who-am-i"
        )))
    }
}
