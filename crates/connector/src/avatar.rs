//! Reading avatar content from policy-specified source URIs.

use base64::Engine;
use sha2::{Digest, Sha512};

use crate::error::ConnectorError;

/// A fully-buffered avatar, ready for upload.
///
/// The body stays in memory: uploads may need to be retried, and a stream
/// could not be rewound.
#[derive(Debug, Clone)]
pub struct Avatar {
    /// Empty when the source URI was empty, which signals avatar removal.
    pub content_type: String,
    pub body: Vec<u8>,
    /// SHA-512 hex digest of the source URI this avatar came from.
    pub uri_hash: String,
}

/// The digest linking an uploaded avatar back to its source URI.
#[must_use]
pub fn avatar_source_uri_hash(uri: &str) -> String {
    hex::encode(Sha512::digest(uri.as_bytes()))
}

/// Fetches avatar bytes from an empty, `data:` or HTTP(S) source URI.
pub struct AvatarReader {
    client: reqwest::Client,
}

impl AvatarReader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Reads the avatar behind `avatar_uri`.
    ///
    /// - empty URI: an empty body and content type ("remove the avatar");
    /// - `data:<mime>;base64,<payload>`: decoded inline;
    /// - anything else: fetched over HTTP, non-200 is an error.
    pub async fn read(&self, avatar_uri: &str) -> Result<Avatar, ConnectorError> {
        let uri_hash = avatar_source_uri_hash(avatar_uri);

        if avatar_uri.is_empty() {
            return Ok(Avatar {
                content_type: String::new(),
                body: Vec::new(),
                uri_hash,
            });
        }

        if let Some(data_content) = avatar_uri.strip_prefix("data:") {
            // Example: data:image/jpeg;base64,BYTES
            let semicolon = data_content.find(';').ok_or_else(|| ConnectorError::AvatarRead {
                uri: avatar_uri.to_owned(),
                reason: "malformed data URI, cannot find semicolon".to_owned(),
            })?;
            let content_type = data_content[..semicolon].to_owned();

            let comma = data_content.find(',').ok_or_else(|| ConnectorError::AvatarRead {
                uri: avatar_uri.to_owned(),
                reason: "malformed data URI, cannot find comma".to_owned(),
            })?;

            let body = base64::engine::general_purpose::STANDARD
                .decode(&data_content[comma + 1..])
                .map_err(|e| ConnectorError::AvatarRead {
                    uri: avatar_uri.to_owned(),
                    reason: format!("failed to base64-decode data: {e}"),
                })?;

            return Ok(Avatar {
                content_type,
                body,
                uri_hash,
            });
        }

        // Everything else is a URL.
        let response = self.client.get(avatar_uri).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(ConnectorError::AvatarRead {
                uri: avatar_uri.to_owned(),
                reason: format!("non-200 response fetching from URL: {}", response.status()),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();

        let body = response.bytes().await?.to_vec();

        Ok(Avatar {
            content_type,
            body,
            uri_hash,
        })
    }
}

impl Default for AvatarReader {
    fn default() -> Self {
        Self::new()
    }
}
