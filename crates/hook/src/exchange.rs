//! Buffered request/response carriers the hook machinery operates on.
//!
//! The gateway fully buffers request bodies before hooks run (a consulted
//! REST service needs the payload even after the upstream dispatch would
//! have consumed it) and buffers upstream response bodies whenever a
//! modifier chain is installed.

use std::collections::HashMap;

use warden_core::UserId;

/// An in-flight client request, as seen and mutated by hooks.
///
/// `pass.modifiedRequest` hooks edit `body` and `headers` in place; the
/// gateway forwards whatever state this carrier holds once the before-chain
/// finishes.
#[derive(Debug, Clone)]
pub struct HookRequest {
    /// The raw request URI, escape sequences and query string included.
    pub uri: String,

    /// The parsed path (no query string).
    pub path: String,

    pub method: String,

    /// Header names mapped to their comma-joined values.
    pub headers: HashMap<String, String>,

    pub body: Vec<u8>,

    /// Set once the gateway has resolved the access token to a user.
    pub authenticated_user_id: Option<UserId>,
}

impl HookRequest {
    /// Replaces the body and keeps the advertised length in sync.
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.headers
            .insert("Content-Length".to_owned(), body.len().to_string());
        self.body = body;
    }
}

/// A buffered upstream response being shaped by response modifiers.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    /// Replaces the body and keeps the advertised length in sync.
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.headers
            .insert("Content-Length".to_owned(), body.len().to_string());
        self.body = body;
    }
}

/// A terminal response produced by a hook (`respond`/`reject`), to be sent
/// instead of proxying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}
