use thiserror::Error;

/// Errors surfaced by hook validation and execution.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook document itself is malformed (caught at policy validation).
    #[error("{0}")]
    Invalid(String),

    #[error("invalid match rule regex `{0}`: {1}")]
    InvalidMatchRuleRegex(String, String),

    /// A hook arrived at the executor without an action.
    #[error("hook #{0} has no action")]
    MissingAction(String),

    /// Required action-payload data was absent at execution time.
    #[error("hook #{0}: {1}")]
    MissingActionField(String, &'static str),

    /// The REST service could not be consulted successfully.
    #[error("consulting {url} failed after {attempts} attempt(s): {reason}")]
    ConsultFailed {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// A consulted service answered an after-phase hook with
    /// `pass.modifiedRequest` -- too late to rewrite the request.
    #[error("hook #{0}: cannot modify the request from an after hook")]
    RequestModificationTooLate(String),

    /// `pass.modifiedRequest` against a request body that is not a JSON
    /// object.
    #[error("request body is not a JSON object: {0}")]
    RequestBodyNotJsonObject(String),

    /// `pass.modifiedResponse` against an upstream body that is not a JSON
    /// object. Deliberately fatal: silently forwarding an unmodified
    /// response would hide the expectation mismatch.
    #[error("upstream response body is not a JSON object: {0}")]
    ResponseBodyNotJsonObject(String),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `respond` with serialization disabled requires a string payload.
    #[error("hook #{0}: could not interpret response payload as a string")]
    PayloadNotAString(String),
}
