use thiserror::Error;

/// Errors produced while validating, storing or providing policies.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("unsupported policy schema version: {0}")]
    UnsupportedSchemaVersion(u32),

    #[error("policy user `{user_id}` is not hosted on the managed homeserver domain ({domain})")]
    UserNotOnManagedDomain { user_id: String, domain: String },

    #[error("policy user has an empty id")]
    EmptyUserId,

    #[error("duplicate hook id `{0}`")]
    DuplicateHookId(String),

    #[error(transparent)]
    InvalidHook(#[from] warden_hook::HookError),

    #[error("policy decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("policy i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file watch error: {0}")]
    Watch(String),

    #[error("policy provider misconfigured: {0}")]
    ProviderConfiguration(String),
}
