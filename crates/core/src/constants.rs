//! Protocol-level string constants.

/// Canonical Matrix error codes the gateway emits or inspects.
pub const ERROR_BAD_JSON: &str = "M_BAD_JSON";
pub const ERROR_FORBIDDEN: &str = "M_FORBIDDEN";
pub const ERROR_MISSING_TOKEN: &str = "M_MISSING_TOKEN";
pub const ERROR_UNKNOWN: &str = "M_UNKNOWN";
pub const ERROR_UNKNOWN_TOKEN: &str = "M_UNKNOWN_TOKEN";
pub const ERROR_USER_IN_USE: &str = "M_USER_IN_USE";
pub const ERROR_INVALID_USERNAME: &str = "M_INVALID_USERNAME";
pub const ERROR_USER_DEACTIVATED: &str = "M_USER_DEACTIVATED";
pub const ERROR_LIMIT_EXCEEDED: &str = "M_LIMIT_EXCEEDED";
pub const ERROR_MISSING_PARAM: &str = "M_MISSING_PARAM";
pub const ERROR_NOT_FOUND: &str = "M_NOT_FOUND";

pub const LOGIN_TYPE_PASSWORD: &str = "m.login.password";
pub const LOGIN_TYPE_TOKEN: &str = "m.login.token";

pub const LOGIN_IDENTIFIER_TYPE_USER: &str = "m.id.user";
pub const LOGIN_IDENTIFIER_TYPE_THIRD_PARTY: &str = "m.id.thirdparty";
pub const LOGIN_IDENTIFIER_TYPE_PHONE: &str = "m.id.phone";

pub const REGISTRATION_TYPE_SHARED_SECRET: &str = "org.matrix.login.shared_secret";

/// Prefix added to display names of accounts that are soft-deactivated.
///
/// The Matrix protocol has no notion of enabled/disabled accounts, nor a good
/// place to store such a flag, so the convention is carried in the display
/// name itself.
pub const DEACTIVATED_ACCOUNT_PREFIX_MARKER: &str = "[x] ";

/// Account-data event type under which the avatar source-URI hash map lives.
pub const ACCOUNT_DATA_TYPE_AVATAR_SOURCE_URI_HASHES: &str =
    "org.warden.avatar_source_uri_hashes";
