use serde::{Deserialize, Serialize};
use std::fmt;

/// How a managed user's credentials are verified at login time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// Plaintext comparison against the stored credential.
    Plain,
    /// Authentication is left to the homeserver; the stored credential is
    /// only the account's bootstrap password.
    Passthrough,
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Bcrypt,
    /// The credential is a URL; an external REST service answers.
    Rest,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Plain => "plain",
            Self::Passthrough => "passthrough",
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Bcrypt => "bcrypt",
            Self::Rest => "rest",
        };
        f.write_str(name)
    }
}
