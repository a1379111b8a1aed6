//! Shared-secret credential derivation.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Generates the "fake" passwords a cooperating homeserver password-provider
/// plugin accepts as a bypass credential.
///
/// The password for a user is `hex(HMAC-SHA512(shared_secret, full_user_id))`.
/// The homeserver must be configured with the same shared secret, otherwise
/// login rewriting and token acquisition will fail across the board.
#[derive(Clone)]
pub struct SharedSecretAuthPasswordGenerator {
    shared_secret: String,
}

impl SharedSecretAuthPasswordGenerator {
    #[must_use]
    pub fn new(shared_secret: impl Into<String>) -> Self {
        Self {
            shared_secret: shared_secret.into(),
        }
    }

    /// Derive the bypass password for the given full user id.
    #[must_use]
    pub fn generate_for_user_id(&self, user_id: &str) -> String {
        let mut mac = HmacSha512::new_from_slice(self.shared_secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(user_id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Generates an initial account password that is never meant to be given out.
///
/// Accounts whose authentication we handle ourselves are created with such a
/// throwaway password. Whenever a token is needed later, it is obtained via
/// the shared-secret credential instead, so the actual stored password is
/// irrelevant.
#[must_use]
pub fn generate_initial_password() -> String {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
