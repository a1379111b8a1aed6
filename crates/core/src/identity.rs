//! Helpers for working with Matrix user identifiers and the soft-deactivation
//! display-name convention.

use thiserror::Error;

use crate::constants::DEACTIVATED_ACCOUNT_PREFIX_MARKER;
use crate::types::UserId;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("empty user id")]
    EmptyUserId,

    #[error("user id `{0}` has no local part")]
    NoLocalPart(String),
}

/// Takes a user id (local part or full) and promotes it to a full Matrix user
/// id on the given homeserver domain, if it is not one already.
///
/// A value already starting with `@` is considered full and returned as-is,
/// regardless of which domain it points at.
pub fn determine_full_user_id(
    user_id_local_or_full: &str,
    homeserver_domain_name: &str,
) -> Result<UserId, IdentityError> {
    if user_id_local_or_full.is_empty() {
        return Err(IdentityError::EmptyUserId);
    }

    if user_id_local_or_full.starts_with('@') {
        return Ok(UserId::new(user_id_local_or_full));
    }

    Ok(UserId::new(format!(
        "@{user_id_local_or_full}:{homeserver_domain_name}"
    )))
}

/// Tells whether the given full user id is hosted on the given domain.
///
/// This is a syntactic check on the trailing `:domain` part.
#[must_use]
pub fn is_full_user_id_of_domain(user_id_full: &str, homeserver_domain_name: &str) -> bool {
    user_id_full.ends_with(&format!(":{homeserver_domain_name}"))
}

/// Extracts the local part out of a full user id (`@local:domain` -> `local`).
pub fn user_id_local_part(user_id_full: &str) -> Result<String, IdentityError> {
    let without_sigil = user_id_full
        .strip_prefix('@')
        .ok_or_else(|| IdentityError::NoLocalPart(user_id_full.to_owned()))?;

    let (local, _domain) = without_sigil
        .split_once(':')
        .ok_or_else(|| IdentityError::NoLocalPart(user_id_full.to_owned()))?;

    if local.is_empty() {
        return Err(IdentityError::NoLocalPart(user_id_full.to_owned()));
    }

    Ok(local.to_owned())
}

/// Tells whether the account appears deactivated, judging by its display name.
#[must_use]
pub fn is_deactivated_display_name(display_name: &str) -> bool {
    display_name.contains(DEACTIVATED_ACCOUNT_PREFIX_MARKER)
}

/// Removes the deactivation marker prefix from a display name.
#[must_use]
pub fn clean_deactivation_marker(display_name: &str) -> String {
    display_name
        .strip_prefix(DEACTIVATED_ACCOUNT_PREFIX_MARKER)
        .unwrap_or(display_name)
        .to_owned()
}
