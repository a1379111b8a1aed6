//! Per-route policy predicates.
//!
//! Each enumerated gateway route binds one of these functions. They are
//! pure: policy, authenticated user, path parameters and the buffered body
//! go in; an allow/deny verdict comes out.

pub mod profile;
pub mod room;
pub mod user;

use std::collections::HashMap;

use warden_policy::{Checker, Policy};

pub use profile::{check_profile_set_avatar_url, check_profile_set_display_name};
pub use room::{
    check_room_create, check_room_encryption_state_change, check_room_kick, check_room_leave,
    check_room_membership_state_change, check_room_send_event,
};
pub use user::{check_user_deactivate, check_user_set_password};

/// Everything a predicate may look at.
pub struct CheckContext<'a> {
    pub policy: &'a Policy,
    pub checker: &'a Checker,

    /// Empty for the unauthenticated flows some routes permit.
    pub user_id: &'a str,

    /// Path parameters of the matched route (`room_id`, `member_id`, ...).
    pub params: &'a HashMap<String, String>,

    /// The buffered request body.
    pub body: &'a [u8],
}

impl CheckContext<'_> {
    pub(crate) fn param(&self, name: &str) -> &str {
        self.params.get(name).map_or("", String::as_str)
    }
}

/// A predicate's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyCheckResponse {
    pub allow: bool,
    pub error_code: String,
    pub error_message: String,
}

impl PolicyCheckResponse {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allow: true,
            error_code: String::new(),
            error_message: String::new(),
        }
    }

    #[must_use]
    pub fn deny(error_code: &str, error_message: &str) -> Self {
        Self {
            allow: false,
            error_code: error_code.to_owned(),
            error_message: error_message.to_owned(),
        }
    }
}

/// The signature every route predicate satisfies.
pub type PolicyCheckFn = fn(&CheckContext<'_>) -> PolicyCheckResponse;
