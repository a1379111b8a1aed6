//! Whole-document policy validation.

use std::collections::HashSet;

use warden_core::is_full_user_id_of_domain;

use crate::error::PolicyError;
use crate::model::Policy;

/// The only schema version this build understands.
const SUPPORTED_SCHEMA_VERSION: u32 = 1;

/// Validates policy documents before they may enter the store.
pub struct Validator {
    homeserver_domain_name: String,
}

impl Validator {
    #[must_use]
    pub fn new(homeserver_domain_name: impl Into<String>) -> Self {
        Self {
            homeserver_domain_name: homeserver_domain_name.into(),
        }
    }

    /// Rejects a policy when its schema version is unknown, a managed user is
    /// not hosted on our domain, or any hook is malformed (unknown shapes are
    /// already rejected at decode time by the typed model).
    pub fn validate(&self, policy: &Policy) -> Result<(), PolicyError> {
        if policy.schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(PolicyError::UnsupportedSchemaVersion(policy.schema_version));
        }

        for user in &policy.users {
            if user.id.as_str().is_empty() {
                return Err(PolicyError::EmptyUserId);
            }
            if !is_full_user_id_of_domain(user.id.as_str(), &self.homeserver_domain_name) {
                return Err(PolicyError::UserNotOnManagedDomain {
                    user_id: user.id.to_string(),
                    domain: self.homeserver_domain_name.clone(),
                });
            }
        }

        let mut seen_hook_ids = HashSet::new();
        for hook in &policy.hooks {
            hook.validate()?;
            if !seen_hook_ids.insert(hook.id.clone()) {
                return Err(PolicyError::DuplicateHookId(hook.id.clone()));
            }
        }

        Ok(())
    }
}
