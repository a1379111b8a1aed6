//! Matrix domain vocabulary shared by every warden crate.
//!
//! This crate knows nothing about policies, hooks or reconciliation. It only
//! provides the Matrix-protocol basics the rest of the workspace speaks:
//! identifier newtypes, canonical error codes and payloads, the wire structs
//! for the Client-Server and Synapse admin APIs, and the shared-secret
//! password scheme understood by a cooperating homeserver plugin.

pub mod constants;
pub mod identity;
pub mod payloads;
pub mod secret;
pub mod types;

pub use constants::DEACTIVATED_ACCOUNT_PREFIX_MARKER;
pub use identity::{
    clean_deactivation_marker, determine_full_user_id, is_deactivated_display_name,
    is_full_user_id_of_domain, user_id_local_part,
};
pub use payloads::MatrixErrorBody;
pub use secret::{generate_initial_password, SharedSecretAuthPasswordGenerator};
pub use types::{DeviceId, RoomId, UserId};
