//! Homeserver connectivity.
//!
//! The [`MatrixConnector`] trait abstracts every operation the reconciler and
//! gateway need from the upstream homeserver. [`ApiConnector`] implements the
//! implementation-agnostic parts over the Client-Server API;
//! [`SynapseConnector`] layers the Synapse-specific admin APIs (account
//! registration, admin user listing, admin token minting) on top of it.

pub mod api;
pub mod avatar;
pub mod connector;
pub mod error;
pub mod retry;
pub mod state;
pub mod synapse;
pub mod token_context;

pub use api::ApiConnector;
pub use avatar::{avatar_source_uri_hash, Avatar, AvatarReader};
pub use connector::MatrixConnector;
pub use error::ConnectorError;
pub use retry::with_rate_limit_retries;
pub use state::{CurrentState, CurrentUserState};
pub use synapse::SynapseConnector;
pub use token_context::AccessTokenContext;
