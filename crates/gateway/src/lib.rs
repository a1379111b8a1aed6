//! The policy-enforcing HTTP gateway.
//!
//! Every Client-Server API request destined for the homeserver transits this
//! router. Enumerated endpoints go through the full pipeline -- hooks,
//! authentication, policy check, more hooks, reverse proxy with optional
//! response modification. The `/login` endpoint is intercepted for managed
//! users, everything else falls to a catch-all that still runs hooks and
//! proxies. A small internal endpoint lets the homeserver delegate password
//! checks back to us.

pub mod catchall;
pub mod hook_runner;
pub mod internal_auth;
pub mod interceptor;
pub mod mapping;
pub mod policycheck;
pub mod proxy;
pub mod responses;
pub mod routes;
pub mod server;
pub mod state;

pub use internal_auth::InternalAuthSettings;
pub use mapping::UserMappingResolver;
pub use proxy::UpstreamProxy;
pub use server::{build_router, serve};
pub use state::GatewayState;
