//! Policy providers: where policies come from.
//!
//! A provider feeds the [`PolicyStore`](crate::store::PolicyStore) at startup
//! and whenever its source changes. The admin API can additionally push
//! policies straight into the store; the last-seen provider exists to make
//! such pushed policies survive restarts.

mod last_seen;
mod static_file;

pub use last_seen::LastSeenStoreProvider;
pub use static_file::StaticFileProvider;

use async_trait::async_trait;

use crate::error::PolicyError;

/// A source of policy documents.
#[async_trait]
pub trait PolicyProvider: Send + Sync {
    /// Short machine name, used in configuration and logs.
    fn provider_type(&self) -> &'static str;

    /// Performs the initial load and begins watching for changes.
    async fn start(&self) -> Result<(), PolicyError>;

    /// Stops watching. Idempotent.
    async fn stop(&self);

    /// Re-reads the source on demand (admin API trigger). Failures are
    /// logged, not returned: the current policy stays in effect.
    async fn reload(&self);
}
