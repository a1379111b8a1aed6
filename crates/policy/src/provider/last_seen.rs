//! A provider that restores and persists the last-seen policy.
//!
//! Meant for push-style deployments: policies arrive through the admin API,
//! and this provider makes sure the most recent one comes back after a
//! restart (until a fresh push arrives).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PolicyError;
use crate::model::Policy;
use crate::store::PolicyStore;

use super::PolicyProvider;

/// Restores the cached policy at startup and saves every policy the store
/// publishes back to the cache file.
pub struct LastSeenStoreProvider {
    store: Arc<PolicyStore>,
    cache_path: PathBuf,
    shutdown: CancellationToken,
}

impl LastSeenStoreProvider {
    #[must_use]
    pub fn new(store: Arc<PolicyStore>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            cache_path: cache_path.into(),
            shutdown: CancellationToken::new(),
        }
    }

    fn restore(store: &PolicyStore, cache_path: &Path) -> Result<(), PolicyError> {
        let bytes = std::fs::read(cache_path)?;
        let policy: Policy = serde_json::from_slice(&bytes)?;
        store.set(policy)?;
        Ok(())
    }

    fn persist(cache_path: &Path, policy: &Policy) -> Result<(), PolicyError> {
        let bytes = serde_json::to_vec(policy)?;
        std::fs::write(cache_path, bytes)?;
        Ok(())
    }
}

#[async_trait]
impl PolicyProvider for LastSeenStoreProvider {
    fn provider_type(&self) -> &'static str {
        "last_seen_store_policy"
    }

    async fn start(&self) -> Result<(), PolicyError> {
        info!(provider = self.provider_type(), "starting policy provider");

        // No cache yet is fine: nothing has ever been pushed.
        if self.cache_path.exists() {
            match Self::restore(&self.store, &self.cache_path) {
                Ok(()) => info!(path = %self.cache_path.display(), "restored last-seen policy"),
                Err(e) => {
                    warn!(
                        path = %self.cache_path.display(),
                        error = %e,
                        "could not restore last-seen policy"
                    );
                }
            }
        }

        let mut subscription = self.store.subscribe();
        let store = Arc::clone(&self.store);
        let cache_path = self.cache_path.clone();
        let shutdown = self.shutdown.clone();
        let subscription_id = subscription.id;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        store.unsubscribe(subscription_id);
                        debug!("last-seen policy persister stopping");
                        return;
                    }
                    published = subscription.recv() => {
                        let Some(policy) = published else { return };
                        match Self::persist(&cache_path, &policy) {
                            Ok(()) => {
                                debug!(path = %cache_path.display(), "persisted last-seen policy");
                            }
                            Err(e) => {
                                warn!(
                                    path = %cache_path.display(),
                                    error = %e,
                                    "failed persisting last-seen policy"
                                );
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) {
        info!(provider = self.provider_type(), "stopping policy provider");
        self.shutdown.cancel();
    }

    async fn reload(&self) {
        info!(provider = self.provider_type(), "reloading policy on demand");
        if let Err(e) = Self::restore(&self.store, &self.cache_path) {
            warn!(
                path = %self.cache_path.display(),
                error = %e,
                "failed to reload last-seen policy"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PolicyFlags;
    use crate::validator::Validator;

    fn empty_policy(stamp: &str) -> Policy {
        Policy {
            schema_version: 1,
            identification_stamp: Some(stamp.to_owned()),
            flags: PolicyFlags::default(),
            managed_room_ids: Vec::new(),
            users: Vec::new(),
            hooks: Vec::new(),
        }
    }

    #[tokio::test]
    async fn persists_published_policies_and_restores_them() {
        let dir = std::env::temp_dir().join(format!("warden-lsp-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cache_path = dir.join("last-policy.json");

        let store = Arc::new(PolicyStore::new(Validator::new("example.com")));
        let provider = LastSeenStoreProvider::new(Arc::clone(&store), &cache_path);
        provider.start().await.unwrap();

        store.set(empty_policy("pushed")).unwrap();

        // The persister runs on its own task; give it a moment.
        for _ in 0..50 {
            if cache_path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(cache_path.exists(), "policy cache file must be written");
        provider.stop().await;

        // A fresh store restores the pushed policy from the cache.
        let fresh_store = Arc::new(PolicyStore::new(Validator::new("example.com")));
        let restoring = LastSeenStoreProvider::new(Arc::clone(&fresh_store), &cache_path);
        restoring.start().await.unwrap();
        assert_eq!(
            fresh_store.get().unwrap().identification_stamp.as_deref(),
            Some("pushed")
        );
        restoring.stop().await;

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_cache_is_not_fatal() {
        let store = Arc::new(PolicyStore::new(Validator::new("example.com")));
        let provider =
            LastSeenStoreProvider::new(store, "/nonexistent/warden/last-policy.json");
        provider.start().await.unwrap();
        provider.stop().await;
    }
}
