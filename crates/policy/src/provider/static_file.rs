//! A provider that reads the policy from a JSON file on disk and watches it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PolicyError;
use crate::model::Policy;
use crate::store::PolicyStore;

use super::PolicyProvider;

/// Editors save atomically (rename + remove), so raw events arrive in bursts;
/// reloads wait for the file to settle.
const DEBOUNCE: Duration = Duration::from_secs(1);

/// Loads a policy file into the store and reloads it whenever it changes.
pub struct StaticFileProvider {
    store: Arc<PolicyStore>,
    path: PathBuf,
    shutdown: CancellationToken,
}

impl StaticFileProvider {
    #[must_use]
    pub fn new(store: Arc<PolicyStore>, path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            path: path.into(),
            shutdown: CancellationToken::new(),
        }
    }

    fn load(store: &PolicyStore, path: &Path) -> Result<(), PolicyError> {
        let bytes = std::fs::read(path)?;
        let policy: Policy = serde_json::from_slice(&bytes)?;
        store.set(policy)?;
        Ok(())
    }

    async fn watch(
        store: Arc<PolicyStore>,
        path: PathBuf,
        shutdown: CancellationToken,
    ) -> Result<(), PolicyError> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(16);

        let watched_file_name = path.file_name().map(std::ffi::OsStr::to_owned);
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let concerns_policy = event.paths.iter().any(|changed| {
                        changed.file_name().map(std::ffi::OsStr::to_owned) == watched_file_name
                    });
                    let relevant = matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    );
                    if concerns_policy && relevant {
                        // Best-effort send; a full channel means a reload is
                        // already pending.
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => warn!(error = %e, "policy file watcher error"),
            },
            notify::Config::default(),
        )
        .map_err(|e| PolicyError::Watch(e.to_string()))?;

        // Watching the parent directory survives atomic-rename saves, where
        // the original inode disappears.
        let watch_target = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        watcher
            .watch(&watch_target, RecursiveMode::NonRecursive)
            .map_err(|e| PolicyError::Watch(e.to_string()))?;

        info!(path = %path.display(), "watching policy file");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("policy file watcher stopping");
                    return Ok(());
                }
                received = rx.recv() => {
                    if received.is_none() {
                        debug!("policy file watcher channel closed");
                        return Ok(());
                    }
                }
            }

            // Debounce: let the save burst settle, then drain the queue.
            tokio::time::sleep(DEBOUNCE).await;
            while rx.try_recv().is_ok() {}

            match Self::load(&store, &path) {
                Ok(()) => info!(path = %path.display(), "reloaded policy"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to reload policy"),
            }
        }
    }
}

#[async_trait]
impl PolicyProvider for StaticFileProvider {
    fn provider_type(&self) -> &'static str {
        "static_file"
    }

    async fn start(&self) -> Result<(), PolicyError> {
        info!(provider = self.provider_type(), "starting policy provider");

        Self::load(&self.store, &self.path)?;

        let store = Arc::clone(&self.store);
        let path = self.path.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = Self::watch(store, path, shutdown).await {
                warn!(error = %e, "policy file watcher exited with error");
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
        if let Err(e) = Self::load(&self.store, &self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to reload policy");
        }
    }
}
