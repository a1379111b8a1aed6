//! The store subscription that keeps reconciliation running.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use warden_policy::{Policy, PolicyStore};

use crate::reconciler::Reconciler;

/// Subscribes to the policy store and reconciles every published policy.
///
/// At most one pass runs at a time (the loop below is the only runner).
/// A failed pass arms a retry timer; a newer policy arriving while the timer
/// is pending cancels it and takes over. Stopping cancels the subscription,
/// drops any pending retry and waits for a running pass to finish.
pub struct StoreDrivenReconciler {
    store: Arc<PolicyStore>,
    reconciler: Arc<Reconciler>,
    retry_interval: Duration,

    shutdown: CancellationToken,
    run_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StoreDrivenReconciler {
    #[must_use]
    pub fn new(
        store: Arc<PolicyStore>,
        reconciler: Arc<Reconciler>,
        retry_interval: Duration,
    ) -> Self {
        Self {
            store,
            reconciler,
            retry_interval,
            shutdown: CancellationToken::new(),
            run_handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Subscribes and spawns the run loop.
    ///
    /// The subscription is registered before this returns, so a policy
    /// provider started afterwards cannot publish anything past us.
    pub async fn start(&self) {
        let subscription = self.store.subscribe();

        let store = Arc::clone(&self.store);
        let reconciler = Arc::clone(&self.reconciler);
        let retry_interval = self.retry_interval;
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            run_loop(store, reconciler, retry_interval, subscription, shutdown).await;
        });

        *self.run_handle.lock().await = Some(handle);

        info!("started store-driven reconciler");
    }

    /// Cancels the subscription and any pending retry, then waits for a
    /// running pass to finish.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        if let Some(handle) = self.run_handle.lock().await.take() {
            let _ = handle.await;
        }

        info!("stopped store-driven reconciler");
    }
}

async fn run_loop(
    store: Arc<PolicyStore>,
    reconciler: Arc<Reconciler>,
    retry_interval: Duration,
    mut subscription: warden_policy::PolicySubscription,
    shutdown: CancellationToken,
) {
    let subscription_id = subscription.id;

    // The policy a pending retry would re-attempt, and when.
    let mut retry_policy: Option<Arc<Policy>> = None;
    let mut retry_at: Option<Instant> = None;

    loop {
        let to_reconcile: Arc<Policy>;

        tokio::select! {
            () = shutdown.cancelled() => break,

            received = subscription.recv() => {
                let Some(policy) = received else { break };
                info!("received a new policy from the store");
                // A newer policy supersedes whatever retry was pending.
                retry_policy = None;
                retry_at = None;
                to_reconcile = policy;
            }

            () = sleep_until_or_never(retry_at), if retry_at.is_some() => {
                info!("retrying reconciliation");
                retry_at = None;
                let Some(policy) = retry_policy.clone() else { continue };
                to_reconcile = policy;
            }
        }

        match reconciler.reconcile(&to_reconcile).await {
            Ok(()) => {
                info!("reconciliation completed");
                retry_policy = None;
            }
            Err(e) => {
                warn!(error = %e, retry_in_ms = retry_interval.as_millis(), "reconciliation failed, will retry");
                retry_policy = Some(to_reconcile);
                retry_at = Some(Instant::now() + retry_interval);
            }
        }
    }

    store.unsubscribe(subscription_id);
}

async fn sleep_until_or_never(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
