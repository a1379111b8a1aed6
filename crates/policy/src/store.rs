//! The single live policy and its subscriber fan-out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::PolicyError;
use crate::model::Policy;
use crate::validator::Validator;

/// Holds the one current policy and notifies subscribers of replacements.
///
/// Published policies are immutable: readers receive an `Arc<Policy>` clone
/// and hold no lock while using it. Fan-out never blocks `set` -- subscriber
/// channels are unbounded, so a slow subscriber merely accumulates (and may
/// coalesce by only acting on the latest value it reads).
pub struct PolicyStore {
    validator: Validator,

    policy: RwLock<Option<Arc<Policy>>>,

    subscribers: Mutex<Vec<(u64, mpsc::UnboundedSender<Arc<Policy>>)>>,
    next_subscriber_id: AtomicU64,
}

/// A live subscription to policy replacements.
///
/// Dropping the subscription detaches it; the store prunes the dead channel
/// on the next publication. [`PolicyStore::unsubscribe`] detaches eagerly.
pub struct PolicySubscription {
    pub id: u64,
    receiver: mpsc::UnboundedReceiver<Arc<Policy>>,
}

impl PolicySubscription {
    /// Waits for the next published policy. `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<Arc<Policy>> {
        self.receiver.recv().await
    }
}

impl PolicyStore {
    #[must_use]
    pub fn new(validator: Validator) -> Self {
        Self {
            validator,
            policy: RwLock::new(None),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Non-blocking read of the current policy.
    #[must_use]
    pub fn get(&self) -> Option<Arc<Policy>> {
        self.policy
            .read()
            .expect("policy lock poisoned")
            .clone()
    }

    /// Validates, atomically replaces the current policy, and fans the new
    /// value out to every subscriber.
    pub fn set(&self, policy: Policy) -> Result<(), PolicyError> {
        self.validator.validate(&policy)?;

        let shared = Arc::new(policy);

        *self.policy.write().expect("policy lock poisoned") = Some(Arc::clone(&shared));

        let mut subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        subscribers.retain(|(id, sender)| {
            let delivered = sender.send(Arc::clone(&shared)).is_ok();
            if !delivered {
                debug!(subscriber = id, "pruning closed policy subscription");
            }
            delivered
        });

        Ok(())
    }

    /// Registers a new subscriber. Only policies published after this call
    /// are delivered.
    #[must_use]
    pub fn subscribe(&self) -> PolicySubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push((id, sender));
        PolicySubscription { id, receiver }
    }

    /// Detaches a subscriber eagerly, closing its channel.
    pub fn unsubscribe(&self, subscription_id: u64) {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .retain(|(id, _)| *id != subscription_id);
    }
}
