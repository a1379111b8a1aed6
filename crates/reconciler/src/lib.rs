//! Reconciliation: driving the homeserver's observable state toward the
//! policy.
//!
//! The [`computator`] is a pure diff: `(current state, policy)` in, an
//! ordered action list out. The [`Reconciler`] applies such a list through
//! the connector, one action at a time. The [`StoreDrivenReconciler`] ties
//! it to the policy store: every published policy triggers a pass, failures
//! retry on a timer, and a newer policy supersedes any pending retry.

pub mod action;
pub mod computator;
pub mod error;
pub mod reconciler;
pub mod store_driven;

pub use action::ReconciliationAction;
pub use computator::compute_reconciliation_actions;
pub use error::ReconcileError;
pub use reconciler::Reconciler;
pub use store_driven::StoreDrivenReconciler;
