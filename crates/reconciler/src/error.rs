use thiserror::Error;

use warden_connector::ConnectorError;

/// Errors from a reconciliation pass. Never user-visible: the store-driven
/// reconciler logs and retries.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failure determining current state: {0}")]
    CurrentState(#[source] ConnectorError),

    #[error("failed reconciliation handler {action}: {source}")]
    Action {
        action: String,
        #[source]
        source: ConnectorError,
    },
}
