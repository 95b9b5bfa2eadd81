use thiserror::Error;

use requeue_timeout::TimeoutError;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("controller has no reconciler")]
    MissingReconciler,

    #[error("controller has no object lister")]
    MissingLister,

    #[error("controller built outside a tokio runtime and no runtime handle given")]
    NoRuntime,

    #[error("timeout handler: {0}")]
    Timeout(#[from] TimeoutError),
}

/// Failure reported by reconciliation logic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Retried after the configured delay.
    #[error("transient: {0}")]
    Transient(String),

    /// Not retried; the next change or resync will revisit the object.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl ReconcileError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ReconcileError::Permanent(_))
    }
}
