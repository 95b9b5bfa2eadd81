use thiserror::Error;

/// Failures reading persisted object state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("listing {scope} failed: {reason}")]
    Listing { scope: String, reason: String },

    #[error("reading {key} failed: {reason}")]
    Read { key: String, reason: String },

    #[error("{0}")]
    Other(String),
}
