use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeoutError {
    #[error("timeout callback already registered")]
    CallbackAlreadySet,
}
