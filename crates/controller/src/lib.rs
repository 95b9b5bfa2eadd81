//! Controller wiring: work queue, reconciler workers, dependency tracking,
//! execution timeouts and change-feed dispatch assembled into one loop.

pub mod controller;
pub mod error;
pub mod queue;
pub mod reconciler;

pub use controller::{Controller, ControllerBuilder};
pub use error::{ControllerError, ReconcileError};
pub use queue::WorkQueue;
pub use reconciler::{ReconcileContext, Reconciler};
