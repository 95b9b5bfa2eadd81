//! Per-object execution deadlines.
//!
//! [`TimeoutHandler`] keeps at most one live deadline per object key and
//! invokes a single registered callback when a deadline elapses. Each
//! scheduling carries a generation number; a timer only fires if its
//! generation is still the live one when it wakes, which settles races
//! between a firing timer and a concurrent cancel or replacement.
//!
//! [`TimeoutHandler::check_timeouts`] rebuilds the in-memory deadlines from
//! persisted object state at startup.

pub mod deadline;
pub mod error;
pub mod handler;
pub mod recovery;

pub use deadline::{Deadline, Resolution};
pub use error::TimeoutError;
pub use handler::{TimeoutCallback, TimeoutHandler};
pub use recovery::{Outcome, SweepReport};
