//! Reverse-dependency tracking for reconciliation.
//!
//! A reconciliation pass declares "`watcher` depends on `referenced`" via
//! [`Tracker::track`]. When `referenced` later changes, [`Tracker::on_change`]
//! yields every watcher whose lease is still valid so the caller can enqueue
//! them. Edges are leases: they expire unless refreshed and are pruned lazily
//! the next time their referenced key is looked up.

pub mod tracker;

pub use tracker::{ReferenceEdge, Tracker};
