use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use requeue_core::{ActiveObject, ObjectKey};
use requeue_timeout::{Deadline, Outcome, TimeoutHandler};
use requeue_tracker::Tracker;

use crate::error::ReconcileError;

/// Business logic that drives one object toward its desired state.
///
/// The controller guarantees at most one in-flight call per key.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, key: &ObjectKey, ctx: &ReconcileContext) -> Result<(), ReconcileError>;
}

/// Blanket implementation so `Arc<dyn Reconciler>` can be used directly.
#[async_trait]
impl<T: Reconciler + ?Sized> Reconciler for Arc<T> {
    async fn reconcile(&self, key: &ObjectKey, ctx: &ReconcileContext) -> Result<(), ReconcileError> {
        (**self).reconcile(key, ctx).await
    }
}

/// Per-pass handle to the shared tracker and timeout registry, bound to the
/// key being reconciled.
pub struct ReconcileContext {
    key: ObjectKey,
    tracker: Arc<Tracker>,
    timeouts: TimeoutHandler,
}

impl ReconcileContext {
    pub fn new(key: ObjectKey, tracker: Arc<Tracker>, timeouts: TimeoutHandler) -> Self {
        Self {
            key,
            tracker,
            timeouts,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Re-enqueue this object whenever `referenced` changes, for the tracker's
    /// lease. Call on every pass to keep the lease fresh.
    pub fn track(&self, referenced: &ObjectKey) {
        self.tracker.track_default(&self.key, referenced);
    }

    pub fn start_timeout(&self, fires_at: DateTime<Utc>) -> Deadline {
        self.timeouts.start_timeout(self.key.clone(), fires_at)
    }

    pub fn cancel_timeout(&self) -> bool {
        self.timeouts.cancel_timeout(&self.key)
    }

    /// Align this object's deadline with its persisted start and timeout.
    pub fn schedule_timeout(&self, object: &ActiveObject) -> Outcome {
        self.timeouts.schedule(object)
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn timeouts(&self) -> &TimeoutHandler {
        &self.timeouts
    }
}
