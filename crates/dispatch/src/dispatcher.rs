use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use requeue_core::{ChangeEvent, Enqueue, EventType, Kind, ObjectKey};
use requeue_tracker::Tracker;

use crate::resolver::RelatedKind;

/// Routes change notifications to the work queue.
///
/// The only side effect of any method here is calling [`Enqueue::enqueue`].
pub struct EventDispatcher {
    primary_kind: Kind,
    related: HashMap<Kind, RelatedKind>,
    tracker: Option<Arc<Tracker>>,
    queue: Arc<dyn Enqueue>,
}

impl EventDispatcher {
    pub fn new(primary_kind: impl Into<Kind>, queue: Arc<dyn Enqueue>) -> Self {
        Self {
            primary_kind: primary_kind.into(),
            related: HashMap::new(),
            tracker: None,
            queue,
        }
    }

    /// Reduce events for `kind` to their controlling owner of `owner_kind`.
    pub fn watch_related(mut self, kind: impl Into<Kind>, owner_kind: impl Into<Kind>) -> Self {
        self.related
            .insert(kind.into(), RelatedKind::owned_by(owner_kind));
        self
    }

    /// Like [`watch_related`](Self::watch_related) with a custom owner lookup.
    pub fn watch_related_with(mut self, kind: impl Into<Kind>, related: RelatedKind) -> Self {
        self.related.insert(kind.into(), related);
        self
    }

    /// Offer every handled event to `tracker` so dependents get re-enqueued.
    pub fn with_tracker(mut self, tracker: Arc<Tracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn primary_kind(&self) -> &Kind {
        &self.primary_kind
    }

    /// Primary object added or updated: enqueue it. Deletions are left to the
    /// reconciler's own finalization.
    pub fn on_primary_changed(&self, event: &ChangeEvent) -> bool {
        if event.event_type == EventType::Deleted {
            trace!(key = %event.key(), "ignoring primary deletion");
            return false;
        }
        self.queue.enqueue(event.key());
        true
    }

    /// Related object changed: enqueue its controlling owner when that owner
    /// has `expected_owner_kind`. Objects without one are not ours and are dropped.
    pub fn on_related_changed(
        &self,
        event: &ChangeEvent,
        expected_owner_kind: &Kind,
    ) -> Option<ObjectKey> {
        self.enqueue_owner(event, &RelatedKind::owned_by(expected_owner_kind.clone()))
    }

    fn enqueue_owner(&self, event: &ChangeEvent, related: &RelatedKind) -> Option<ObjectKey> {
        match related.owner_of(event) {
            Some(owner) => {
                debug!(object = %event.key(), %owner, "enqueueing owner");
                self.queue.enqueue(owner.clone());
                Some(owner)
            }
            None => {
                debug!(
                    object = %event.key(),
                    expected_owner = %related.expected_owner,
                    "no matching controller reference, dropping event"
                );
                None
            }
        }
    }

    /// Route one notification from the change feed. Returns how many keys
    /// were enqueued.
    pub fn handle(&self, event: &ChangeEvent) -> usize {
        let mut enqueued = 0;

        if event.kind == self.primary_kind {
            enqueued += usize::from(self.on_primary_changed(event));
        } else if let Some(related) = self.related.get(&event.kind) {
            enqueued += usize::from(self.enqueue_owner(event, related).is_some());
        }

        if let Some(tracker) = &self.tracker {
            enqueued += tracker.notify_change(&event.key(), &*self.queue);
        }
        enqueued
    }
}
