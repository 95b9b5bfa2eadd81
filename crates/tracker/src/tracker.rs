use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use requeue_core::{Enqueue, ObjectKey};

/// Upper bound on a single lease, keeps `Instant` arithmetic in range.
const MAX_LEASE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// "`watcher` depends on `referenced`, valid until `expires_at`".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEdge {
    pub watcher: ObjectKey,
    pub referenced: ObjectKey,
    pub expires_at: Instant,
}

/// referenced -> (watcher -> expiry)
type DependencyIndex = HashMap<ObjectKey, HashMap<ObjectKey, Instant>>;

/// Lease-based reverse-reference index shared by every reconciliation worker.
#[derive(Debug)]
pub struct Tracker {
    index: Mutex<DependencyIndex>,
    lease: Duration,
}

impl Tracker {
    /// Create a tracker whose [`track_default`](Self::track_default) edges last `lease`.
    pub fn new(lease: Duration) -> Self {
        Self {
            index: Mutex::new(HashMap::new()),
            lease,
        }
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    fn index(&self) -> MutexGuard<'_, DependencyIndex> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record that `watcher` depends on `referenced` for `lease`.
    ///
    /// Refreshing an existing edge keeps the later of the two expiries, so
    /// concurrent refreshes converge regardless of arrival order. A zero lease
    /// counts as already expired and drops any existing edge for the pair.
    pub fn track(&self, watcher: &ObjectKey, referenced: &ObjectKey, lease: Duration) {
        let mut index = self.index();

        if lease.is_zero() {
            if let Some(watchers) = index.get_mut(referenced) {
                watchers.remove(watcher);
                if watchers.is_empty() {
                    index.remove(referenced);
                }
            }
            trace!(%watcher, %referenced, "dependency cleared");
            return;
        }

        let expires_at = Instant::now() + lease.min(MAX_LEASE);
        let current = index
            .entry(referenced.clone())
            .or_default()
            .entry(watcher.clone())
            .or_insert(expires_at);
        if *current < expires_at {
            *current = expires_at;
        }
        trace!(%watcher, %referenced, ?lease, "dependency tracked");
    }

    /// [`track`](Self::track) with the tracker's configured lease.
    pub fn track_default(&self, watcher: &ObjectKey, referenced: &ObjectKey) {
        self.track(watcher, referenced, self.lease)
    }

    /// Watchers of `referenced` whose lease has not yet run out.
    ///
    /// Expired edges for `referenced` are removed as part of the lookup. Cost is
    /// proportional to the number of edges registered against `referenced`.
    pub fn on_change(&self, referenced: &ObjectKey) -> HashSet<ObjectKey> {
        let now = Instant::now();
        let mut index = self.index();

        let Some(watchers) = index.get_mut(referenced) else {
            return HashSet::new();
        };

        let before = watchers.len();
        watchers.retain(|_, expires_at| *expires_at > now);
        let pruned = before - watchers.len();
        if pruned > 0 {
            debug!(%referenced, pruned, "pruned expired dependency edges");
        }

        let live: HashSet<ObjectKey> = watchers.keys().cloned().collect();
        if watchers.is_empty() {
            index.remove(referenced);
        }
        live
    }

    /// Look up the watchers of `referenced` and enqueue each of them.
    ///
    /// Returns how many keys were enqueued.
    pub fn notify_change(&self, referenced: &ObjectKey, sink: &dyn Enqueue) -> usize {
        let watchers = self.on_change(referenced);
        let count = watchers.len();
        for watcher in watchers {
            debug!(%watcher, %referenced, "enqueueing dependent");
            sink.enqueue(watcher);
        }
        count
    }

    /// Raw edges registered against `referenced`, expired or not. Does not prune.
    pub fn edges(&self, referenced: &ObjectKey) -> Vec<ReferenceEdge> {
        self.index()
            .get(referenced)
            .map(|watchers| {
                watchers
                    .iter()
                    .map(|(watcher, expires_at)| ReferenceEdge {
                        watcher: watcher.clone(),
                        referenced: referenced.clone(),
                        expires_at: *expires_at,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of referenced keys currently present in the index.
    pub fn referenced_count(&self) -> usize {
        self.index().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use requeue_core::EnqueueFn;

    fn key(kind: &str, name: &str) -> ObjectKey {
        ObjectKey::new(kind, "ci", name)
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn tracked_watcher_is_reported() {
        let tracker = Tracker::new(HOUR);
        let watcher = key("TaskRun", "build-1");
        let referenced = key("Task", "compile");

        tracker.track(&watcher, &referenced, HOUR);

        let watchers = tracker.on_change(&referenced);
        assert_eq!(watchers, HashSet::from([watcher]));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_lease_registers_nothing() {
        let tracker = Tracker::new(HOUR);
        let referenced = key("Task", "compile");

        tracker.track(&key("TaskRun", "build-1"), &referenced, Duration::ZERO);

        assert!(tracker.on_change(&referenced).is_empty());
        assert_eq!(tracker.referenced_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_lease_clears_existing_interest() {
        let tracker = Tracker::new(HOUR);
        let watcher = key("TaskRun", "build-1");
        let other = key("TaskRun", "build-2");
        let referenced = key("Task", "compile");

        tracker.track(&watcher, &referenced, HOUR);
        tracker.track(&other, &referenced, HOUR);
        tracker.track(&watcher, &referenced, Duration::ZERO);

        assert_eq!(tracker.on_change(&referenced), HashSet::from([other]));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_edges_are_excluded_and_pruned() {
        let tracker = Tracker::new(HOUR);
        let watcher = key("TaskRun", "build-1");
        let referenced = key("Task", "compile");

        tracker.track(&watcher, &referenced, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(11)).await;

        // Still physically present until the next lookup.
        assert_eq!(tracker.edges(&referenced).len(), 1);

        assert!(tracker.on_change(&referenced).is_empty());
        assert!(tracker.edges(&referenced).is_empty());
        assert_eq!(tracker.referenced_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn edge_expiring_exactly_now_is_absent() {
        let tracker = Tracker::new(HOUR);
        let referenced = key("Task", "compile");

        tracker.track(&key("TaskRun", "a"), &referenced, Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(tracker.on_change(&referenced).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_extends_lease_without_duplicating() {
        let tracker = Tracker::new(HOUR);
        let watcher = key("TaskRun", "build-1");
        let referenced = key("Task", "compile");

        tracker.track(&watcher, &referenced, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        tracker.track(&watcher, &referenced, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(tracker.edges(&referenced).len(), 1);
        assert_eq!(tracker.on_change(&referenced), HashSet::from([watcher]));
    }

    #[tokio::test(start_paused = true)]
    async fn shorter_refresh_keeps_later_expiry() {
        let tracker = Tracker::new(HOUR);
        let watcher = key("TaskRun", "build-1");
        let referenced = key("Task", "compile");

        tracker.track(&watcher, &referenced, Duration::from_secs(100));
        tracker.track(&watcher, &referenced, Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(50)).await;

        assert_eq!(tracker.on_change(&referenced).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pruning_only_touches_looked_up_key() {
        let tracker = Tracker::new(HOUR);
        let a = key("Task", "a");
        let b = key("Task", "b");

        tracker.track(&key("TaskRun", "x"), &a, Duration::from_secs(1));
        tracker.track(&key("TaskRun", "y"), &b, Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;

        tracker.on_change(&a);
        assert!(tracker.edges(&a).is_empty());
        assert_eq!(tracker.edges(&b).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn notify_change_enqueues_each_live_watcher() {
        let tracker = Tracker::new(HOUR);
        let referenced = key("Task", "compile");
        tracker.track_default(&key("TaskRun", "a"), &referenced);
        tracker.track_default(&key("TaskRun", "b"), &referenced);

        let seen = StdMutex::new(Vec::new());
        let sink = EnqueueFn(|k: ObjectKey| seen.lock().unwrap().push(k));

        assert_eq!(tracker.notify_change(&referenced, &sink), 2);
        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, vec![key("TaskRun", "a"), key("TaskRun", "b")]);
    }

    #[test]
    fn huge_lease_does_not_overflow() {
        let tracker = Tracker::new(Duration::MAX);
        let referenced = key("Task", "compile");
        tracker.track_default(&key("TaskRun", "a"), &referenced);
        assert_eq!(tracker.on_change(&referenced).len(), 1);
    }
}
