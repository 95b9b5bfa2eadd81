//! Coalescing work queue with at-most-one in-flight reconciliation per key.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{trace, warn};

use requeue_core::{Enqueue, ObjectKey};

#[derive(Default)]
struct State {
    queue: VecDeque<ObjectKey>,
    /// Keys waiting to be processed, queued or parked behind an in-flight run.
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    shutting_down: bool,
}

/// Keys added while already waiting are coalesced. A key added while it is
/// being processed is parked and handed out again once [`done`](Self::done)
/// is called for it.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<State>,
    ready: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, key: ObjectKey) {
        let mut state = self.state();
        if state.shutting_down {
            trace!(%key, "queue shutting down, dropping key");
            return;
        }
        if !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.ready.notify_one();
    }

    /// Add `key` once `delay` has elapsed. A delay past the clock's range is
    /// dropped; resync revisits the key.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let Some(wake_at) = tokio::time::Instant::now().checked_add(delay) else {
            warn!(%key, ?delay, "requeue delay out of range, not scheduling");
            return;
        };
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(wake_at).await;
            queue.add(key);
        });
    }

    /// Next key to process. Waits while empty; `None` once shut down and drained.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.ready.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as finished. Re-queues it if it was added meanwhile.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.ready.notify_one();
        }
    }

    /// Stop accepting keys. Already queued keys are still handed out.
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.ready.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nothing queued, parked or in flight.
    pub fn is_idle(&self) -> bool {
        let state = self.state();
        state.queue.is_empty() && state.processing.is_empty() && state.dirty.is_empty()
    }
}

impl Enqueue for WorkQueue {
    fn enqueue(&self, key: ObjectKey) {
        self.add(key)
    }
}
