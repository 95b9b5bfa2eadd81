use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use requeue_core::ObjectKey;

use crate::deadline::Deadline;
use crate::error::TimeoutError;

/// Function invoked for every elapsed deadline.
pub type TimeoutCallback = Arc<dyn Fn(&ObjectKey) + Send + Sync>;

struct LiveDeadline {
    deadline: Deadline,
    timer: JoinHandle<()>,
}

struct Inner {
    callback: OnceLock<TimeoutCallback>,
    registry: Mutex<HashMap<ObjectKey, LiveDeadline>>,
    generation: AtomicU64,
    default_timeout: Duration,
    runtime: Handle,
}

fn live_generation(registry: &HashMap<ObjectKey, LiveDeadline>, key: &ObjectKey) -> Option<u64> {
    registry.get(key).map(|live| live.deadline.generation)
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, HashMap<ObjectKey, LiveDeadline>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Timer wake-up. Fires only if `generation` is still the live one.
    fn fire(&self, key: &ObjectKey, generation: u64) {
        {
            let mut registry = self.registry();
            if live_generation(&registry, key) != Some(generation) {
                debug!(%key, generation, "superseded timer woke, not firing");
                return;
            }
            registry.remove(key);
        }
        self.invoke(key);
    }

    fn invoke(&self, key: &ObjectKey) {
        match self.callback.get() {
            Some(callback) => {
                debug!(%key, "timeout elapsed");
                callback(key);
            }
            None => warn!(%key, "timeout elapsed with no callback registered, dropping"),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let registry = self.registry.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, live) in registry.drain() {
            live.timer.abort();
        }
    }
}

/// Schedules, replaces, cancels and fires per-object deadlines.
///
/// Cloning yields another handle to the same registry. Timers run on the
/// runtime given at construction, so any thread may schedule or cancel.
/// Dropping the last handle aborts every pending timer.
#[derive(Clone)]
pub struct TimeoutHandler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TimeoutHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutHandler")
            .field("live", &self.live_count())
            .field("default_timeout", &self.inner.default_timeout)
            .field("callback_set", &self.inner.callback.get().is_some())
            .finish()
    }
}

impl TimeoutHandler {
    /// `default_timeout` applies to recovered objects without their own timeout.
    /// Timer tasks are spawned onto `runtime`.
    pub fn new(default_timeout: Duration, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                callback: OnceLock::new(),
                registry: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                default_timeout,
                runtime,
            }),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Register the function invoked on every fire. Only one registration is allowed.
    pub fn set_callback<F>(&self, callback: F) -> Result<(), TimeoutError>
    where
        F: Fn(&ObjectKey) + Send + Sync + 'static,
    {
        self.inner
            .callback
            .set(Arc::new(callback))
            .map_err(|_| TimeoutError::CallbackAlreadySet)
    }

    /// Schedule a one-shot deadline for `key`, replacing any live one.
    ///
    /// The callback runs exactly once, at or after `fires_at`, unless the
    /// returned generation is cancelled or replaced first. A `fires_at` in the
    /// past fires on the next timer tick.
    pub fn start_timeout(&self, key: ObjectKey, fires_at: DateTime<Utc>) -> Deadline {
        // Read the clock of the timer runtime, even from a thread outside it.
        let _runtime = self.inner.runtime.enter();
        let delay = (fires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let wake_at = tokio::time::Instant::now() + delay;

        let mut registry = self.inner.registry();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline = Deadline {
            key: key.clone(),
            fires_at,
            generation,
        };
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timer_key = key.clone();
        let timer = self.inner.runtime.spawn(async move {
            tokio::time::sleep_until(wake_at).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire(&timer_key, generation);
            }
        });

        if let Some(previous) = registry.insert(
            key,
            LiveDeadline {
                deadline: deadline.clone(),
                timer,
            },
        ) {
            previous.timer.abort();
            debug!(
                key = %deadline.key,
                replaced = previous.deadline.generation,
                generation,
                "timeout replaced"
            );
        } else {
            debug!(key = %deadline.key, generation, %fires_at, "timeout started");
        }
        deadline
    }

    /// Cancel the live deadline for `key`.
    ///
    /// Returns `false` when nothing was live, including when the deadline has
    /// already fired; in that case the fire stands.
    pub fn cancel_timeout(&self, key: &ObjectKey) -> bool {
        let removed = self.inner.registry().remove(key);
        match removed {
            Some(live) => {
                live.timer.abort();
                debug!(%key, generation = live.deadline.generation, "timeout cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel `deadline` only if it is still the live generation for its key.
    pub fn cancel(&self, deadline: &Deadline) -> bool {
        let mut registry = self.inner.registry();
        if live_generation(&registry, &deadline.key) != Some(deadline.generation) {
            return false;
        }
        if let Some(live) = registry.remove(&deadline.key) {
            live.timer.abort();
        }
        debug!(key = %deadline.key, generation = deadline.generation, "timeout cancelled");
        true
    }

    /// Invoke the callback for `key` right away, outside any timer.
    ///
    /// Any live deadline for `key` is dropped first so the object is not
    /// revisited twice for the same window.
    pub fn fire_now(&self, key: &ObjectKey) {
        if let Some(live) = self.inner.registry().remove(key) {
            live.timer.abort();
        }
        self.inner.invoke(key);
    }

    pub fn is_live(&self, key: &ObjectKey) -> bool {
        self.inner.registry().contains_key(key)
    }

    pub fn deadline(&self, key: &ObjectKey) -> Option<Deadline> {
        self.inner.registry().get(key).map(|live| live.deadline.clone())
    }

    pub fn live_count(&self) -> usize {
        self.inner.registry().len()
    }

    /// Cancel every live deadline. Returns how many were dropped.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<LiveDeadline> = self
            .inner
            .registry()
            .drain()
            .map(|(_, live)| live)
            .collect();
        for live in &drained {
            live.timer.abort();
        }
        info!(cancelled = drained.len(), "timeout handler shut down");
        drained.len()
    }
}
