//! Assembles the dispatch core around one reconciler.
//!
//! Startup order mirrors a level-triggered controller: register the timeout
//! callback, recover deadlines from persisted state, then start workers, the
//! resync loop and the change feed.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use requeue_core::{ActiveObjectLister, ChangeEvent, ControllerConfig, Enqueue, Kind, Scope};
use requeue_dispatch::{run_feed, EventDispatcher, RelatedKind};
use requeue_timeout::{SweepReport, TimeoutHandler};
use requeue_tracker::Tracker;

use crate::error::ControllerError;
use crate::queue::WorkQueue;
use crate::reconciler::{ReconcileContext, Reconciler};

// ── ControllerBuilder ────────────────────────────────────────────────

/// Fluent builder for a [`Controller`].
///
/// # Example
/// ```ignore
/// let controller = ControllerBuilder::new(ControllerConfig::from_env())
///     .reconciler(Arc::new(MyReconciler))
///     .lister(Arc::new(store))
///     .watch_related("Pod", "TaskRun")
///     .build()?;
/// ```
pub struct ControllerBuilder {
    config: ControllerConfig,
    reconciler: Option<Arc<dyn Reconciler>>,
    lister: Option<Arc<dyn ActiveObjectLister>>,
    related: Vec<(Kind, RelatedKind)>,
    runtime: Option<Handle>,
}

impl ControllerBuilder {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            reconciler: None,
            lister: None,
            related: Vec::new(),
            runtime: None,
        }
    }

    pub fn reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    /// Persisted-state source for timeout recovery and resync.
    pub fn lister(mut self, lister: Arc<dyn ActiveObjectLister>) -> Self {
        self.lister = Some(lister);
        self
    }

    /// Enqueue the controlling `owner_kind` owner whenever a `kind` object changes.
    pub fn watch_related(mut self, kind: impl Into<Kind>, owner_kind: impl Into<Kind>) -> Self {
        self.related
            .push((kind.into(), RelatedKind::owned_by(owner_kind)));
        self
    }

    /// Runtime for timeout timers. Defaults to the runtime `build` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Controller, ControllerError> {
        let reconciler = self.reconciler.ok_or(ControllerError::MissingReconciler)?;
        let lister = self.lister.ok_or(ControllerError::MissingLister)?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| ControllerError::NoRuntime)?,
        };

        let queue = Arc::new(WorkQueue::new());
        let tracker = Arc::new(Tracker::new(self.config.tracker_lease));

        let timeouts = TimeoutHandler::new(self.config.default_timeout, runtime);
        let timeout_queue = queue.clone();
        timeouts.set_callback(move |key| timeout_queue.enqueue(key.clone()))?;

        let mut dispatcher = EventDispatcher::new(self.config.primary_kind.clone(), queue.clone())
            .with_tracker(tracker.clone());
        for (kind, related) in self.related {
            dispatcher = dispatcher.watch_related_with(kind, related);
        }

        Ok(Controller {
            config: self.config,
            queue,
            tracker,
            timeouts,
            dispatcher: Arc::new(dispatcher),
            reconciler,
            lister,
            shutdown: Arc::new(Notify::new()),
        })
    }
}

// ── Controller ───────────────────────────────────────────────────────

pub struct Controller {
    config: ControllerConfig,
    queue: Arc<WorkQueue>,
    tracker: Arc<Tracker>,
    timeouts: TimeoutHandler,
    dispatcher: Arc<EventDispatcher>,
    reconciler: Arc<dyn Reconciler>,
    lister: Arc<dyn ActiveObjectLister>,
    shutdown: Arc<Notify>,
}

impl Controller {
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    pub fn timeouts(&self) -> &TimeoutHandler {
        &self.timeouts
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Notify this to stop [`run`](Self::run). Either `notify_waiters` or
    /// `notify_one` works once `run` has started, including during recovery.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Recover deadlines for the configured scope.
    pub async fn recover(&self) -> SweepReport {
        self.timeouts
            .check_timeouts(&self.config.scope(), &*self.lister)
            .await
    }

    /// Run until `events` closes or shutdown is requested, then drain the queue.
    pub async fn run(&self, events: mpsc::Receiver<ChangeEvent>) -> Result<(), ControllerError> {
        info!(
            kind = %self.config.primary_kind,
            scope = %self.config.scope(),
            workers = self.config.worker_threads,
            "starting controller"
        );

        let stop = self.shutdown.notified();
        tokio::pin!(stop);
        stop.as_mut().enable();

        tokio::select! {
            _ = self.recover() => {}
            _ = stop.as_mut() => {
                info!("shutdown requested during timeout recovery");
                self.queue.shut_down();
                self.timeouts.shutdown();
                info!("controller stopped");
                return Ok(());
            }
        }

        let workers: Vec<JoinHandle<()>> = (0..self.config.worker_threads)
            .map(|id| self.spawn_worker(id))
            .collect();
        let resync = self.spawn_resync();

        run_feed(&self.dispatcher, events, stop.as_mut()).await;

        info!("stopping controller, draining queue");
        resync.abort();
        self.queue.shut_down();
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "reconcile worker panicked");
            }
        }
        self.timeouts.shutdown();
        info!("controller stopped");
        Ok(())
    }

    fn spawn_worker(&self, id: usize) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let reconciler = self.reconciler.clone();
        let tracker = self.tracker.clone();
        let timeouts = self.timeouts.clone();
        let retry_delay = self.config.retry_delay;

        tokio::spawn(async move {
            debug!(worker = id, "reconcile worker started");
            while let Some(key) = queue.get().await {
                let ctx = ReconcileContext::new(key.clone(), tracker.clone(), timeouts.clone());
                match reconciler.reconcile(&key, &ctx).await {
                    Ok(()) => debug!(worker = id, %key, "reconciled"),
                    Err(e) if e.is_permanent() => {
                        warn!(worker = id, %key, error = %e, "reconcile failed, not retrying");
                    }
                    Err(e) => {
                        warn!(worker = id, %key, error = %e, ?retry_delay, "reconcile failed, retrying");
                        queue.add_after(key.clone(), retry_delay);
                    }
                }
                queue.done(&key);
            }
            debug!(worker = id, "reconcile worker stopped");
        })
    }

    fn spawn_resync(&self) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let lister = self.lister.clone();
        let scope = self.config.scope();
        let period = self.config.resync_period;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
            // Skip the immediate first tick; startup already enqueues via recovery and the feed.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                resync(&*lister, &scope, &queue).await;
            }
        })
    }
}

/// Enqueue every managed object in `scope`.
async fn resync(lister: &dyn ActiveObjectLister, scope: &Scope, queue: &WorkQueue) {
    match lister.list_keys(scope).await {
        Ok(keys) => {
            info!(%scope, count = keys.len(), "resync");
            for key in keys {
                queue.add(key);
            }
        }
        Err(e) => warn!(%scope, error = %e, "resync listing failed"),
    }
}
