//! Full controller loop: feed -> dispatcher -> queue -> reconciler, with
//! dependency tracking, timeout recovery and retries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use requeue_controller::{
    Controller, ControllerBuilder, ControllerError, ReconcileContext, ReconcileError, Reconciler,
};
use requeue_core::{
    ActiveObject, ActiveObjectLister, ChangeEvent, ControllerConfig, EventType, MemoryStore,
    ObjectKey, OwnerReference, StoreError,
};

/// Counts passes per key, tracks a shared ConfigMap, and fails `flaky` once.
#[derive(Default)]
struct RecordingReconciler {
    passes: Mutex<HashMap<ObjectKey, usize>>,
}

impl RecordingReconciler {
    fn passes(&self, key: &ObjectKey) -> usize {
        self.passes.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Reconciler for RecordingReconciler {
    async fn reconcile(&self, key: &ObjectKey, ctx: &ReconcileContext) -> Result<(), ReconcileError> {
        ctx.track(&settings());
        let pass = {
            let mut passes = self.passes.lock().unwrap();
            let count = passes.entry(key.clone()).or_default();
            *count += 1;
            *count
        };
        match key.name.as_str() {
            "flaky" if pass == 1 => Err(ReconcileError::Transient("not yet".into())),
            "broken" => Err(ReconcileError::Permanent("bad definition".into())),
            _ => Ok(()),
        }
    }
}

fn settings() -> ObjectKey {
    ObjectKey::new("ConfigMap", "ci", "settings")
}

fn run_key(name: &str) -> ObjectKey {
    ObjectKey::new("TaskRun", "ci", name)
}

fn config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.retry_delay = Duration::from_millis(20);
    config
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

struct Harness {
    controller: Arc<Controller>,
    reconciler: Arc<RecordingReconciler>,
    events: mpsc::Sender<ChangeEvent>,
    running: tokio::task::JoinHandle<Result<(), ControllerError>>,
}

fn start(store: MemoryStore) -> Harness {
    start_with(Arc::new(store))
}

fn start_with(lister: Arc<dyn ActiveObjectLister>) -> Harness {
    let reconciler = Arc::new(RecordingReconciler::default());
    let controller = Arc::new(
        ControllerBuilder::new(config())
            .reconciler(reconciler.clone())
            .lister(lister)
            .watch_related("Pod", "TaskRun")
            .build()
            .unwrap(),
    );
    let (events, rx) = mpsc::channel(16);
    let running = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run(rx).await })
    };
    Harness {
        controller,
        reconciler,
        events,
        running,
    }
}

#[tokio::test]
async fn primary_and_related_events_reach_the_reconciler() {
    let h = start(MemoryStore::new());

    h.events
        .send(ChangeEvent::new(run_key("build-1"), EventType::Added))
        .await
        .unwrap();
    eventually("primary reconcile", || h.reconciler.passes(&run_key("build-1")) == 1).await;

    h.events
        .send(
            ChangeEvent::new(ObjectKey::new("Pod", "ci", "build-1-pod"), EventType::Updated)
                .with_owner(OwnerReference::controller("TaskRun", "build-1")),
        )
        .await
        .unwrap();
    eventually("owner reconcile", || h.reconciler.passes(&run_key("build-1")) == 2).await;

    drop(h.events);
    h.running.await.unwrap().unwrap();
}

#[tokio::test]
async fn referenced_object_change_requeues_dependents() {
    let h = start(MemoryStore::new());

    for name in ["a", "b"] {
        h.events
            .send(ChangeEvent::new(run_key(name), EventType::Added))
            .await
            .unwrap();
    }
    eventually("initial passes", || {
        h.reconciler.passes(&run_key("a")) == 1 && h.reconciler.passes(&run_key("b")) == 1
    })
    .await;

    h.events
        .send(ChangeEvent::new(settings(), EventType::Updated))
        .await
        .unwrap();
    eventually("dependent passes", || {
        h.reconciler.passes(&run_key("a")) == 2 && h.reconciler.passes(&run_key("b")) == 2
    })
    .await;

    drop(h.events);
    h.running.await.unwrap().unwrap();
}

#[tokio::test]
async fn past_due_objects_are_reconciled_at_startup() {
    let store = MemoryStore::from_objects([ActiveObject::started(
        run_key("stale"),
        Utc::now() - chrono::Duration::hours(2),
        Duration::from_secs(3600),
    )]);
    let h = start(store);

    eventually("recovery reconcile", || h.reconciler.passes(&run_key("stale")) == 1).await;

    drop(h.events);
    h.running.await.unwrap().unwrap();
}

#[tokio::test]
async fn future_deadlines_are_recovered_without_reconciling() {
    let store = MemoryStore::from_objects([ActiveObject::started(
        run_key("running"),
        Utc::now(),
        Duration::from_secs(3600),
    )]);
    let h = start(store);

    eventually("deadline registered", || h.controller.timeouts().is_live(&run_key("running"))).await;
    assert_eq!(h.reconciler.passes(&run_key("running")), 0);

    drop(h.events);
    h.running.await.unwrap().unwrap();
    assert_eq!(h.controller.timeouts().live_count(), 0);
}

#[tokio::test]
async fn transient_failures_are_retried_permanent_ones_are_not() {
    let h = start(MemoryStore::new());

    for name in ["flaky", "broken"] {
        h.events
            .send(ChangeEvent::new(run_key(name), EventType::Added))
            .await
            .unwrap();
    }
    eventually("retry of flaky", || h.reconciler.passes(&run_key("flaky")) == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.reconciler.passes(&run_key("broken")), 1);

    drop(h.events);
    h.running.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_handle_stops_the_controller() {
    let h = start(MemoryStore::new());
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.controller.shutdown_handle().notify_waiters();

    tokio::time::timeout(Duration::from_secs(5), h.running)
        .await
        .expect("controller should stop")
        .unwrap()
        .unwrap();
}

/// Namespace listing that takes a while, so recovery is still running when
/// shutdown is requested.
struct SlowLister;

#[async_trait]
impl ActiveObjectLister for SlowLister {
    async fn list_namespaces(&self) -> Result<Vec<String>, StoreError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(vec!["ci".to_string()])
    }

    async fn list_active(
        &self,
        _namespace: &str,
    ) -> Result<Vec<Result<ActiveObject, StoreError>>, StoreError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn shutdown_during_slow_recovery_is_not_lost() {
    let h = start_with(Arc::new(SlowLister));
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.controller.shutdown_handle().notify_waiters();

    tokio::time::timeout(Duration::from_secs(2), h.running)
        .await
        .expect("controller should stop during recovery")
        .unwrap()
        .unwrap();
    assert_eq!(h.controller.timeouts().live_count(), 0);
}

#[tokio::test]
async fn shutdown_while_events_are_handled_is_not_lost() {
    let h = start(MemoryStore::new());
    tokio::time::sleep(Duration::from_millis(20)).await;
    for i in 0..8 {
        h.events
            .send(ChangeEvent::new(run_key(&format!("burst-{i}")), EventType::Added))
            .await
            .unwrap();
    }

    h.controller.shutdown_handle().notify_waiters();

    tokio::time::timeout(Duration::from_secs(2), h.running)
        .await
        .expect("controller should stop with events still queued")
        .unwrap()
        .unwrap();
}

#[test]
fn builder_needs_a_runtime_to_schedule_timeouts() {
    let err = ControllerBuilder::new(config())
        .reconciler(Arc::new(RecordingReconciler::default()))
        .lister(Arc::new(MemoryStore::new()))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, ControllerError::NoRuntime));

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let controller = ControllerBuilder::new(config())
        .reconciler(Arc::new(RecordingReconciler::default()))
        .lister(Arc::new(MemoryStore::new()))
        .runtime(runtime.handle().clone())
        .build()
        .unwrap();
    let key = run_key("outside");
    controller
        .timeouts()
        .start_timeout(key.clone(), Utc::now() + chrono::Duration::hours(1));
    assert!(controller.timeouts().is_live(&key));
    controller.timeouts().shutdown();
}

#[test]
fn builder_requires_reconciler_and_lister() {
    let err = ControllerBuilder::new(config())
        .lister(Arc::new(MemoryStore::new()))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, ControllerError::MissingReconciler));

    let err = ControllerBuilder::new(config())
        .reconciler(Arc::new(RecordingReconciler::default()))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, ControllerError::MissingLister));
}
