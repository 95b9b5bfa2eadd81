//! requeue-replay: run the controller loop against a recorded change log.
//!
//! Reads:
//! - a JSON-lines file of change events (one `ChangeEvent` per line)
//! - an optional JSON array of persisted `ActiveObject`s used for timeout
//!   recovery, resync and as the reconciler's view of object state
//!
//! Every reconciliation is logged; the process exits once the log is drained.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use requeue_controller::{ControllerBuilder, ReconcileContext, ReconcileError, Reconciler};
use requeue_core::config::load_dotenv;
use requeue_core::{ActiveObject, ChangeEvent, ControllerConfig, MemoryStore, ObjectKey};

// ── CLI ─────────────────────────────────────────────────────────────

/// Replay a change-event log through the reconciliation dispatch core.
#[derive(Parser, Debug)]
#[command(name = "requeue-replay", version, about)]
struct Cli {
    /// JSON-lines file of change events.
    #[arg(long)]
    events: PathBuf,

    /// JSON array of persisted managed objects.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Related kind and its owner kind, e.g. `Pod=TaskRun`. Repeatable.
    #[arg(long = "related", value_parser = parse_related)]
    related: Vec<(String, String)>,
}

fn parse_related(s: &str) -> Result<(String, String), String> {
    let (kind, owner) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KIND=OWNER_KIND, got '{s}'"))?;
    if kind.is_empty() || owner.is_empty() {
        return Err(format!("expected KIND=OWNER_KIND, got '{s}'"));
    }
    Ok((kind.to_string(), owner.to_string()))
}

// ── SnapshotReconciler ──────────────────────────────────────────────

/// Logs each pass and keeps the object's deadline aligned with the snapshot.
struct SnapshotReconciler {
    objects: Vec<ActiveObject>,
}

impl SnapshotReconciler {
    fn find(&self, key: &ObjectKey) -> Option<&ActiveObject> {
        self.objects.iter().find(|o| &o.key == key)
    }
}

#[async_trait]
impl Reconciler for SnapshotReconciler {
    async fn reconcile(&self, key: &ObjectKey, ctx: &ReconcileContext) -> Result<(), ReconcileError> {
        match self.find(key) {
            Some(object) if !object.done => {
                let outcome = ctx.schedule_timeout(object);
                info!(%key, ?outcome, "reconciled");
            }
            Some(_) => {
                ctx.cancel_timeout();
                info!(%key, "reconciled completed object");
            }
            None => info!(%key, "reconciled object missing from snapshot"),
        }
        Ok(())
    }
}

// ── main ────────────────────────────────────────────────────────────

fn read_snapshot(path: Option<&PathBuf>) -> anyhow::Result<Vec<ActiveObject>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing snapshot {}", path.display()))
}

fn read_events(path: &PathBuf) -> anyhow::Result<Vec<ChangeEvent>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading events {}", path.display()))?;
    let mut events = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ChangeEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => warn!(line = line_no + 1, error = %e, "skipping malformed event"),
        }
    }
    Ok(events)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    load_dotenv();
    let config = ControllerConfig::from_env();
    config.log_summary();

    let objects = read_snapshot(cli.snapshot.as_ref())?;
    let events = read_events(&cli.events)?;
    info!(objects = objects.len(), events = events.len(), "loaded replay input");

    let store = Arc::new(MemoryStore::from_objects(objects.iter().cloned()));
    let mut builder = ControllerBuilder::new(config)
        .reconciler(Arc::new(SnapshotReconciler { objects }))
        .lister(store);
    for (kind, owner) in cli.related {
        builder = builder.watch_related(kind, owner);
    }
    let controller = builder.build()?;

    let (tx, rx) = mpsc::channel(64);
    let shutdown = controller.shutdown_handle();
    tokio::spawn(async move {
        for event in events {
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            shutdown.notify_one();
        }
    });

    controller.run(rx).await?;
    info!("requeue-replay exited cleanly");
    Ok(())
}
