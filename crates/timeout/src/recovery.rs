//! Startup recovery of deadlines from persisted object state.

use chrono::Utc;
use tracing::{debug, error, info, warn};

use requeue_core::{ActiveObject, ActiveObjectLister, Scope};

use crate::deadline::Resolution;
use crate::handler::TimeoutHandler;

/// What happened to one object during recovery or scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A future deadline was registered.
    Scheduled,
    /// The window had already elapsed; the callback ran immediately.
    Fired,
    /// No deadline applies (done, not started, or timeout disabled).
    Skipped,
}

/// Counts from one [`TimeoutHandler::check_timeouts`] sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scheduled: usize,
    pub fired: usize,
    pub skipped: usize,
    /// Unreadable objects plus namespaces whose listing failed.
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Scheduled => self.scheduled += 1,
            Outcome::Fired => self.fired += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }
}

impl TimeoutHandler {
    /// Bring `object`'s deadline in line with its persisted state.
    ///
    /// A deadline still ahead is (re)started; one already behind fires the
    /// callback synchronously from this call.
    pub fn schedule(&self, object: &ActiveObject) -> Outcome {
        match Resolution::of(object, self.default_timeout()) {
            Resolution::At(fires_at) if fires_at > Utc::now() => {
                self.start_timeout(object.key.clone(), fires_at);
                Outcome::Scheduled
            }
            Resolution::At(fires_at) => {
                debug!(key = %object.key, %fires_at, "deadline already passed");
                self.fire_now(&object.key);
                Outcome::Fired
            }
            other => {
                debug!(key = %object.key, resolution = ?other, "no deadline to schedule");
                Outcome::Skipped
            }
        }
    }

    /// Recreate deadlines for every managed object in `scope`.
    ///
    /// Runs once at startup, before traffic. Listing and read failures are
    /// logged and skipped; the sweep always visits every reachable object.
    pub async fn check_timeouts(&self, scope: &Scope, lister: &dyn ActiveObjectLister) -> SweepReport {
        let mut report = SweepReport::default();

        let namespaces = match scope {
            Scope::Namespace(ns) => vec![ns.clone()],
            Scope::All => match lister.list_namespaces().await {
                Ok(namespaces) => namespaces,
                Err(e) => {
                    error!(error = %e, "can't list namespaces, skipping timeout recovery");
                    report.failed += 1;
                    return report;
                }
            },
        };

        for namespace in namespaces {
            let objects = match lister.list_active(&namespace).await {
                Ok(objects) => objects,
                Err(e) => {
                    error!(%namespace, error = %e, "can't list managed objects");
                    report.failed += 1;
                    continue;
                }
            };

            for entry in objects {
                match entry {
                    Ok(object) => report.record(self.schedule(&object)),
                    Err(e) => {
                        warn!(%namespace, error = %e, "skipping unreadable object");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            %scope,
            scheduled = report.scheduled,
            fired = report.fired,
            skipped = report.skipped,
            failed = report.failed,
            "timeout recovery sweep complete"
        );
        report
    }
}
