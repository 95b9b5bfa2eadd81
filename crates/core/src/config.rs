use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::key::Kind;
use crate::store::Scope;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Profiled lookup: tries {PROFILE}_{KEY} first, falls back to {KEY}.
struct Profiled<'a, F> {
    profile: &'a str,
    lookup: F,
}

impl<F> Profiled<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn opt(&self, key: &str) -> Option<String> {
        if !self.profile.is_empty() {
            let prefixed = format!("{}_{}", self.profile, key);
            if let Some(v) = (self.lookup)(&prefixed).filter(|s| !s.is_empty()) {
                return Some(v);
            }
        }
        (self.lookup)(key).filter(|s| !s.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn u64(&self, key: &str) -> Option<u64> {
        self.opt(key).and_then(|v| v.parse().ok())
    }

    fn usize_or(&self, key: &str, default: usize) -> usize {
        self.opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }
}

const DEFAULT_RESYNC_SECS: u64 = 10 * 60 * 60;
const DEFAULT_TIMEOUT_SECS: u64 = 60 * 60;

/// Settings for one controller instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Directly reconciled kind.
    pub primary_kind: Kind,
    /// Namespace to manage; empty manages every namespace.
    pub namespace: String,
    /// Interval for re-enqueuing every managed object.
    pub resync_period: Duration,
    /// Validity window of a dependency edge between refreshes.
    pub tracker_lease: Duration,
    /// Execution window for objects that do not configure their own.
    pub default_timeout: Duration,
    pub worker_threads: usize,
    /// Delay before a failed reconciliation is retried.
    pub retry_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_lookup("", |_| None)
    }
}

impl ControllerConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `REQUEUE_PROFILE`.
    pub fn from_env() -> Self {
        let profile = env_opt("REQUEUE_PROFILE").unwrap_or_default();
        Self::from_lookup(&profile, env_opt)
    }

    /// Build config from an arbitrary key lookup. Unparseable values fall back
    /// to their defaults.
    pub fn from_lookup<F>(profile: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let p = profile.to_uppercase();
        let env = Profiled {
            profile: &p,
            lookup,
        };

        let resync_period =
            Duration::from_secs(env.u64("RESYNC_PERIOD_SECS").unwrap_or(DEFAULT_RESYNC_SECS));
        let tracker_lease = env
            .u64("TRACKER_LEASE_SECS")
            .map(Duration::from_secs)
            .unwrap_or_else(|| resync_period.checked_mul(3).unwrap_or(Duration::MAX));

        Self {
            profile: p.clone(),
            primary_kind: Kind::new(env.or("PRIMARY_KIND", "TaskRun")),
            namespace: env.or("NAMESPACE", ""),
            resync_period,
            tracker_lease,
            default_timeout: Duration::from_secs(
                env.u64("DEFAULT_TIMEOUT_SECS").unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            worker_threads: env.usize_or("WORKER_THREADS", 2).max(1),
            retry_delay: Duration::from_secs(env.u64("RETRY_DELAY_SECS").unwrap_or(5)),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    pub fn scope(&self) -> Scope {
        Scope::from_namespace(&self.namespace)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  primary kind:    {}", self.primary_kind);
        tracing::info!("  scope:           {}", self.scope());
        tracing::info!("  resync period:   {:?}", self.resync_period);
        tracing::info!("  tracker lease:   {:?}", self.tracker_lease);
        tracing::info!("  default timeout: {:?}", self.default_timeout);
        tracing::info!("  workers:         {}", self.worker_threads);
    }
}
