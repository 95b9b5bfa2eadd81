//! Read-only view of persisted object state used by startup recovery and resync.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::key::ObjectKey;

/// Listing scope: every namespace, or exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    All,
    Namespace(String),
}

impl Scope {
    /// Empty namespace means cluster-wide, matching the watch layer's convention.
    pub fn from_namespace(namespace: &str) -> Self {
        if namespace.is_empty() {
            Scope::All
        } else {
            Scope::Namespace(namespace.to_string())
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::All => write!(f, "<all namespaces>"),
            Scope::Namespace(ns) => write!(f, "{ns}"),
        }
    }
}

/// Persisted state of one managed object, as read at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveObject {
    pub key: ObjectKey,
    /// When execution started. Unset until the object has actually started.
    #[serde(default)]
    pub recorded_start: Option<DateTime<Utc>>,
    /// Configured execution window. `None` uses the controller default,
    /// a zero duration disables the timeout.
    #[serde(default, with = "duration_secs")]
    pub timeout: Option<Duration>,
    /// Completed objects are listed but need no deadline.
    #[serde(default)]
    pub done: bool,
}

impl ActiveObject {
    pub fn started(key: ObjectKey, recorded_start: DateTime<Utc>, timeout: Duration) -> Self {
        Self {
            key,
            recorded_start: Some(recorded_start),
            timeout: Some(timeout),
            done: false,
        }
    }
}

/// Source of persisted managed objects.
///
/// Per-object read failures are reported inline so a caller can skip the
/// broken entry and keep going.
#[async_trait]
pub trait ActiveObjectLister: Send + Sync {
    /// All namespaces that may contain managed objects.
    async fn list_namespaces(&self) -> Result<Vec<String>, StoreError>;

    /// Every managed object in one namespace.
    async fn list_active(
        &self,
        namespace: &str,
    ) -> Result<Vec<Result<ActiveObject, StoreError>>, StoreError>;

    /// Keys of every readable managed object within `scope`.
    async fn list_keys(&self, scope: &Scope) -> Result<Vec<ObjectKey>, StoreError> {
        let namespaces = match scope {
            Scope::All => self.list_namespaces().await?,
            Scope::Namespace(ns) => vec![ns.clone()],
        };
        let mut keys = Vec::new();
        for ns in namespaces {
            keys.extend(self.list_active(&ns).await?.into_iter().flatten().map(|o| o.key));
        }
        Ok(keys)
    }
}

/// In-memory lister, used by the replay tool and by tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<ObjectKey, Result<ActiveObject, String>>>,
    broken_namespaces: RwLock<BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_objects(objects: impl IntoIterator<Item = ActiveObject>) -> Self {
        let store = Self::new();
        for object in objects {
            store.insert(object);
        }
        store
    }

    pub fn insert(&self, object: ActiveObject) {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.insert(object.key.clone(), Ok(object));
    }

    /// Register an object whose persisted state cannot be read.
    pub fn insert_unreadable(&self, key: ObjectKey, reason: impl Into<String>) {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.insert(key, Err(reason.into()));
    }

    /// Make every listing of `namespace` fail.
    pub fn break_namespace(&self, namespace: impl Into<String>) {
        self.broken_namespaces
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(namespace.into());
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ActiveObjectLister for MemoryStore {
    async fn list_namespaces(&self) -> Result<Vec<String>, StoreError> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        let mut namespaces: BTreeSet<String> =
            objects.keys().map(|k| k.namespace.clone()).collect();
        namespaces.extend(
            self.broken_namespaces
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .cloned(),
        );
        Ok(namespaces.into_iter().collect())
    }

    async fn list_active(
        &self,
        namespace: &str,
    ) -> Result<Vec<Result<ActiveObject, StoreError>>, StoreError> {
        if self
            .broken_namespaces
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(namespace)
        {
            return Err(StoreError::Listing {
                scope: namespace.to_string(),
                reason: "namespace unavailable".to_string(),
            });
        }

        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        Ok(objects
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .map(|(key, entry)| match entry {
                Ok(object) => Ok(object.clone()),
                Err(reason) => Err(StoreError::Read {
                    key: key.to_string(),
                    reason: reason.clone(),
                }),
            })
            .collect())
    }
}

/// Serde helper: `Option<Duration>` as whole seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}
