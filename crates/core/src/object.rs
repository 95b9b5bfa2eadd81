//! Change notifications as delivered by the watch layer.

use serde::{Deserialize, Serialize};

use crate::key::{Kind, ObjectKey};

/// Reference from a child object to one of its owners.
///
/// Owners always live in the child's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: Kind,
    pub name: String,
    /// Marks the managing owner. At most one reference per object sets this.
    #[serde(default)]
    pub controller: bool,
}

impl OwnerReference {
    pub fn new(kind: impl Into<Kind>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            controller: false,
        }
    }

    /// Controlling owner reference.
    pub fn controller(kind: impl Into<Kind>, name: impl Into<String>) -> Self {
        Self {
            controller: true,
            ..Self::new(kind, name)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Added,
    Updated,
    Deleted,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Added => write!(f, "added"),
            EventType::Updated => write!(f, "updated"),
            EventType::Deleted => write!(f, "deleted"),
        }
    }
}

/// A single change notification for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
    pub event_type: EventType,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

impl ChangeEvent {
    pub fn new(key: ObjectKey, event_type: EventType) -> Self {
        Self {
            kind: key.kind,
            namespace: key.namespace,
            name: key.name,
            event_type,
            owner_references: Vec::new(),
        }
    }

    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.owner_references.push(owner);
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind.clone(), self.namespace.clone(), self.name.clone())
    }

    /// The owner reference flagged as controller, if any.
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }

    /// Key of the controlling owner, resolved into this object's namespace.
    pub fn controller_key(&self) -> Option<ObjectKey> {
        self.controller_ref().map(|owner| {
            ObjectKey::new(owner.kind.clone(), self.namespace.clone(), owner.name.clone())
        })
    }
}
