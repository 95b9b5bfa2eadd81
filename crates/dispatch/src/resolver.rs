use requeue_core::{ChangeEvent, Kind, ObjectKey};

/// Maps a related object's event to the key of the owner that should be
/// reconciled, or `None` when the object is not under this controller.
pub type OwnerResolver = fn(&ChangeEvent, &Kind) -> Option<ObjectKey>;

/// Default resolver: the controlling owner reference, if it has `expected` kind.
pub fn controller_owner(event: &ChangeEvent, expected: &Kind) -> Option<ObjectKey> {
    let owner = event.controller_ref()?;
    if &owner.kind != expected {
        return None;
    }
    event.controller_key()
}

/// A related kind and how to find its owner.
#[derive(Debug, Clone)]
pub struct RelatedKind {
    pub expected_owner: Kind,
    pub resolve: OwnerResolver,
}

impl RelatedKind {
    pub fn owned_by(expected_owner: impl Into<Kind>) -> Self {
        Self {
            expected_owner: expected_owner.into(),
            resolve: controller_owner,
        }
    }

    pub fn owner_of(&self, event: &ChangeEvent) -> Option<ObjectKey> {
        (self.resolve)(event, &self.expected_owner)
    }
}
