use std::sync::Arc;

use crate::key::ObjectKey;

/// Fire-and-forget sink for reconciliation keys.
///
/// Implemented by the work queue. Enqueuing a key that is already waiting is
/// harmless; the queue coalesces duplicates.
pub trait Enqueue: Send + Sync {
    fn enqueue(&self, key: ObjectKey);
}

/// Blanket implementation so `Arc<dyn Enqueue>` can be used directly.
impl<T: Enqueue + ?Sized> Enqueue for Arc<T> {
    fn enqueue(&self, key: ObjectKey) {
        (**self).enqueue(key)
    }
}

/// Adapts a closure into an [`Enqueue`] sink.
pub struct EnqueueFn<F>(pub F);

impl<F> Enqueue for EnqueueFn<F>
where
    F: Fn(ObjectKey) + Send + Sync,
{
    fn enqueue(&self, key: ObjectKey) {
        (self.0)(key)
    }
}
