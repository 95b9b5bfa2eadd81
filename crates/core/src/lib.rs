pub mod config;
pub mod enqueue;
pub mod error;
pub mod key;
pub mod object;
pub mod store;

pub use config::ControllerConfig;
pub use enqueue::{Enqueue, EnqueueFn};
pub use error::StoreError;
pub use key::{Kind, ObjectKey};
pub use object::{ChangeEvent, EventType, OwnerReference};
pub use store::{ActiveObject, ActiveObjectLister, MemoryStore, Scope};
