//! Turns raw change notifications into reconciliation keys.
//!
//! Primary objects enqueue themselves. Related objects are reduced to their
//! controlling owner through a small table of per-kind resolvers. Any change
//! is also offered to the dependency tracker so objects that were merely
//! referenced during reconciliation re-trigger their dependents.

pub mod dispatcher;
pub mod feed;
pub mod resolver;

pub use dispatcher::EventDispatcher;
pub use feed::run_feed;
pub use resolver::{controller_owner, OwnerResolver, RelatedKind};
