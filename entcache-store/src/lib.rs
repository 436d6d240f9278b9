//! Reducers and the dispatch store for entcache.
//!
//! - [`ChangeTracker`]: tracked mutations and server reconciliation
//! - [`EntityCollectionReducer`]: the per-collection state machine
//! - [`EntityCacheReducer`]: routes entity actions, applies cache actions
//! - [`MetaReducer`]: wraps reduction ([`LoggingMetaReducer`])
//! - [`EntitySelectors`]: read-only projections
//! - [`Store`]: serialized dispatch, snapshot and action channels
//!
//! Reduction is synchronous and never fails.

mod cache_reducer;
mod change_tracker;
mod collection_reducer;
mod meta_reducer;
mod selectors;
mod store;

pub use cache_reducer::EntityCacheReducer;
pub use change_tracker::ChangeTracker;
pub use collection_reducer::{
    CollectionReducer, EntityCollectionReducer, EntityCollectionReducerRegistry,
};
pub use meta_reducer::{LoggingMetaReducer, MetaReducer, Next};
pub use selectors::{cache_snapshot, EntitySelectors};
pub use store::{Store, StoreConfig};
