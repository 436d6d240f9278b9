//! Core entity-cache model for entcache.
//!
//! Defines the types every other layer depends on:
//! - [`EntityAction`] and [`EntityActionFactory`]: CRUD intents and their outcomes
//! - [`EntityCollection`] / [`EntityCache`]: normalized cached state with an
//!   explicit undo log ([`ChangeState`])
//! - [`EntityMetadata`] / [`EntityDefinitionService`]: per-type configuration
//! - [`ChangeSet`]: multi-entity save transactions
//! - [`EntityCacheAction`] / [`Action`]: cache-wide actions and the dispatch envelope
//! - [`DataServiceError`]: failures carried as data
//!
//! Nothing in this crate performs I/O or holds state across calls.

mod action;
mod cache_action;
mod change_set;
mod collection;
mod error;
mod metadata;

pub use action::{
    format_action_type, merge_shallow, ActionOverrides, ActionTypeFormatter, EntityAction,
    EntityActionFactory, EntityActionOptions, EntityActionPayload, Update,
};
pub use cache_action::{Action, EntityCacheAction, SaveEntitiesOptions};
pub use change_set::{ChangeSet, ChangeSetItem, ChangeSetOperation};
pub use collection::{
    ChangeState, ChangeStateMap, ChangeType, EntityCache, EntityCacheQuerySet, EntityCollection,
};
pub use error::{ActionError, DataServiceError, HttpMethod, ServiceFailure, SnapshotError};
pub use metadata::{
    default_select_id, EntityDefinition, EntityDefinitionService, EntityDispatcherDefaultOptions,
    EntityMetadata, FilterFn, MergeStrategy, SelectIdFn, SortComparer,
};

pub use entcache_types::{CorrelationId, CorrelationIdGenerator, EntityKey, EntityOp};
