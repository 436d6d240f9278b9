//! Data-service pipelines and dispatchers for entcache.
//!
//! # Architecture
//!
//! The store reduces actions synchronously; everything that talks to a
//! server lives here and reacts to the actions the store feeds it:
//!
//! - **Data services**: async traits for per-entity CRUD and change-set saves
//! - **Persist pipeline**: `QUERY_*` / `SAVE_*` requests to completions
//! - **Save pipeline**: `SaveEntities` to success, error or canceled
//! - **Dispatchers**: commands that dispatch and await their completion
//! - **Engine**: runs the pipelines against a store
//!
//! Every request is raced against a cancel carrying its correlation id;
//! whichever finishes first decides the single completion.
//!
//! # Example
//!
//! ```
//! use entcache_model::{EntityDefinitionService, EntityMetadata};
//! use entcache_store::Store;
//! use entcache_sync::{mock::MockCollectionService, DataServiceRegistry, EntityCacheEngine};
//! use std::sync::Arc;
//!
//! let definitions = EntityDefinitionService::from_metadata([EntityMetadata::new("Hero")]);
//! let store = Arc::new(Store::new(Arc::new(definitions)));
//! let services = DataServiceRegistry::new()
//!     .with_service(Arc::new(MockCollectionService::new("Hero")));
//!
//! let engine = EntityCacheEngine::new(store, services);
//! let heroes = engine.dispatcher("Hero");
//! assert_eq!(heroes.entity_name(), "Hero");
//! ```

mod config;
mod data_service;
mod dispatcher;
mod engine;
mod error;
mod inflight;
pub mod persist;
pub mod pipeline;
pub mod save_entities;

pub use config::{DataServiceConfig, HttpUrlGenerator};
pub use data_service::{
    mock, DataServiceRegistry, EntityCacheDataService, EntityCollectionDataService, ServiceResult,
};
pub use dispatcher::{EntityCacheDispatcher, EntityDispatcher};
pub use engine::EntityCacheEngine;
pub use error::{SyncError, SyncResult};
pub use inflight::{CancelReceiver, InFlight};
pub use persist::persist_pipeline;
pub use save_entities::save_entities_pipeline;
