//! Read-only projections of the cache.

use entcache_model::{ChangeStateMap, EntityCache, EntityCollection, EntityDefinition};
use entcache_types::EntityKey;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Selectors for one entity type.
///
/// Every method takes the cache snapshot to read from; a type that was never
/// referenced reads as its initial (empty) collection.
#[derive(Debug, Clone)]
pub struct EntitySelectors {
    definition: Arc<EntityDefinition>,
}

impl EntitySelectors {
    #[must_use]
    pub fn new(definition: Arc<EntityDefinition>) -> Self {
        Self { definition }
    }

    pub fn entity_name(&self) -> &str {
        self.definition.entity_name()
    }

    pub fn collection<'c>(&'c self, cache: &'c EntityCache) -> &'c EntityCollection {
        cache
            .get(self.definition.entity_name())
            .unwrap_or(&self.definition.initial_state)
    }

    /// All entities in id order.
    pub fn entities<'c>(&'c self, cache: &'c EntityCache) -> Vec<&'c Value> {
        self.collection(cache).values().collect()
    }

    pub fn entity_map<'c>(&'c self, cache: &'c EntityCache) -> &'c HashMap<EntityKey, Value> {
        self.collection(cache).entity_map()
    }

    pub fn keys<'c>(&'c self, cache: &'c EntityCache) -> &'c [EntityKey] {
        self.collection(cache).ids()
    }

    pub fn count(&self, cache: &EntityCache) -> usize {
        self.collection(cache).len()
    }

    pub fn entity<'c>(&'c self, cache: &'c EntityCache, key: &EntityKey) -> Option<&'c Value> {
        self.collection(cache).get(key)
    }

    /// Entities passing the metadata filter function with the collection's
    /// current filter pattern. An empty pattern passes everything.
    pub fn filtered_entities<'c>(&'c self, cache: &'c EntityCache) -> Vec<&'c Value> {
        let collection = self.collection(cache);
        if collection.filter.is_empty() {
            return collection.values().collect();
        }
        collection
            .values()
            .filter(|entity| self.definition.matches_filter(entity, &collection.filter))
            .collect()
    }

    pub fn filter<'c>(&'c self, cache: &'c EntityCache) -> &'c str {
        &self.collection(cache).filter
    }

    pub fn loading(&self, cache: &EntityCache) -> bool {
        self.collection(cache).loading
    }

    pub fn loaded(&self, cache: &EntityCache) -> bool {
        self.collection(cache).loaded
    }

    pub fn change_state<'c>(&'c self, cache: &'c EntityCache) -> &'c ChangeStateMap {
        &self.collection(cache).change_state
    }

    /// A metadata-provided collection field.
    pub fn extra<'c>(&'c self, cache: &'c EntityCache, field: &str) -> Option<&'c Value> {
        self.collection(cache).extra.get(field)
    }
}

/// The whole cache as plain JSON.
pub fn cache_snapshot(cache: &EntityCache) -> serde_json::Result<Value> {
    serde_json::to_value(cache)
}
