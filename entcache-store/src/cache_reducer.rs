//! The cache-level reducer: routes entity actions to their collection and
//! applies cache-wide actions as single transitions.

use crate::change_tracker::ChangeTracker;
use crate::collection_reducer::{sort_collection, EntityCollectionReducerRegistry};
use entcache_model::{
    Action, ChangeSet, ChangeSetItem, ChangeSetOperation, EntityAction, EntityCache,
    EntityCacheAction, EntityCacheQuerySet, EntityCollection, EntityDefinition,
    EntityDefinitionService, SaveEntitiesOptions,
};
use entcache_types::{CorrelationId, EntityKey};
use std::sync::Arc;
use tracing::debug;

/// Reduces any [`Action`] into an [`EntityCache`].
#[derive(Debug, Clone)]
pub struct EntityCacheReducer {
    registry: EntityCollectionReducerRegistry,
}

impl EntityCacheReducer {
    #[must_use]
    pub fn new(registry: EntityCollectionReducerRegistry) -> Self {
        Self { registry }
    }

    /// A reducer using the default collection reducer for every type.
    #[must_use]
    pub fn with_definitions(definitions: Arc<EntityDefinitionService>) -> Self {
        Self::new(EntityCollectionReducerRegistry::new(definitions))
    }

    pub fn registry(&self) -> &EntityCollectionReducerRegistry {
        &self.registry
    }

    fn definitions(&self) -> &EntityDefinitionService {
        self.registry.definitions()
    }

    pub fn reduce(&self, cache: &mut EntityCache, action: &Action) {
        match action {
            Action::Entity(action) => self.reduce_entity_action(cache, action),
            Action::Cache(action) => self.reduce_cache_action(cache, action),
            Action::Custom { .. } => {}
        }
    }

    fn reduce_entity_action(&self, cache: &mut EntityCache, action: &EntityAction) {
        let name = action.entity_name();
        let reducer = self.registry.get_or_create(name);
        let collection = self.collection_mut(cache, name);
        reducer.reduce(collection, action);
    }

    /// The named collection, created from its definition on first use.
    fn collection_mut<'c>(&self, cache: &'c mut EntityCache, name: &str) -> &'c mut EntityCollection {
        let definition = self.definitions().definition_or_default(name);
        cache.get_or_insert_with(name, || definition.initial_state.clone())
    }

    fn reduce_cache_action(&self, cache: &mut EntityCache, action: &EntityCacheAction) {
        match action {
            EntityCacheAction::ClearCollections { collections, .. } => {
                let names: Vec<String> = match collections {
                    Some(names) => names.clone(),
                    None => cache.entity_names().map(str::to_string).collect(),
                };
                for name in names {
                    let definition = self.definitions().definition_or_default(&name);
                    cache.insert(definition.initial_state.clone());
                }
            }
            EntityCacheAction::LoadCollections { collections, .. } => {
                self.load_collections(cache, collections);
            }
            EntityCacheAction::MergeQuerySet {
                query_set,
                merge_strategy,
                ..
            } => {
                for (name, entities) in query_set {
                    let definition = self.definitions().definition_or_default(name);
                    let collection = self.collection_mut(cache, name);
                    ChangeTracker::new(&definition).merge_query_results(
                        collection,
                        entities.clone(),
                        *merge_strategy,
                    );
                    sort_collection(&definition, collection);
                }
            }
            EntityCacheAction::SetEntityCache { cache: replacement, .. } => {
                *cache = replacement.clone();
            }
            EntityCacheAction::SaveEntities {
                change_set,
                options,
                ..
            } => self.save_entities(cache, change_set, options),
            EntityCacheAction::SaveEntitiesSuccess {
                change_set,
                options,
                ..
            } => self.save_entities_success(cache, change_set, options),
            EntityCacheAction::SaveEntitiesError {
                error,
                change_set,
                options,
                ..
            } => {
                if error.is_duplicate_correlation_id() {
                    self.save_entities_refused(cache, change_set, options);
                } else {
                    self.save_entities_error(cache, change_set, options);
                }
            }
            EntityCacheAction::SaveEntitiesCancel { entity_names, .. } => {
                for name in entity_names.iter().flatten() {
                    if let Some(collection) = cache.get_mut(name) {
                        collection.loading = false;
                    }
                }
            }
            EntityCacheAction::SaveEntitiesCanceled {
                correlation_id,
                entity_names,
                ..
            } => {
                for name in entity_names.iter().flatten() {
                    if let Some(collection) = cache.get_mut(name) {
                        collection.loading = false;
                    }
                }
                self.undo_correlated_everywhere(cache, correlation_id);
            }
        }
    }

    fn load_collections(&self, cache: &mut EntityCache, collections: &EntityCacheQuerySet) {
        for (name, entities) in collections {
            let definition = self.definitions().definition_or_default(name);
            let tracker = ChangeTracker::new(&definition);
            let collection = self.collection_mut(cache, name);
            collection.set_all(tracker.keyed(entities.clone()));
            collection.change_state.clear();
            collection.loading = false;
            collection.loaded = true;
            sort_collection(&definition, collection);
        }
    }

    fn save_entities(&self, cache: &mut EntityCache, change_set: &ChangeSet, options: &SaveEntitiesOptions) {
        // Empty items are never sent, so they do not make a collection busy.
        let pending = change_set.clone().exclude_empty_items();
        for name in pending.entity_names() {
            self.collection_mut(cache, &name).loading = true;
        }
        if !options.is_optimistic {
            return;
        }
        let cid = Some(&options.correlation_id);
        for item in &change_set.changes {
            let definition = self.definitions().definition_or_default(&item.entity_name);
            let tracker = ChangeTracker::new(&definition);
            let collection = self.collection_mut(cache, &item.entity_name);
            match item.op {
                ChangeSetOperation::Add => {
                    tracker.add(collection, tracker.keyed(item.entities.clone()), cid);
                }
                ChangeSetOperation::Upsert => {
                    tracker.upsert(collection, tracker.keyed(item.entities.clone()), cid);
                }
                ChangeSetOperation::Update => tracker.update(collection, &item.updates(), cid),
                ChangeSetOperation::Delete => tracker.delete(collection, &item.keys(), cid),
            }
            sort_collection(&definition, collection);
        }
    }

    fn save_entities_success(
        &self,
        cache: &mut EntityCache,
        change_set: &ChangeSet,
        options: &SaveEntitiesOptions,
    ) {
        let cid = Some(&options.correlation_id);
        let strategy = options.merge_strategy;
        for item in &change_set.changes {
            let definition = self.definitions().definition_or_default(&item.entity_name);
            let tracker = ChangeTracker::new(&definition);
            let collection = self.collection_mut(cache, &item.entity_name);
            match item.op {
                ChangeSetOperation::Add | ChangeSetOperation::Upsert => {
                    tracker.merge_saved_entities(collection, item.entities.clone(), cid, strategy);
                }
                ChangeSetOperation::Update => {
                    tracker.merge_saved_updates(collection, &item.updates(), cid, strategy);
                }
                ChangeSetOperation::Delete => {
                    tracker.merge_saved_deletes(collection, &item.keys(), cid, strategy);
                }
            }
            sort_collection(&definition, collection);
        }
        for name in change_set.entity_names() {
            self.collection_mut(cache, &name).loading = false;
        }
    }

    fn save_entities_error(
        &self,
        cache: &mut EntityCache,
        change_set: &ChangeSet,
        options: &SaveEntitiesOptions,
    ) {
        let cid = &options.correlation_id;
        for item in &change_set.changes {
            let definition = self.definitions().definition_or_default(&item.entity_name);
            let tracker = ChangeTracker::new(&definition);
            let keys = item_keys(&definition, item);
            let collection = self.collection_mut(cache, &item.entity_name);
            tracker.rollback(collection, &keys, Some(cid), options.merge_strategy);
            collection.loading = false;
        }
        self.undo_correlated_everywhere(cache, cid);
    }

    /// A save refused for reusing a live correlation id reverts only the
    /// keys it named itself.
    fn save_entities_refused(
        &self,
        cache: &mut EntityCache,
        change_set: &ChangeSet,
        options: &SaveEntitiesOptions,
    ) {
        if !options.is_optimistic {
            return;
        }
        for item in &change_set.changes {
            let definition = self.definitions().definition_or_default(&item.entity_name);
            let keys = item_keys(&definition, item);
            let collection = self.collection_mut(cache, &item.entity_name);
            ChangeTracker::new(&definition).rollback(collection, &keys, None, options.merge_strategy);
        }
    }

    fn undo_correlated_everywhere(&self, cache: &mut EntityCache, correlation_id: &CorrelationId) {
        let names: Vec<String> = cache
            .collections()
            .filter(|c| {
                c.change_state
                    .values()
                    .any(|state| state.correlation_id.as_ref() == Some(correlation_id))
            })
            .map(|c| c.entity_name.clone())
            .collect();
        for name in names {
            let definition = self.definitions().definition_or_default(&name);
            let Some(collection) = cache.get_mut(&name) else {
                continue;
            };
            let reverted = ChangeTracker::new(&definition).undo_correlated(collection, correlation_id);
            if !reverted.is_empty() {
                debug!(
                    "Rolled back {} {} change(s) of {}",
                    reverted.len(),
                    name,
                    correlation_id
                );
                sort_collection(&definition, collection);
            }
        }
    }
}

fn item_keys(definition: &EntityDefinition, item: &ChangeSetItem) -> Vec<EntityKey> {
    match item.op {
        ChangeSetOperation::Delete => item.keys(),
        ChangeSetOperation::Update => item.updates().into_iter().map(|u| u.id).collect(),
        ChangeSetOperation::Add | ChangeSetOperation::Upsert => item
            .entities
            .iter()
            .filter_map(|entity| definition.select_id(entity))
            .collect(),
    }
}

