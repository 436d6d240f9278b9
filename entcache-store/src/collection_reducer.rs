//! The per-collection state machine.
//!
//! A collection's state is three orthogonal things: the `loading` and
//! `loaded` flags, and the presence of a change-state entry per id. Every
//! [`EntityOp`] maps to exactly one transition below; unknown data shapes
//! degrade to no-ops, so the reducer never fails.

use crate::change_tracker::ChangeTracker;
use entcache_model::{
    ChangeState, ChangeStateMap, EntityAction, EntityCollection, EntityDefinition,
    EntityDefinitionService,
};
use entcache_types::{EntityKey, EntityOp};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Applies entity actions to the collection of one entity type.
pub trait CollectionReducer: Send + Sync {
    fn reduce(&self, collection: &mut EntityCollection, action: &EntityAction);
}

/// The reducer every entity type gets unless a custom one is registered.
#[derive(Debug, Clone)]
pub struct EntityCollectionReducer {
    definition: Arc<EntityDefinition>,
}

impl EntityCollectionReducer {
    #[must_use]
    pub fn new(definition: Arc<EntityDefinition>) -> Self {
        Self { definition }
    }

    pub fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    /// Keys named by the action data: raw keys or whole entities.
    fn keys_of(&self, action: &EntityAction) -> Vec<EntityKey> {
        data_items(action)
            .iter()
            .filter_map(|item| {
                EntityKey::from_value(item).or_else(|| self.definition.select_id(item))
            })
            .collect()
    }

    /// Entities to stage for a save request. A single added entity without
    /// a key is staged under the provisional key of its correlation id.
    fn staged_entities(&self, action: &EntityAction) -> Vec<(EntityKey, Value)> {
        if action.entity_op() == EntityOp::SaveAddOne {
            if let (Some(entity), Some(cid)) = (action.entity(), action.correlation_id()) {
                if self.definition.select_id(entity).is_none() {
                    return vec![(EntityKey::provisional(cid), entity.clone())];
                }
            }
        }
        ChangeTracker::new(&self.definition).keyed(action.entities())
    }

    /// Keys touched by the request a completion belongs to.
    fn request_keys(&self, action: &EntityAction) -> Vec<EntityKey> {
        match action.entity_op().request() {
            EntityOp::SaveUpdateOne | EntityOp::SaveUpdateMany => {
                action.updates().into_iter().map(|u| u.id).collect()
            }
            EntityOp::SaveDeleteOne | EntityOp::SaveDeleteMany => self.keys_of(action),
            _ => data_items(action)
                .iter()
                .filter_map(|entity| {
                    self.definition
                        .select_id(entity)
                        .or_else(|| action.correlation_id().map(EntityKey::provisional))
                })
                .collect(),
        }
    }

    fn set_change_state(&self, collection: &mut EntityCollection, data: Option<&Value>) {
        let Some(data) = data.filter(|d| !d.is_null()) else {
            collection.change_state.clear();
            return;
        };
        let raw: HashMap<String, ChangeState> = match serde_json::from_value(data.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Ignoring malformed change state for {}: {}", collection.entity_name, e);
                return;
            }
        };
        let by_display: HashMap<String, EntityKey> = collection
            .ids()
            .iter()
            .map(|id| (id.to_string(), id.clone()))
            .collect();
        let change_state: ChangeStateMap = raw
            .into_iter()
            .map(|(raw_key, state)| {
                let key = by_display
                    .get(&raw_key)
                    .cloned()
                    .or_else(|| {
                        state
                            .original_value
                            .as_ref()
                            .and_then(|v| self.definition.select_id(v))
                            .filter(|k| k.to_string() == raw_key)
                    })
                    .unwrap_or_else(|| match raw_key.parse::<i64>() {
                        Ok(n) => EntityKey::Num(n),
                        Err(_) => EntityKey::Str(raw_key),
                    });
                (key, state)
            })
            .collect();
        collection.change_state = change_state;
    }

    fn set_collection(&self, collection: &mut EntityCollection, data: Option<&Value>) {
        let Some(data) = data else {
            return;
        };
        match serde_json::from_value::<EntityCollection>(data.clone()) {
            Ok(mut replacement) => {
                replacement.entity_name = collection.entity_name.clone();
                *collection = replacement;
            }
            Err(e) => warn!("Ignoring invalid {} collection: {}", collection.entity_name, e),
        }
    }
}

impl CollectionReducer for EntityCollectionReducer {
    fn reduce(&self, collection: &mut EntityCollection, action: &EntityAction) {
        use EntityOp::*;

        let definition = &*self.definition;
        let cid = action.correlation_id();
        let strategy = action.merge_strategy();
        // Persisting ops always track; cache-only ops honor IgnoreChanges.
        let tracker = ChangeTracker::new(definition);
        let cache_tracker = ChangeTracker::for_strategy(definition, strategy);

        match action.entity_op() {
            CancelPersist => collection.loading = false,
            CanceledPersist => {
                collection.loading = false;
                if let Some(cid) = cid {
                    tracker.undo_correlated(collection, cid);
                }
            }

            // ── Queries ──────────────────────────────────────────
            QueryAll | QueryLoad | QueryMany | QueryByKey => collection.loading = true,
            QueryAllSuccess => {
                tracker.merge_query_results(collection, action.entities(), strategy);
                collection.loading = false;
                collection.loaded = true;
            }
            QueryLoadSuccess => {
                collection.set_all(tracker.keyed(action.entities()));
                collection.change_state.clear();
                collection.loading = false;
                collection.loaded = true;
            }
            QueryManySuccess | QueryByKeySuccess => {
                tracker.merge_query_results(collection, action.entities(), strategy);
                collection.loading = false;
            }
            QueryAllError | QueryLoadError | QueryManyError | QueryByKeyError => {
                collection.loading = false;
            }

            // ── Save requests ────────────────────────────────────
            SaveAddOne | SaveAddMany => {
                collection.loading = true;
                if action.is_optimistic() {
                    tracker.add(collection, self.staged_entities(action), cid);
                }
            }
            SaveUpdateOne | SaveUpdateMany => {
                collection.loading = true;
                if action.is_optimistic() {
                    tracker.update(collection, &action.updates(), cid);
                }
            }
            SaveUpsertOne | SaveUpsertMany => {
                collection.loading = true;
                if action.is_optimistic() {
                    tracker.upsert(collection, tracker.keyed(action.entities()), cid);
                }
            }
            SaveDeleteOne | SaveDeleteMany => {
                collection.loading = true;
                if action.is_optimistic() {
                    tracker.delete(collection, &self.keys_of(action), cid);
                }
            }

            // ── Save completions ─────────────────────────────────
            SaveAddOneSuccess | SaveAddManySuccess | SaveUpsertOneSuccess
            | SaveUpsertManySuccess => {
                collection.loading = false;
                tracker.merge_saved_entities(collection, action.entities(), cid, strategy);
            }
            SaveUpdateOneSuccess | SaveUpdateManySuccess => {
                collection.loading = false;
                tracker.merge_saved_updates(collection, &action.updates(), cid, strategy);
            }
            SaveDeleteOneSuccess | SaveDeleteManySuccess => {
                collection.loading = false;
                tracker.merge_saved_deletes(collection, &self.keys_of(action), cid, strategy);
            }
            SaveAddOneError | SaveAddManyError | SaveUpdateOneError | SaveUpdateManyError
            | SaveUpsertOneError | SaveUpsertManyError | SaveDeleteOneError
            | SaveDeleteManyError => {
                if action.error().is_some_and(|e| e.is_duplicate_correlation_id()) {
                    // The request in flight under this id still owns its
                    // staged entries and the loading flag.
                    tracker.rollback(collection, &self.request_keys(action), None, strategy);
                } else {
                    collection.loading = false;
                    tracker.rollback(collection, &self.request_keys(action), cid, strategy);
                }
            }

            // ── Cache-only ───────────────────────────────────────
            AddAll => {
                collection.set_all(tracker.keyed(action.entities()));
                collection.change_state.clear();
                collection.loading = false;
                collection.loaded = true;
            }
            AddMany | AddOne => {
                cache_tracker.add(collection, tracker.keyed(action.entities()), cid);
            }
            RemoveAll => {
                collection.clear_entities();
                collection.change_state.clear();
                collection.loading = false;
                collection.loaded = false;
            }
            RemoveMany | RemoveOne => cache_tracker.delete(collection, &self.keys_of(action), cid),
            UpdateMany | UpdateOne => cache_tracker.update(collection, &action.updates(), cid),
            UpsertMany | UpsertOne => {
                cache_tracker.upsert(collection, tracker.keyed(action.entities()), cid);
            }
            CommitAll => tracker.commit_all(collection),
            CommitMany | CommitOne => tracker.commit(collection, &self.keys_of(action)),
            UndoAll => tracker.undo_all(collection),
            UndoMany | UndoOne => tracker.undo(collection, &self.keys_of(action)),
            SetChangeState => self.set_change_state(collection, action.data()),
            SetCollection => self.set_collection(collection, action.data()),
            SetFilter => {
                collection.filter = action
                    .data()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
            }
            SetLoaded => collection.loaded = flag(action),
            SetLoading => collection.loading = flag(action),
        }

        sort_collection(definition, collection);
    }
}

/// Re-applies the metadata sort order, if any.
pub(crate) fn sort_collection(definition: &EntityDefinition, collection: &mut EntityCollection) {
    if let Some(compare) = definition.sort_comparer() {
        collection.sort_by(|a, b| compare(a, b));
    }
}

fn data_items(action: &EntityAction) -> Vec<Value> {
    match action.data() {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    }
}

fn flag(action: &EntityAction) -> bool {
    action.data().and_then(Value::as_bool).unwrap_or(false)
}

/// Resolves the reducer for each entity type: a registered custom reducer,
/// or the default one built from the type's definition.
#[derive(Clone)]
pub struct EntityCollectionReducerRegistry {
    definitions: Arc<EntityDefinitionService>,
    custom: HashMap<String, Arc<dyn CollectionReducer>>,
}

impl EntityCollectionReducerRegistry {
    #[must_use]
    pub fn new(definitions: Arc<EntityDefinitionService>) -> Self {
        Self {
            definitions,
            custom: HashMap::new(),
        }
    }

    /// Registers a reducer that replaces the default for `entity_name`.
    pub fn register(&mut self, entity_name: impl Into<String>, reducer: Arc<dyn CollectionReducer>) {
        self.custom.insert(entity_name.into(), reducer);
    }

    pub fn with_reducer(
        mut self,
        entity_name: impl Into<String>,
        reducer: Arc<dyn CollectionReducer>,
    ) -> Self {
        self.register(entity_name, reducer);
        self
    }

    pub fn get_or_create(&self, entity_name: &str) -> Arc<dyn CollectionReducer> {
        match self.custom.get(entity_name) {
            Some(reducer) => Arc::clone(reducer),
            None => Arc::new(EntityCollectionReducer::new(
                self.definitions.definition_or_default(entity_name),
            )),
        }
    }

    pub fn definitions(&self) -> &Arc<EntityDefinitionService> {
        &self.definitions
    }
}

impl std::fmt::Debug for EntityCollectionReducerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCollectionReducerRegistry")
            .field("definitions", &self.definitions)
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}
