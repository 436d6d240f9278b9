//! Change tracking and server reconciliation for one collection.
//!
//! Every optimistic mutation records an undo entry in the collection's
//! `change_state`. Responses are reconciled against those entries: an entry
//! staged by the responding operation is committed or rolled back, an entry
//! staged by some other operation is *stale* and handled per
//! [`MergeStrategy`].

use entcache_model::{
    ChangeState, ChangeType, EntityCollection, EntityDefinition, MergeStrategy, Update,
};
use entcache_types::{CorrelationId, EntityKey};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Applies tracked mutations and merges server results into a collection.
#[derive(Debug, Clone, Copy)]
pub struct ChangeTracker<'a> {
    definition: &'a EntityDefinition,
    enabled: bool,
}

impl<'a> ChangeTracker<'a> {
    /// A tracker that records changes unless the metadata disables tracking.
    pub fn new(definition: &'a EntityDefinition) -> Self {
        Self {
            definition,
            enabled: definition.tracks_changes(),
        }
    }

    /// A tracker for a cache-only op: `IgnoreChanges` turns recording off.
    pub fn for_strategy(definition: &'a EntityDefinition, strategy: Option<MergeStrategy>) -> Self {
        Self {
            definition,
            enabled: definition.tracks_changes() && strategy != Some(MergeStrategy::IgnoreChanges),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Pairs each entity with its key. Entities without a key are dropped.
    pub fn keyed(&self, entities: Vec<Value>) -> Vec<(EntityKey, Value)> {
        entities
            .into_iter()
            .filter_map(|entity| match self.definition.select_id(&entity) {
                Some(key) => Some((key, entity)),
                None => {
                    warn!(
                        "Dropping {} entity without a key: {}",
                        self.definition.entity_name(),
                        entity
                    );
                    None
                }
            })
            .collect()
    }

    // ── Tracked mutations ────────────────────────────────────────

    /// Inserts entities whose key is absent and records them as added.
    pub fn add(
        &self,
        collection: &mut EntityCollection,
        entities: Vec<(EntityKey, Value)>,
        correlation_id: Option<&CorrelationId>,
    ) {
        for (key, entity) in entities {
            if collection.insert(key.clone(), entity) {
                self.record_added(collection, key, correlation_id);
            }
        }
    }

    /// Applies partial changes to present entities, recording their
    /// pre-change value.
    pub fn update(
        &self,
        collection: &mut EntityCollection,
        updates: &[Update],
        correlation_id: Option<&CorrelationId>,
    ) {
        for update in updates {
            let Some(current) = collection.get(&update.id).cloned() else {
                continue;
            };
            self.record_updated(collection, &update.id, &current, correlation_id);
            collection.replace(&update.id, update.apply_to(&current));
        }
    }

    /// Replaces present entities (recorded as updated) and inserts absent
    /// ones (recorded as added).
    pub fn upsert(
        &self,
        collection: &mut EntityCollection,
        entities: Vec<(EntityKey, Value)>,
        correlation_id: Option<&CorrelationId>,
    ) {
        for (key, entity) in entities {
            match collection.get(&key).cloned() {
                Some(current) => {
                    self.record_updated(collection, &key, &current, correlation_id);
                    collection.replace(&key, entity);
                }
                None => {
                    collection.insert(key.clone(), entity);
                    self.record_added(collection, key, correlation_id);
                }
            }
        }
    }

    /// Removes entities, recording their original value. Deleting an
    /// unsaved addition just discards it.
    pub fn delete(
        &self,
        collection: &mut EntityCollection,
        keys: &[EntityKey],
        correlation_id: Option<&CorrelationId>,
    ) {
        for key in keys {
            let Some(current) = collection.remove(key) else {
                continue;
            };
            if !self.enabled {
                continue;
            }
            match collection.change_state.get(key).map(|state| state.change_type) {
                Some(ChangeType::Added) => {
                    collection.change_state.remove(key);
                }
                Some(_) => {
                    if let Some(state) = collection.change_state.get_mut(key) {
                        state.change_type = ChangeType::Deleted;
                        state.correlation_id = correlation_id.cloned();
                    }
                }
                None => {
                    collection.change_state.insert(
                        key.clone(),
                        ChangeState::new(
                            ChangeType::Deleted,
                            Some(current),
                            correlation_id.cloned(),
                        ),
                    );
                }
            }
        }
    }

    fn record_added(
        &self,
        collection: &mut EntityCollection,
        key: EntityKey,
        correlation_id: Option<&CorrelationId>,
    ) {
        if !self.enabled {
            return;
        }
        match collection.change_state.get_mut(&key) {
            // Re-adding a deleted entity: it exists again with its old original.
            Some(state) => {
                if state.change_type == ChangeType::Deleted {
                    state.change_type = ChangeType::Updated;
                }
                state.correlation_id = correlation_id.cloned();
            }
            None => {
                collection.change_state.insert(
                    key,
                    ChangeState::new(ChangeType::Added, None, correlation_id.cloned()),
                );
            }
        }
    }

    fn record_updated(
        &self,
        collection: &mut EntityCollection,
        key: &EntityKey,
        current: &Value,
        correlation_id: Option<&CorrelationId>,
    ) {
        if !self.enabled {
            return;
        }
        match collection.change_state.get_mut(key) {
            Some(state) => state.correlation_id = correlation_id.cloned(),
            None => {
                collection.change_state.insert(
                    key.clone(),
                    ChangeState::new(
                        ChangeType::Updated,
                        Some(current.clone()),
                        correlation_id.cloned(),
                    ),
                );
            }
        }
    }

    // ── Commit & undo ────────────────────────────────────────────

    /// Accepts the current values of `keys` as saved.
    pub fn commit(&self, collection: &mut EntityCollection, keys: &[EntityKey]) {
        for key in keys {
            collection.change_state.remove(key);
        }
    }

    pub fn commit_all(&self, collection: &mut EntityCollection) {
        collection.change_state.clear();
    }

    /// Reverts `keys` to their pre-change state and clears their entries.
    pub fn undo(&self, collection: &mut EntityCollection, keys: &[EntityKey]) {
        for key in keys {
            let Some(state) = collection.change_state.remove(key) else {
                continue;
            };
            match (state.change_type, state.original_value) {
                (ChangeType::Added, _) => {
                    collection.remove(key);
                }
                (_, Some(original)) => collection.upsert(key.clone(), original),
                (_, None) => {
                    collection.remove(key);
                }
            }
        }
    }

    pub fn undo_all(&self, collection: &mut EntityCollection) {
        let keys: Vec<EntityKey> = collection.change_state.keys().cloned().collect();
        self.undo(collection, &keys);
    }

    /// Reverts every entry staged by `correlation_id`. Returns the keys
    /// that were reverted.
    pub fn undo_correlated(
        &self,
        collection: &mut EntityCollection,
        correlation_id: &CorrelationId,
    ) -> Vec<EntityKey> {
        let keys = correlated_keys(collection, correlation_id);
        self.undo(collection, &keys);
        keys
    }

    // ── Reconciling server results ───────────────────────────────

    /// Merges query results. Outstanding entries are treated per
    /// `strategy`; without one, server values win and entries are cleared.
    pub fn merge_query_results(
        &self,
        collection: &mut EntityCollection,
        entities: Vec<Value>,
        strategy: Option<MergeStrategy>,
    ) {
        let strategy = strategy.unwrap_or(MergeStrategy::OverwriteChanges);
        for (key, entity) in self.keyed(entities) {
            apply_strategy(collection, &key, Some(entity), strategy);
        }
    }

    /// Merges the entities returned by a successful add or upsert.
    ///
    /// An entity staged under the provisional key of `correlation_id` is
    /// moved to the key the server assigned, keeping its position.
    pub fn merge_saved_entities(
        &self,
        collection: &mut EntityCollection,
        entities: Vec<Value>,
        correlation_id: Option<&CorrelationId>,
        strategy: Option<MergeStrategy>,
    ) {
        for (key, entity) in self.keyed(entities) {
            if let Some(cid) = correlation_id {
                let provisional = EntityKey::provisional(cid);
                if provisional != key && collection.contains(&provisional) {
                    debug!("Re-keying {} {} as {}", collection.entity_name, provisional, key);
                    collection.rekey(&provisional, key.clone(), entity.clone());
                    if let Some(state) = collection.change_state.remove(&provisional) {
                        collection.change_state.insert(key.clone(), state);
                    }
                }
            }
            self.merge_saved(collection, &key, Some(entity), correlation_id, strategy);
        }
    }

    /// Merges the update records returned by a successful update. The
    /// server value is the changes applied to the last saved value.
    pub fn merge_saved_updates(
        &self,
        collection: &mut EntityCollection,
        updates: &[Update],
        correlation_id: Option<&CorrelationId>,
        strategy: Option<MergeStrategy>,
    ) {
        for update in updates {
            let saved = collection
                .change_state
                .get(&update.id)
                .and_then(|state| state.original_value.clone())
                .or_else(|| collection.get(&update.id).cloned());
            let Some(saved) = saved else {
                continue;
            };
            let server = update.apply_to(&saved);
            self.merge_saved(collection, &update.id, Some(server), correlation_id, strategy);
        }
    }

    /// Merges confirmed deletions.
    pub fn merge_saved_deletes(
        &self,
        collection: &mut EntityCollection,
        keys: &[EntityKey],
        correlation_id: Option<&CorrelationId>,
        strategy: Option<MergeStrategy>,
    ) {
        for key in keys {
            self.merge_saved(collection, key, None, correlation_id, strategy);
        }
    }

    /// Rolls back a failed save. Entries staged by `correlation_id` are
    /// always reverted; stale entries among `keys` are reverted unless
    /// `strategy` asks to keep local changes.
    pub fn rollback(
        &self,
        collection: &mut EntityCollection,
        keys: &[EntityKey],
        correlation_id: Option<&CorrelationId>,
        strategy: Option<MergeStrategy>,
    ) {
        let keep_stale = matches!(
            strategy,
            Some(MergeStrategy::IgnoreChanges | MergeStrategy::PreserveChanges)
        );
        let mut seen = HashSet::new();
        let mut to_undo = Vec::new();
        for key in keys {
            let Some(state) = collection.change_state.get(key) else {
                continue;
            };
            if state.is_stale_for(correlation_id) && keep_stale {
                debug!("Keeping stale {} change for {}", collection.entity_name, key);
                continue;
            }
            if seen.insert(key.clone()) {
                to_undo.push(key.clone());
            }
        }
        if let Some(cid) = correlation_id {
            for key in correlated_keys(collection, cid) {
                if seen.insert(key.clone()) {
                    to_undo.push(key);
                }
            }
        }
        self.undo(collection, &to_undo);
    }

    /// Reconciles one saved entity (`None` = deleted on the server).
    fn merge_saved(
        &self,
        collection: &mut EntityCollection,
        key: &EntityKey,
        server: Option<Value>,
        correlation_id: Option<&CorrelationId>,
        strategy: Option<MergeStrategy>,
    ) {
        let stale = collection
            .change_state
            .get(key)
            .is_some_and(|state| state.is_stale_for(correlation_id));
        let strategy = match (stale, strategy) {
            (true, Some(strategy)) => strategy,
            _ => MergeStrategy::OverwriteChanges,
        };
        apply_strategy(collection, key, server, strategy);
    }
}

fn correlated_keys(collection: &EntityCollection, correlation_id: &CorrelationId) -> Vec<EntityKey> {
    let mut keys: Vec<EntityKey> = collection
        .change_state
        .iter()
        .filter(|(_, state)| state.correlation_id.as_ref() == Some(correlation_id))
        .map(|(key, _)| key.clone())
        .collect();
    keys.sort();
    keys
}

fn set_entity(collection: &mut EntityCollection, key: &EntityKey, value: Option<Value>) {
    match value {
        Some(value) => collection.upsert(key.clone(), value),
        None => {
            collection.remove(key);
        }
    }
}

fn apply_strategy(
    collection: &mut EntityCollection,
    key: &EntityKey,
    server: Option<Value>,
    strategy: MergeStrategy,
) {
    match strategy {
        MergeStrategy::OverwriteChanges => {
            set_entity(collection, key, server);
            collection.change_state.remove(key);
        }
        MergeStrategy::IgnoreChanges => set_entity(collection, key, server),
        MergeStrategy::PreserveChanges => {
            let Some(state) = collection.change_state.get(key).cloned() else {
                set_entity(collection, key, server);
                return;
            };
            match (state.change_type, server) {
                (ChangeType::Deleted, Some(server)) => {
                    collection.change_state.insert(
                        key.clone(),
                        ChangeState::new(ChangeType::Deleted, Some(server), state.correlation_id),
                    );
                }
                (ChangeType::Deleted, None) => {
                    collection.change_state.remove(key);
                }
                (_, Some(server)) => {
                    let merged = match collection.get(key) {
                        Some(local) => overlay_local_changes(local, state.original_value.as_ref(), &server),
                        None => server.clone(),
                    };
                    collection.upsert(key.clone(), merged);
                    collection.change_state.insert(
                        key.clone(),
                        ChangeState::new(ChangeType::Updated, Some(server), state.correlation_id),
                    );
                }
                // Deleted on the server but edited here: the local entity
                // becomes a fresh addition.
                (_, None) => {
                    collection.change_state.insert(
                        key.clone(),
                        ChangeState::new(ChangeType::Added, None, state.correlation_id),
                    );
                }
            }
        }
    }
}

/// `server` with every field the user changed locally (relative to
/// `original`) taken from `local`.
fn overlay_local_changes(local: &Value, original: Option<&Value>, server: &Value) -> Value {
    let (Value::Object(local_fields), Value::Object(server_fields)) = (local, server) else {
        return local.clone();
    };
    let mut merged = server_fields.clone();
    for (field, value) in local_fields {
        if original.and_then(|o| o.get(field)) != Some(value) {
            merged.insert(field.clone(), value.clone());
        }
    }
    Value::Object(merged)
}
