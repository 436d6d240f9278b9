//! Normalized entity collections and the cache that holds them.
//!
//! A collection keeps `ids` (ordered) and `entities` (by key) in lockstep:
//! `ids` is always exactly the key set of `entities`, without duplicates.
//! The mutation methods below are the only way to touch either, so the
//! invariant cannot be broken from outside this module.

use crate::error::SnapshotError;
use entcache_types::{CorrelationId, EntityKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Kind of unsaved change recorded for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Added,
    Updated,
    Deleted,
}

/// Undo record for one entity with a pending change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeState {
    pub change_type: ChangeType,
    /// Value before the first unsaved change; `None` for additions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_value: Option<Value>,
    /// Operation that staged the latest change, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl ChangeState {
    pub fn new(
        change_type: ChangeType,
        original_value: Option<Value>,
        correlation_id: Option<CorrelationId>,
    ) -> Self {
        Self {
            change_type,
            original_value,
            correlation_id,
        }
    }

    /// Whether this record was staged by an operation other than
    /// `correlation_id`, i.e. a newer local edit superseded it.
    pub fn is_stale_for(&self, correlation_id: Option<&CorrelationId>) -> bool {
        match correlation_id {
            Some(id) => self.correlation_id.as_ref() != Some(id),
            None => false,
        }
    }
}

/// Pending changes of a collection, by entity key.
pub type ChangeStateMap = HashMap<EntityKey, ChangeState>;

/// The cached state of one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CollectionSnapshot", into = "CollectionSnapshot")]
pub struct EntityCollection {
    pub entity_name: String,
    ids: Vec<EntityKey>,
    entities: HashMap<EntityKey, Value>,
    pub filter: String,
    pub loading: bool,
    pub loaded: bool,
    pub change_state: ChangeStateMap,
    /// Entity-type specific fields from metadata.
    pub extra: Map<String, Value>,
}

impl EntityCollection {
    /// An empty collection.
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            ids: Vec::new(),
            entities: HashMap::new(),
            filter: String::new(),
            loading: false,
            loaded: false,
            change_state: HashMap::new(),
            extra: Map::new(),
        }
    }

    // ── Reads ────────────────────────────────────────────────────

    pub fn ids(&self) -> &[EntityKey] {
        &self.ids
    }

    pub fn get(&self, key: &EntityKey) -> Option<&Value> {
        self.entities.get(key)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, &Value)> {
        self.ids
            .iter()
            .filter_map(|id| self.entities.get(id).map(|e| (id, e)))
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.iter().map(|(_, e)| e)
    }

    pub fn entity_map(&self) -> &HashMap<EntityKey, Value> {
        &self.entities
    }

    // ── Entity mutations ─────────────────────────────────────────

    /// Adds an entity if its key is not present yet. Returns whether it
    /// was added.
    pub fn insert(&mut self, key: EntityKey, entity: Value) -> bool {
        if self.entities.contains_key(&key) {
            return false;
        }
        self.ids.push(key.clone());
        self.entities.insert(key, entity);
        true
    }

    /// Replaces an existing entity in place or appends a new one.
    pub fn upsert(&mut self, key: EntityKey, entity: Value) {
        if let Some(existing) = self.entities.get_mut(&key) {
            *existing = entity;
        } else {
            self.ids.push(key.clone());
            self.entities.insert(key, entity);
        }
    }

    /// Replaces an existing entity; does nothing when the key is absent.
    pub fn replace(&mut self, key: &EntityKey, entity: Value) -> bool {
        match self.entities.get_mut(key) {
            Some(existing) => {
                *existing = entity;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &EntityKey) -> Option<Value> {
        let removed = self.entities.remove(key)?;
        self.ids.retain(|id| id != key);
        Some(removed)
    }

    /// Moves an entity to a new key, keeping its position in `ids`.
    ///
    /// When `new_key` is already present the old entry is dropped and the
    /// existing one is overwritten at its own position.
    pub fn rekey(&mut self, old_key: &EntityKey, new_key: EntityKey, entity: Value) {
        if old_key == &new_key {
            self.upsert(new_key, entity);
            return;
        }
        if self.entities.contains_key(&new_key) || !self.entities.contains_key(old_key) {
            self.remove(old_key);
            self.upsert(new_key, entity);
            return;
        }
        self.entities.remove(old_key);
        if let Some(slot) = self.ids.iter_mut().find(|id| *id == old_key) {
            *slot = new_key.clone();
        }
        self.entities.insert(new_key, entity);
    }

    /// Replaces every entity, keeping the given order and dropping
    /// duplicate keys (last value wins).
    pub fn set_all(&mut self, entities: impl IntoIterator<Item = (EntityKey, Value)>) {
        self.ids.clear();
        self.entities.clear();
        for (key, entity) in entities {
            self.upsert(key, entity);
        }
    }

    pub fn clear_entities(&mut self) {
        self.ids.clear();
        self.entities.clear();
    }

    /// Reorders `ids` with a comparer over entities. Stable.
    pub fn sort_by(&mut self, compare: impl Fn(&Value, &Value) -> Ordering) {
        let entities = &self.entities;
        self.ids.sort_by(|a, b| match (entities.get(a), entities.get(b)) {
            (Some(x), Some(y)) => compare(x, y),
            _ => Ordering::Equal,
        });
    }

    /// Whether the collection has any pending change.
    pub fn has_changes(&self) -> bool {
        !self.change_state.is_empty()
    }
}

// ── Wire shape ───────────────────────────────────────────────────

/// Plain-JSON rendition of a collection. Object keys must be strings, so
/// entities and change state are keyed by the key's display form and
/// mapped back through `ids` on the way in.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionSnapshot {
    entity_name: String,
    ids: Vec<EntityKey>,
    entities: BTreeMap<String, Value>,
    #[serde(default)]
    filter: String,
    #[serde(default)]
    loading: bool,
    #[serde(default)]
    loaded: bool,
    #[serde(default)]
    change_state: BTreeMap<String, ChangeState>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<EntityCollection> for CollectionSnapshot {
    fn from(mut c: EntityCollection) -> Self {
        let entities = c
            .ids
            .iter()
            .filter_map(|id| c.entities.remove(id).map(|e| (id.to_string(), e)))
            .collect();
        let change_state = c
            .change_state
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            entity_name: c.entity_name,
            ids: c.ids,
            entities,
            filter: c.filter,
            loading: c.loading,
            loaded: c.loaded,
            change_state,
            extra: c.extra,
        }
    }
}

impl TryFrom<CollectionSnapshot> for EntityCollection {
    type Error = SnapshotError;

    fn try_from(mut s: CollectionSnapshot) -> Result<Self, Self::Error> {
        let inconsistent = |reason: String| SnapshotError {
            entity_name: s.entity_name.clone(),
            reason,
        };

        let mut seen = HashSet::new();
        let mut entities = HashMap::with_capacity(s.ids.len());
        for id in &s.ids {
            if !seen.insert(id.clone()) {
                return Err(inconsistent(format!("duplicate id {id}")));
            }
            let entity = s
                .entities
                .remove(&id.to_string())
                .ok_or_else(|| inconsistent(format!("id {id} has no entity")))?;
            entities.insert(id.clone(), entity);
        }
        if let Some(orphan) = s.entities.keys().next() {
            return Err(inconsistent(format!("entity {orphan} is not listed in ids")));
        }

        let by_display: HashMap<String, EntityKey> =
            s.ids.iter().map(|id| (id.to_string(), id.clone())).collect();
        let change_state = std::mem::take(&mut s.change_state)
            .into_iter()
            .map(|(k, v)| (key_from_display(&by_display, &k, &v), v))
            .collect();

        Ok(Self {
            entity_name: s.entity_name,
            ids: s.ids,
            entities,
            filter: s.filter,
            loading: s.loading,
            loaded: s.loaded,
            change_state,
            extra: s.extra,
        })
    }
}

/// Recovers a change-state key. Keys of deleted entities are no longer in
/// `ids`; for those the original value's `id` field is consulted, then an
/// integer parse.
fn key_from_display(by_display: &HashMap<String, EntityKey>, raw: &str, state: &ChangeState) -> EntityKey {
    if let Some(key) = by_display.get(raw) {
        return key.clone();
    }
    if let Some(key) = state
        .original_value
        .as_ref()
        .and_then(|v| v.get("id"))
        .and_then(EntityKey::from_value)
        .filter(|k| k.to_string() == raw)
    {
        return key;
    }
    raw.parse::<i64>()
        .map(EntityKey::Num)
        .unwrap_or_else(|_| EntityKey::Str(raw.to_string()))
}

// ── Cache ────────────────────────────────────────────────────────

/// Entity lists by entity name, as returned by a multi-entity query.
pub type EntityCacheQuerySet = BTreeMap<String, Vec<Value>>;

/// All collections, by entity name. A missing name means the entity type
/// was never referenced.
///
/// Collections are shared between clones of the cache; mutable access
/// copies only the collection it touches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityCache {
    collections: BTreeMap<String, Arc<EntityCollection>>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_name: &str) -> Option<&EntityCollection> {
        self.collections.get(entity_name).map(Arc::as_ref)
    }

    pub fn get_mut(&mut self, entity_name: &str) -> Option<&mut EntityCollection> {
        self.collections.get_mut(entity_name).map(Arc::make_mut)
    }

    /// Whether `a` and `b` hold the very same copy of `entity_name`.
    pub fn shares_collection(a: &Self, b: &Self, entity_name: &str) -> bool {
        match (a.collections.get(entity_name), b.collections.get(entity_name)) {
            (Some(x), Some(y)) => Arc::ptr_eq(x, y),
            _ => false,
        }
    }

    pub fn contains(&self, entity_name: &str) -> bool {
        self.collections.contains_key(entity_name)
    }

    pub fn insert(&mut self, collection: EntityCollection) -> Option<EntityCollection> {
        self.collections
            .insert(collection.entity_name.clone(), Arc::new(collection))
            .map(Arc::unwrap_or_clone)
    }

    pub fn remove(&mut self, entity_name: &str) -> Option<EntityCollection> {
        self.collections.remove(entity_name).map(Arc::unwrap_or_clone)
    }

    /// The collection for `entity_name`, created with `init` if absent.
    pub fn get_or_insert_with(
        &mut self,
        entity_name: &str,
        init: impl FnOnce() -> EntityCollection,
    ) -> &mut EntityCollection {
        let shared = self
            .collections
            .entry(entity_name.to_string())
            .or_insert_with(|| Arc::new(init()));
        Arc::make_mut(shared)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn collections(&self) -> impl Iterator<Item = &EntityCollection> {
        self.collections.values().map(Arc::as_ref)
    }

    /// Mutable access to every collection. Copies each one still shared.
    pub fn collections_mut(&mut self) -> impl Iterator<Item = &mut EntityCollection> {
        self.collections.values_mut().map(Arc::make_mut)
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}
