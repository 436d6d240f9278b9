//! Per-entity metadata and the registry of resolved definitions.
//!
//! [`EntityMetadata`] is what an application declares about an entity type:
//! how to find an entity's key, how to filter and sort, and which commands
//! default to optimistic. [`EntityDefinitionService`] resolves it once into
//! an [`EntityDefinition`] shared by reducers, selectors and dispatchers.

use crate::collection::EntityCollection;
use entcache_types::EntityKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Extracts the primary key from an entity.
pub type SelectIdFn = Arc<dyn Fn(&Value) -> Option<EntityKey> + Send + Sync>;

/// Decides whether an entity matches the collection's filter pattern.
pub type FilterFn = Arc<dyn Fn(&Value, &str) -> bool + Send + Sync>;

/// Orders entities within a sorted collection.
pub type SortComparer = Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>;

/// How a server response is reconciled with a pending local change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// The response overwrites the entity; the pending change record is
    /// left exactly as it was.
    IgnoreChanges,
    /// Fields the user changed locally win; the response becomes the new
    /// original value the change can be undone to.
    PreserveChanges,
    /// The response wins and the pending change record is cleared.
    OverwriteChanges,
}

/// Reads the `id` field. Used when metadata does not say otherwise.
pub fn default_select_id(entity: &Value) -> Option<EntityKey> {
    entity.get("id").and_then(EntityKey::from_value)
}

/// Whether persisting commands of each kind are optimistic by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDispatcherDefaultOptions {
    pub optimistic_add: bool,
    pub optimistic_delete: bool,
    pub optimistic_update: bool,
    pub optimistic_upsert: bool,
    pub optimistic_save_entities: bool,
}

impl Default for EntityDispatcherDefaultOptions {
    fn default() -> Self {
        Self {
            optimistic_add: false,
            optimistic_delete: true,
            optimistic_update: false,
            optimistic_upsert: false,
            optimistic_save_entities: false,
        }
    }
}

/// Per-entity-type configuration.
#[derive(Clone)]
pub struct EntityMetadata {
    pub entity_name: String,
    pub select_id: Option<SelectIdFn>,
    pub filter_fn: Option<FilterFn>,
    pub sort_comparer: Option<SortComparer>,
    /// Extra fields every collection of this type starts with.
    pub additional_collection_state: serde_json::Map<String, Value>,
    /// Skip change tracking entirely; optimistic ops cannot be rolled back.
    pub no_change_tracking: bool,
    pub entity_dispatcher_options: Option<EntityDispatcherDefaultOptions>,
}

impl EntityMetadata {
    /// Metadata with every option left at its default.
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            select_id: None,
            filter_fn: None,
            sort_comparer: None,
            additional_collection_state: serde_json::Map::new(),
            no_change_tracking: false,
            entity_dispatcher_options: None,
        }
    }

    /// Reads keys with `select_id` instead of the `id` field.
    pub fn with_select_id(
        mut self,
        select_id: impl Fn(&Value) -> Option<EntityKey> + Send + Sync + 'static,
    ) -> Self {
        self.select_id = Some(Arc::new(select_id));
        self
    }

    /// Filters entities against the collection's filter pattern.
    pub fn with_filter_fn(
        mut self,
        filter_fn: impl Fn(&Value, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter_fn = Some(Arc::new(filter_fn));
        self
    }

    /// Keeps the collection sorted; ids follow insertion order without one.
    pub fn with_sort_comparer(
        mut self,
        comparer: impl Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        self.sort_comparer = Some(Arc::new(comparer));
        self
    }

    /// Adds an extra field to the initial collection state.
    pub fn with_additional_state(mut self, field: impl Into<String>, value: Value) -> Self {
        self.additional_collection_state.insert(field.into(), value);
        self
    }

    /// Turns change tracking off for this entity type.
    pub fn without_change_tracking(mut self) -> Self {
        self.no_change_tracking = true;
        self
    }

    /// Overrides the optimism defaults of this type's dispatchers.
    pub fn with_dispatcher_options(mut self, options: EntityDispatcherDefaultOptions) -> Self {
        self.entity_dispatcher_options = Some(options);
        self
    }
}

impl fmt::Debug for EntityMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMetadata")
            .field("entity_name", &self.entity_name)
            .field("select_id", &self.select_id.is_some())
            .field("filter_fn", &self.filter_fn.is_some())
            .field("sort_comparer", &self.sort_comparer.is_some())
            .field("additional_collection_state", &self.additional_collection_state)
            .field("no_change_tracking", &self.no_change_tracking)
            .field("entity_dispatcher_options", &self.entity_dispatcher_options)
            .finish()
    }
}

/// Everything the cache needs to know about one entity type, resolved
/// from its metadata.
#[derive(Debug, Clone)]
pub struct EntityDefinition {
    pub metadata: EntityMetadata,
    pub initial_state: EntityCollection,
}

impl EntityDefinition {
    /// Resolves a definition from metadata.
    pub fn new(metadata: EntityMetadata) -> Self {
        let mut initial_state = EntityCollection::new(&metadata.entity_name);
        initial_state.extra = metadata.additional_collection_state.clone();
        Self {
            metadata,
            initial_state,
        }
    }

/// Name of the entity type.
    pub fn entity_name(&self) -> &str {
        &self.metadata.entity_name
    }

    /// Extracts the key of an entity, using the metadata selector if set.
    pub fn select_id(&self, entity: &Value) -> Option<EntityKey> {
        match &self.metadata.select_id {
            Some(select) => select(entity),
            None => default_select_id(entity),
        }
    }

    /// Whether an entity passes the filter pattern. Without a filter
    /// function every entity passes.
    pub fn matches_filter(&self, entity: &Value, pattern: &str) -> bool {
        match &self.metadata.filter_fn {
            Some(filter) => filter(entity, pattern),
            None => true,
        }
    }

    /// The comparer collections are kept sorted by, if any.
    pub fn sort_comparer(&self) -> Option<&SortComparer> {
        self.metadata.sort_comparer.as_ref()
    }

    /// Whether optimistic changes are recorded for undo and rollback.
    pub fn tracks_changes(&self) -> bool {
        !self.metadata.no_change_tracking
    }

    /// Optimism defaults for dispatchers, falling back to the global ones.
    pub fn dispatcher_options(&self) -> EntityDispatcherDefaultOptions {
        self.metadata.entity_dispatcher_options.unwrap_or_default()
    }
}

/// Registry of entity definitions, keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct EntityDefinitionService {
    definitions: HashMap<String, Arc<EntityDefinition>>,
}

impl EntityDefinitionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a batch of metadata.
    pub fn from_metadata(metadata: impl IntoIterator<Item = EntityMetadata>) -> Self {
        let mut service = Self::new();
        for meta in metadata {
            service.register_metadata(meta);
        }
        service
    }

    /// Registers (or replaces) the definition for one entity type.
    pub fn register_metadata(&mut self, metadata: EntityMetadata) {
        let definition = EntityDefinition::new(metadata);
        self.definitions
            .insert(definition.entity_name().to_string(), Arc::new(definition));
    }

    /// The definition registered for `entity_name`, if any.
    pub fn get_definition(&self, entity_name: &str) -> Option<Arc<EntityDefinition>> {
        self.definitions.get(entity_name).cloned()
    }

    /// The registered definition, or a structural default for unknown names.
    pub fn definition_or_default(&self, entity_name: &str) -> Arc<EntityDefinition> {
        self.get_definition(entity_name)
            .unwrap_or_else(|| Arc::new(EntityDefinition::new(EntityMetadata::new(entity_name))))
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }
}
