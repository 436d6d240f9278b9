//! Entity actions and the factory that builds them.
//!
//! An [`EntityAction`] is an immutable record of a CRUD intent (or of its
//! outcome) for one entity type. The `type` string is derived from the op
//! and the entity name or tag; it exists for display and routing and is
//! never parsed back.

use crate::error::{ActionError, DataServiceError};
use crate::metadata::MergeStrategy;
use entcache_types::{CorrelationId, EntityKey, EntityOp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// The payload of an entity action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityActionPayload {
    pub entity_name: String,
    pub entity_op: EntityOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_optimistic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_strategy: Option<MergeStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DataServiceError>,
    /// Report success without calling the data service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<bool>,
}

/// A command or event about one entity collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub payload: EntityActionPayload,
}

impl EntityAction {
    /// Name of the entity type the action targets.
    pub fn entity_name(&self) -> &str {
        &self.payload.entity_name
    }

    /// The requested operation, or the completion it reports.
    pub fn entity_op(&self) -> EntityOp {
        self.payload.entity_op
    }

    /// Raw data: entities, keys, updates or query parameters, depending on the op.
    pub fn data(&self) -> Option<&Value> {
        self.payload.data.as_ref()
    }

    /// Joins a request to its completion or cancellation.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.payload.correlation_id.as_ref()
    }

    /// Whether the cache is updated before the server answers. Absent means pessimistic.
    pub fn is_optimistic(&self) -> bool {
        self.payload.is_optimistic.unwrap_or(false)
    }

    /// How a stale server response meets local changes.
    pub fn merge_strategy(&self) -> Option<MergeStrategy> {
        self.payload.merge_strategy
    }

    /// Tag used in place of the entity name when formatting the type.
    pub fn tag(&self) -> Option<&str> {
        self.payload.tag.as_deref()
    }

    /// The failure carried by an `_ERROR` completion.
    pub fn error(&self) -> Option<&DataServiceError> {
        self.payload.error.as_ref()
    }

    /// Whether the persist pipeline answers without calling the data service.
    pub fn skip(&self) -> bool {
        self.payload.skip.unwrap_or(false)
    }

    // ── Data extraction ──────────────────────────────────────────

    /// The data as a single entity. `null` counts as absent.
    pub fn entity(&self) -> Option<&Value> {
        self.data().filter(|v| !v.is_null())
    }

    /// The data as a list of entities: an array is taken element-wise, a
    /// single non-null value becomes a one-element list.
    pub fn entities(&self) -> Vec<Value> {
        match self.data() {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.clone()],
        }
    }

    /// The data as entity keys (single key or array of keys).
    pub fn keys(&self) -> Vec<EntityKey> {
        match self.data() {
            Some(Value::Array(items)) => items.iter().filter_map(EntityKey::from_value).collect(),
            Some(other) => EntityKey::from_value(other).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// The data as update records (single record or array of records).
    pub fn updates(&self) -> Vec<Update> {
        match self.data() {
            Some(Value::Array(items)) => items.iter().filter_map(Update::from_value).collect(),
            Some(other) => Update::from_value(other).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

/// A partial change to one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    pub id: EntityKey,
    pub changes: Value,
    /// Set on save responses: whether the server altered the entity
    /// beyond the requested changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
}

impl Update {
/// An update of `id` with `changes`; `changed` is left unset.
    pub fn new(id: impl Into<EntityKey>, changes: Value) -> Self {
        Self {
            id: id.into(),
            changes,
            changed: None,
        }
    }

    /// Reads an `{ id, changes, changed? }` record. Anything else yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// The wire shape; `changed` only appears when set.
    pub fn to_value(&self) -> Value {
        let mut value = serde_json::json!({
            "id": self.id.to_value(),
            "changes": self.changes,
        });
        if let (Some(changed), Some(obj)) = (self.changed, value.as_object_mut()) {
            obj.insert("changed".into(), Value::Bool(changed));
        }
        value
    }

    /// Applies the changes on top of an entity: object fields are merged
    /// shallowly, anything else replaces the entity.
    pub fn apply_to(&self, entity: &Value) -> Value {
        merge_shallow(entity, &self.changes)
    }
}

/// Overlays `changes` onto `base` one top-level field at a time.
pub fn merge_shallow(base: &Value, changes: &Value) -> Value {
    match (base, changes) {
        (Value::Object(base), Value::Object(changes)) => {
            let mut merged = base.clone();
            for (field, value) in changes {
                merged.insert(field.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, changes) => changes.clone(),
    }
}

/// Concurrency options of a new action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityActionOptions {
    pub correlation_id: Option<CorrelationId>,
    pub is_optimistic: Option<bool>,
    pub merge_strategy: Option<MergeStrategy>,
    pub tag: Option<String>,
    pub error: Option<DataServiceError>,
    pub skip: Option<bool>,
}

impl EntityActionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses this correlation id instead of a generated one.
    pub fn with_correlation_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Overrides the optimism default of the dispatcher.
    pub fn optimistic(mut self, is_optimistic: bool) -> Self {
        self.is_optimistic = Some(is_optimistic);
        self
    }

    /// Strategy for stale responses to this action.
    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = Some(strategy);
        self
    }

    /// Labels the action, e.g. with the feature that issued it.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Attaches a failure, as for `_ERROR` completions.
    pub fn with_error(mut self, error: DataServiceError) -> Self {
        self.error = Some(error);
        self
    }

    /// Marks a persisting action to succeed without a service call.
    pub fn skipped(mut self) -> Self {
        self.skip = Some(true);
        self
    }
}

/// Fields to replace when deriving one action from another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOverrides {
    entity_op: Option<EntityOp>,
    data: Option<Option<Value>>,
    correlation_id: Option<CorrelationId>,
    is_optimistic: Option<bool>,
    merge_strategy: Option<MergeStrategy>,
    tag: Option<String>,
    error: Option<DataServiceError>,
}

impl ActionOverrides {
    /// Overrides that switch to another op.
    pub fn op(entity_op: EntityOp) -> Self {
        Self {
            entity_op: Some(entity_op),
            ..Self::default()
        }
    }

    /// Replaces the data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(Some(data));
        self
    }

    /// Drops the data.
    pub fn without_data(mut self) -> Self {
        self.data = Some(None);
        self
    }

    /// Moves the derived action to another correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Overrides the optimism carried over from the source.
    pub fn optimistic(mut self, is_optimistic: bool) -> Self {
        self.is_optimistic = Some(is_optimistic);
        self
    }

    /// Overrides the merge strategy carried over from the source.
    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = Some(strategy);
        self
    }

    /// Overrides the tag carried over from the source.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Sets the failure of the derived action.
    pub fn with_error(mut self, error: DataServiceError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Default action type formatting: `"[Hero] @entcache/query-all"`.
pub fn format_action_type(op: EntityOp, entity_name_or_tag: &str) -> String {
    format!("[{entity_name_or_tag}] {op}")
}

/// Replaces [`format_action_type`] in a configured factory.
pub type ActionTypeFormatter = Arc<dyn Fn(EntityOp, &str) -> String + Send + Sync>;

/// Builds entity actions, validating them on the way.
#[derive(Clone, Default)]
pub struct EntityActionFactory {
    formatter: Option<ActionTypeFormatter>,
}

impl EntityActionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory with a custom action type formatter.
    pub fn with_formatter(
        formatter: impl Fn(EntityOp, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            formatter: Some(Arc::new(formatter)),
        }
    }

    /// Formats the action type for an op and an entity name or tag.
    pub fn format_action_type(&self, op: EntityOp, entity_name_or_tag: &str) -> String {
        match &self.formatter {
            Some(format) => format(op, entity_name_or_tag),
            None => format_action_type(op, entity_name_or_tag),
        }
    }

    /// Creates an action. Fails when the entity name is empty.
    pub fn create(
        &self,
        entity_name: impl Into<String>,
        entity_op: EntityOp,
        data: Option<Value>,
        options: EntityActionOptions,
    ) -> Result<EntityAction, ActionError> {
        self.create_from_payload(EntityActionPayload {
            entity_name: entity_name.into(),
            entity_op,
            data,
            correlation_id: options.correlation_id,
            is_optimistic: options.is_optimistic,
            merge_strategy: options.merge_strategy,
            tag: options.tag,
            error: options.error,
            skip: options.skip,
        })
    }

    /// Creates an action from a complete payload.
    pub fn create_from_payload(
        &self,
        payload: EntityActionPayload,
    ) -> Result<EntityAction, ActionError> {
        if payload.entity_name.trim().is_empty() {
            return Err(ActionError::MissingEntityName);
        }
        Ok(self.finish(payload))
    }

    /// Creates an action from its JSON wire shape, either the whole
    /// `{type, payload}` record or the bare payload. Any `type` present is
    /// ignored and recomputed.
    pub fn create_from_json(&self, value: &Value) -> Result<EntityAction, ActionError> {
        let payload = value.get("payload").unwrap_or(value);

        match payload.get("entityName").and_then(Value::as_str) {
            Some(name) if !name.trim().is_empty() => {}
            _ => return Err(ActionError::MissingEntityName),
        }
        match payload.get("entityOp") {
            None | Some(Value::Null) => return Err(ActionError::MissingEntityOp),
            Some(Value::String(op)) if op.is_empty() => return Err(ActionError::MissingEntityOp),
            Some(Value::String(op)) => {
                op.parse::<EntityOp>()
                    .map_err(|_| ActionError::UnknownEntityOp(op.clone()))?;
            }
            Some(other) => return Err(ActionError::UnknownEntityOp(other.to_string())),
        }

        let payload: EntityActionPayload = serde_json::from_value(payload.clone())
            .map_err(|e| ActionError::InvalidPayload(e.to_string()))?;
        self.create_from_payload(payload)
    }

    /// Derives an action from another one, typically a completion from its
    /// request. Entity name, correlation id, optimism, merge strategy, tag
    /// and data carry over unless overridden; the type is recomputed.
    pub fn create_from_action(&self, from: &EntityAction, overrides: ActionOverrides) -> EntityAction {
        let source = &from.payload;
        self.finish(EntityActionPayload {
            entity_name: source.entity_name.clone(),
            entity_op: overrides.entity_op.unwrap_or(source.entity_op),
            data: overrides.data.unwrap_or_else(|| source.data.clone()),
            correlation_id: overrides
                .correlation_id
                .or_else(|| source.correlation_id.clone()),
            is_optimistic: overrides.is_optimistic.or(source.is_optimistic),
            merge_strategy: overrides.merge_strategy.or(source.merge_strategy),
            tag: overrides.tag.or_else(|| source.tag.clone()),
            error: overrides.error,
            skip: source.skip,
        })
    }

    fn finish(&self, payload: EntityActionPayload) -> EntityAction {
        let label = payload.tag.as_deref().unwrap_or(&payload.entity_name);
        EntityAction {
            action_type: self.format_action_type(payload.entity_op, label),
            payload,
        }
    }
}

impl fmt::Debug for EntityActionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityActionFactory")
            .field("custom_formatter", &self.formatter.is_some())
            .finish()
    }
}
