//! Multi-entity, multi-operation save requests.

use crate::action::Update;
use entcache_types::EntityKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a change-set item asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeSetOperation {
    Add,
    Delete,
    Update,
    Upsert,
}

/// One operation applied to a list of entities of one type.
///
/// `entities` holds whole entities for `Add`/`Upsert`, keys for `Delete`,
/// and [`Update`] records for `Update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSetItem {
    pub op: ChangeSetOperation,
    pub entity_name: String,
    pub entities: Vec<Value>,
}

impl ChangeSetItem {
    pub fn add(entity_name: impl Into<String>, entities: Vec<Value>) -> Self {
        Self {
            op: ChangeSetOperation::Add,
            entity_name: entity_name.into(),
            entities,
        }
    }

    pub fn delete(entity_name: impl Into<String>, keys: Vec<EntityKey>) -> Self {
        Self {
            op: ChangeSetOperation::Delete,
            entity_name: entity_name.into(),
            entities: keys.iter().map(EntityKey::to_value).collect(),
        }
    }

    pub fn update(entity_name: impl Into<String>, updates: Vec<Update>) -> Self {
        Self {
            op: ChangeSetOperation::Update,
            entity_name: entity_name.into(),
            entities: updates.iter().map(Update::to_value).collect(),
        }
    }

    pub fn upsert(entity_name: impl Into<String>, entities: Vec<Value>) -> Self {
        Self {
            op: ChangeSetOperation::Upsert,
            entity_name: entity_name.into(),
            entities,
        }
    }

    /// Keys of a `Delete` item. Values that are not keys are skipped.
    pub fn keys(&self) -> Vec<EntityKey> {
        self.entities.iter().filter_map(EntityKey::from_value).collect()
    }

    /// Update records of an `Update` item. Malformed records are skipped.
    pub fn updates(&self) -> Vec<Update> {
        self.entities.iter().filter_map(Update::from_value).collect()
    }
}

/// A client-originated transaction spanning one or more entity types,
/// saved in one round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub changes: Vec<ChangeSetItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl ChangeSet {
    pub fn new(changes: Vec<ChangeSetItem>) -> Self {
        Self {
            changes,
            extras: None,
            tag: None,
        }
    }

    pub fn with_extras(mut self, extras: Value) -> Self {
        self.extras = Some(extras);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Drops items that carry no entities.
    pub fn exclude_empty_items(mut self) -> Self {
        self.changes.retain(|item| !item.entities.is_empty());
        self
    }

    /// Whether nothing would be sent to the server.
    pub fn is_empty(&self) -> bool {
        self.changes.iter().all(|item| item.entities.is_empty())
    }

    /// Entity names touched by the set, in first-seen order.
    pub fn entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for item in &self.changes {
            if !names.contains(&item.entity_name) {
                names.push(item.entity_name.clone());
            }
        }
        names
    }
}
