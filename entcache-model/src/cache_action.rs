//! Cache-wide actions and the top-level [`Action`] the store dispatches.

use crate::action::EntityAction;
use crate::change_set::ChangeSet;
use crate::collection::{EntityCache, EntityCacheQuerySet};
use crate::error::DataServiceError;
use crate::metadata::MergeStrategy;
use entcache_types::CorrelationId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Concurrency options of a change-set save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveEntitiesOptions {
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub is_optimistic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_strategy: Option<MergeStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl SaveEntitiesOptions {
    /// Pessimistic options with the given correlation id.
    pub fn new(correlation_id: impl Into<CorrelationId>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            is_optimistic: false,
            merge_strategy: None,
            tag: None,
        }
    }

    pub fn optimistic(mut self, is_optimistic: bool) -> Self {
        self.is_optimistic = is_optimistic;
        self
    }

    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = Some(strategy);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

impl Default for SaveEntitiesOptions {
    fn default() -> Self {
        Self::new(CorrelationId::new())
    }
}

/// Actions that span collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all_fields = "camelCase")]
pub enum EntityCacheAction {
    /// Empties the named collections, or every collection when `None`.
    #[serde(rename = "@entcache/entity-cache/clear-collections")]
    ClearCollections {
        collections: Option<Vec<String>>,
        tag: Option<String>,
    },

    /// Replaces the listed collections with the given entities.
    #[serde(rename = "@entcache/entity-cache/load-collections")]
    LoadCollections {
        collections: EntityCacheQuerySet,
        tag: Option<String>,
    },

    /// Merges query results into several collections in one transition.
    #[serde(rename = "@entcache/entity-cache/merge-query-set")]
    MergeQuerySet {
        query_set: EntityCacheQuerySet,
        merge_strategy: Option<MergeStrategy>,
        tag: Option<String>,
    },

    /// Replaces the whole cache.
    #[serde(rename = "@entcache/entity-cache/set-cache")]
    SetEntityCache { cache: EntityCache, tag: Option<String> },

    #[serde(rename = "@entcache/entity-cache/save-entities")]
    SaveEntities {
        change_set: ChangeSet,
        url: String,
        options: SaveEntitiesOptions,
    },

    #[serde(rename = "@entcache/entity-cache/save-entities-cancel")]
    SaveEntitiesCancel {
        correlation_id: CorrelationId,
        reason: Option<String>,
        entity_names: Option<Vec<String>>,
        tag: Option<String>,
    },

    /// Collections in `entity_names` stop loading.
    #[serde(rename = "@entcache/entity-cache/save-entities-canceled")]
    SaveEntitiesCanceled {
        correlation_id: CorrelationId,
        reason: Option<String>,
        #[serde(default)]
        entity_names: Option<Vec<String>>,
        tag: Option<String>,
    },

    #[serde(rename = "@entcache/entity-cache/save-entities-success")]
    SaveEntitiesSuccess {
        change_set: ChangeSet,
        url: String,
        options: SaveEntitiesOptions,
    },

    /// Carries the failed request so collections can be restored.
    #[serde(rename = "@entcache/entity-cache/save-entities-error")]
    SaveEntitiesError {
        error: DataServiceError,
        change_set: ChangeSet,
        url: String,
        options: SaveEntitiesOptions,
    },
}

impl EntityCacheAction {
    /// Builds a `SaveEntities` request.
    pub fn save_entities(
        change_set: ChangeSet,
        url: impl Into<String>,
        options: SaveEntitiesOptions,
    ) -> Self {
        Self::SaveEntities {
            change_set,
            url: url.into(),
            options,
        }
    }

    /// Builds a cancel request for an in-flight save.
    pub fn cancel_save(correlation_id: impl Into<CorrelationId>, reason: Option<String>) -> Self {
        Self::SaveEntitiesCancel {
            correlation_id: correlation_id.into(),
            reason,
            entity_names: None,
            tag: None,
        }
    }

    pub fn action_type(&self) -> &'static str {
        match self {
            Self::ClearCollections { .. } => "@entcache/entity-cache/clear-collections",
            Self::LoadCollections { .. } => "@entcache/entity-cache/load-collections",
            Self::MergeQuerySet { .. } => "@entcache/entity-cache/merge-query-set",
            Self::SetEntityCache { .. } => "@entcache/entity-cache/set-cache",
            Self::SaveEntities { .. } => "@entcache/entity-cache/save-entities",
            Self::SaveEntitiesCancel { .. } => "@entcache/entity-cache/save-entities-cancel",
            Self::SaveEntitiesCanceled { .. } => "@entcache/entity-cache/save-entities-canceled",
            Self::SaveEntitiesSuccess { .. } => "@entcache/entity-cache/save-entities-success",
            Self::SaveEntitiesError { .. } => "@entcache/entity-cache/save-entities-error",
        }
    }

    /// Correlation id of save-related actions.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Self::SaveEntities { options, .. }
            | Self::SaveEntitiesSuccess { options, .. }
            | Self::SaveEntitiesError { options, .. } => Some(&options.correlation_id),
            Self::SaveEntitiesCancel { correlation_id, .. }
            | Self::SaveEntitiesCanceled { correlation_id, .. } => Some(correlation_id),
            _ => None,
        }
    }
}

/// Anything the store can dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Action {
    Entity(EntityAction),
    Cache(EntityCacheAction),
    /// Application-defined actions, handled by meta-reducers if at all.
    Custom {
        #[serde(rename = "type")]
        action_type: String,
        #[serde(default)]
        payload: Value,
    },
}

impl Action {
    /// Creates an application-defined action.
    pub fn custom(action_type: impl Into<String>, payload: Value) -> Self {
        Self::Custom {
            action_type: action_type.into(),
            payload,
        }
    }

    pub fn action_type(&self) -> &str {
        match self {
            Self::Entity(a) => &a.action_type,
            Self::Cache(a) => a.action_type(),
            Self::Custom { action_type, .. } => action_type,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityAction> {
        match self {
            Self::Entity(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_cache(&self) -> Option<&EntityCacheAction> {
        match self {
            Self::Cache(a) => Some(a),
            _ => None,
        }
    }
}

impl From<EntityAction> for Action {
    fn from(action: EntityAction) -> Self {
        Self::Entity(action)
    }
}

impl From<EntityCacheAction> for Action {
    fn from(action: EntityCacheAction) -> Self {
        Self::Cache(action)
    }
}
