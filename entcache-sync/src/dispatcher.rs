//! Command facades over the store.
//!
//! Persisting commands dispatch a request and wait for the completion that
//! carries the same correlation id. Cache-only commands dispatch and return.

use crate::error::{SyncError, SyncResult};
use entcache_model::{
    Action, ChangeSet, DataServiceError, EntityActionFactory, EntityActionOptions, EntityCacheAction,
    EntityCacheQuerySet, EntityDispatcherDefaultOptions, MergeStrategy, SaveEntitiesOptions,
    Update,
};
use entcache_store::{EntitySelectors, Store};
use entcache_types::{CorrelationId, CorrelationIdGenerator, EntityKey, EntityOp};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Waits on `rx` until `matches` recognizes a completion.
async fn await_completion<T>(
    mut rx: mpsc::UnboundedReceiver<Action>,
    wait_timeout: Option<Duration>,
    mut matches: impl FnMut(&Action) -> Option<SyncResult<T>>,
) -> SyncResult<T> {
    let listen = async move {
        while let Some(action) = rx.recv().await {
            if let Some(result) = matches(&action) {
                return result;
            }
        }
        Err(SyncError::ChannelClosed)
    };
    match wait_timeout {
        Some(limit) => tokio::time::timeout(limit, listen)
            .await
            .map_err(|_| SyncError::Timeout)?,
        None => listen.await,
    }
}

/// Requests seen on a feed under the awaited correlation id.
///
/// The feed is opened before the awaited request is dispatched, so the
/// first request seen is the awaited one. Later ones reuse its id and are
/// refused; their refusals must not end the wait.
#[derive(Debug, Default)]
struct SharedId {
    own_seen: bool,
    duplicates: usize,
}

impl SharedId {
    fn request_seen(&mut self) {
        if self.own_seen {
            self.duplicates += 1;
        } else {
            self.own_seen = true;
        }
    }

    /// Whether a duplicate-id refusal answers the awaited request.
    fn refusal_is_own(&mut self) -> bool {
        if self.duplicates > 0 {
            self.duplicates -= 1;
            false
        } else {
            true
        }
    }
}

fn into_entity(data: Option<Value>) -> SyncResult<Value> {
    data.filter(|v| !v.is_null())
        .ok_or_else(|| SyncError::UnexpectedResponse("completion carried no entity".into()))
}

fn into_entities(data: Option<Value>) -> SyncResult<Vec<Value>> {
    match data {
        Some(Value::Array(items)) => Ok(items),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(other) => Err(SyncError::UnexpectedResponse(format!(
            "expected a list of entities, got {other}"
        ))),
    }
}

// ── Entity dispatcher ────────────────────────────────────────────

/// Commands for one entity type.
#[derive(Debug, Clone)]
pub struct EntityDispatcher {
    entity_name: String,
    store: Arc<Store>,
    factory: EntityActionFactory,
    ids: Arc<CorrelationIdGenerator>,
    defaults: EntityDispatcherDefaultOptions,
    wait_timeout: Option<Duration>,
}

impl EntityDispatcher {
    /// A dispatcher using the optimism defaults of the entity's metadata.
    pub fn new(entity_name: impl Into<String>, store: Arc<Store>) -> Self {
        let entity_name = entity_name.into();
        let defaults = store
            .definitions()
            .definition_or_default(&entity_name)
            .dispatcher_options();
        Self {
            entity_name,
            store,
            factory: EntityActionFactory::new(),
            ids: Arc::new(CorrelationIdGenerator::default()),
            defaults,
            wait_timeout: None,
        }
    }

    pub fn with_factory(mut self, factory: EntityActionFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_correlation_ids(mut self, ids: Arc<CorrelationIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Gives up waiting for a completion after `limit`. The request itself
    /// keeps running.
    pub fn with_wait_timeout(mut self, limit: Duration) -> Self {
        self.wait_timeout = Some(limit);
        self
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn default_options(&self) -> EntityDispatcherDefaultOptions {
        self.defaults
    }

    pub fn selectors(&self) -> EntitySelectors {
        self.store.selectors(&self.entity_name)
    }

    /// Allocates a correlation id, e.g. to cancel a command later.
    pub fn next_correlation_id(&self) -> CorrelationId {
        self.ids.next()
    }

    // ── Persisting commands ──────────────────────────────────────

    pub async fn add(&self, entity: Value) -> SyncResult<Value> {
        self.add_with(entity, EntityActionOptions::new()).await
    }

    /// Saves a new entity. An optimistic add without an id is shown under a
    /// provisional key until the server assigns one.
    pub async fn add_with(&self, entity: Value, options: EntityActionOptions) -> SyncResult<Value> {
        let optimistic = self.defaults.optimistic_add;
        into_entity(self.persist(EntityOp::SaveAddOne, Some(entity), options, optimistic).await?)
    }

    pub async fn update(&self, update: Update) -> SyncResult<Update> {
        self.update_with(update, EntityActionOptions::new()).await
    }

    pub async fn update_with(&self, update: Update, options: EntityActionOptions) -> SyncResult<Update> {
        let optimistic = self.defaults.optimistic_update;
        let data = self
            .persist(EntityOp::SaveUpdateOne, Some(update.to_value()), options, optimistic)
            .await?;
        data.as_ref()
            .and_then(Update::from_value)
            .ok_or_else(|| SyncError::UnexpectedResponse("completion carried no update".into()))
    }

    pub async fn upsert(&self, entity: Value) -> SyncResult<Value> {
        self.upsert_with(entity, EntityActionOptions::new()).await
    }

    pub async fn upsert_with(&self, entity: Value, options: EntityActionOptions) -> SyncResult<Value> {
        let optimistic = self.defaults.optimistic_upsert;
        into_entity(self.persist(EntityOp::SaveUpsertOne, Some(entity), options, optimistic).await?)
    }

    pub async fn delete(&self, key: impl Into<EntityKey>) -> SyncResult<EntityKey> {
        self.delete_with(key, EntityActionOptions::new()).await
    }

    pub async fn delete_with(
        &self,
        key: impl Into<EntityKey>,
        options: EntityActionOptions,
    ) -> SyncResult<EntityKey> {
        let optimistic = self.defaults.optimistic_delete;
        let key = key.into();
        let data = self
            .persist(EntityOp::SaveDeleteOne, Some(key.to_value()), options, optimistic)
            .await?;
        Ok(data.as_ref().and_then(EntityKey::from_value).unwrap_or(key))
    }

    /// Queries every entity and merges the result into the collection.
    pub async fn get_all(&self) -> SyncResult<Vec<Value>> {
        self.get_all_with(EntityActionOptions::new()).await
    }

    pub async fn get_all_with(&self, options: EntityActionOptions) -> SyncResult<Vec<Value>> {
        into_entities(self.persist(EntityOp::QueryAll, None, options, false).await?)
    }

    /// Queries every entity and replaces the collection with the result.
    pub async fn load(&self) -> SyncResult<Vec<Value>> {
        self.load_with(EntityActionOptions::new()).await
    }

    pub async fn load_with(&self, options: EntityActionOptions) -> SyncResult<Vec<Value>> {
        into_entities(self.persist(EntityOp::QueryLoad, None, options, false).await?)
    }

    pub async fn get_by_key(&self, key: impl Into<EntityKey>) -> SyncResult<Value> {
        self.get_by_key_with(key, EntityActionOptions::new()).await
    }

    pub async fn get_by_key_with(
        &self,
        key: impl Into<EntityKey>,
        options: EntityActionOptions,
    ) -> SyncResult<Value> {
        let data = Some(key.into().to_value());
        into_entity(self.persist(EntityOp::QueryByKey, data, options, false).await?)
    }

    pub async fn get_with_query(&self, params: Value) -> SyncResult<Vec<Value>> {
        self.get_with_query_with(params, EntityActionOptions::new()).await
    }

    pub async fn get_with_query_with(
        &self,
        params: Value,
        options: EntityActionOptions,
    ) -> SyncResult<Vec<Value>> {
        into_entities(self.persist(EntityOp::QueryMany, Some(params), options, false).await?)
    }

    /// Asks the persist pipeline to cancel the command with `correlation_id`.
    pub fn cancel(&self, correlation_id: impl Into<CorrelationId>, reason: Option<&str>) -> SyncResult<()> {
        let options = EntityActionOptions::new().with_correlation_id(correlation_id);
        let data = reason.map(|r| Value::String(r.to_string()));
        self.dispatch_op(EntityOp::CancelPersist, data, options)
    }

    async fn persist(
        &self,
        op: EntityOp,
        data: Option<Value>,
        options: EntityActionOptions,
        optimistic_default: bool,
    ) -> SyncResult<Option<Value>> {
        let cid = options
            .correlation_id
            .clone()
            .unwrap_or_else(|| self.ids.next());
        let options = EntityActionOptions {
            correlation_id: Some(cid.clone()),
            is_optimistic: Some(options.is_optimistic.unwrap_or(optimistic_default)),
            ..options
        };
        let action = self.factory.create(self.entity_name.as_str(), op, data, options)?;

        // Open the feed first so the completion cannot slip past.
        let rx = self.store.action_feed();
        self.store.dispatch(action);
        debug!("[{}] {} dispatched as {}", self.entity_name, op, cid);

        let entity_name = self.entity_name.clone();
        let mut shared = SharedId::default();
        await_completion(rx, self.wait_timeout, move |action| {
            completion_of(action, &entity_name, op, &cid, &mut shared)
        })
        .await
    }

    // ── Cache-only commands ──────────────────────────────────────

    pub fn add_one_to_cache(&self, entity: Value) -> SyncResult<()> {
        self.cache_op(EntityOp::AddOne, Some(entity))
    }

    pub fn add_many_to_cache(&self, entities: Vec<Value>) -> SyncResult<()> {
        self.cache_op(EntityOp::AddMany, Some(Value::Array(entities)))
    }

    /// Replaces every cached entity.
    pub fn add_all_to_cache(&self, entities: Vec<Value>) -> SyncResult<()> {
        self.cache_op(EntityOp::AddAll, Some(Value::Array(entities)))
    }

    pub fn remove_one_from_cache(&self, key: impl Into<EntityKey>) -> SyncResult<()> {
        self.cache_op(EntityOp::RemoveOne, Some(key.into().to_value()))
    }

    pub fn remove_many_from_cache(&self, keys: &[EntityKey]) -> SyncResult<()> {
        let keys = keys.iter().map(EntityKey::to_value).collect();
        self.cache_op(EntityOp::RemoveMany, Some(Value::Array(keys)))
    }

    pub fn update_one_in_cache(&self, update: Update) -> SyncResult<()> {
        self.cache_op(EntityOp::UpdateOne, Some(update.to_value()))
    }

    pub fn update_many_in_cache(&self, updates: &[Update]) -> SyncResult<()> {
        let updates = updates.iter().map(Update::to_value).collect();
        self.cache_op(EntityOp::UpdateMany, Some(Value::Array(updates)))
    }

    pub fn upsert_one_in_cache(&self, entity: Value) -> SyncResult<()> {
        self.cache_op(EntityOp::UpsertOne, Some(entity))
    }

    pub fn upsert_many_in_cache(&self, entities: Vec<Value>) -> SyncResult<()> {
        self.cache_op(EntityOp::UpsertMany, Some(Value::Array(entities)))
    }

    /// Removes every cached entity and its pending changes.
    pub fn clear_cache(&self) -> SyncResult<()> {
        self.cache_op(EntityOp::RemoveAll, None)
    }

    pub fn set_filter(&self, pattern: &str) -> SyncResult<()> {
        self.cache_op(EntityOp::SetFilter, Some(Value::String(pattern.to_string())))
    }

    pub fn set_loaded(&self, loaded: bool) -> SyncResult<()> {
        self.cache_op(EntityOp::SetLoaded, Some(Value::Bool(loaded)))
    }

    pub fn set_loading(&self, loading: bool) -> SyncResult<()> {
        self.cache_op(EntityOp::SetLoading, Some(Value::Bool(loading)))
    }

    pub fn commit_one(&self, key: impl Into<EntityKey>) -> SyncResult<()> {
        self.cache_op(EntityOp::CommitOne, Some(key.into().to_value()))
    }

    pub fn commit_all(&self) -> SyncResult<()> {
        self.cache_op(EntityOp::CommitAll, None)
    }

    pub fn undo_one(&self, key: impl Into<EntityKey>) -> SyncResult<()> {
        self.cache_op(EntityOp::UndoOne, Some(key.into().to_value()))
    }

    pub fn undo_many(&self, keys: &[EntityKey]) -> SyncResult<()> {
        let keys = keys.iter().map(EntityKey::to_value).collect();
        self.cache_op(EntityOp::UndoMany, Some(Value::Array(keys)))
    }

    pub fn undo_all(&self) -> SyncResult<()> {
        self.cache_op(EntityOp::UndoAll, None)
    }

    fn cache_op(&self, op: EntityOp, data: Option<Value>) -> SyncResult<()> {
        self.dispatch_op(op, data, EntityActionOptions::new())
    }

    fn dispatch_op(&self, op: EntityOp, data: Option<Value>, options: EntityActionOptions) -> SyncResult<()> {
        let action = self.factory.create(self.entity_name.as_str(), op, data, options)?;
        self.store.dispatch(action);
        Ok(())
    }
}

/// The outcome of request `op` for `entity_name`, if `action` is its
/// completion.
fn completion_of(
    action: &Action,
    entity_name: &str,
    op: EntityOp,
    cid: &CorrelationId,
    shared: &mut SharedId,
) -> Option<SyncResult<Option<Value>>> {
    let action = action.as_entity()?;
    if action.entity_name() != entity_name || action.correlation_id() != Some(cid) {
        return None;
    }
    let completed = action.entity_op();
    if completed == op {
        shared.request_seen();
        None
    } else if Some(completed) == op.success() {
        Some(Ok(action.data().cloned()))
    } else if Some(completed) == op.error() {
        if action.error().is_some_and(DataServiceError::is_duplicate_correlation_id)
            && !shared.refusal_is_own()
        {
            debug!("[{}] refusal of a request reusing {} ignored", entity_name, cid);
            return None;
        }
        Some(Err(match action.error() {
            Some(error) => SyncError::Request(error.clone()),
            None => SyncError::UnexpectedResponse(format!("{completed} carried no error")),
        }))
    } else if completed == EntityOp::CanceledPersist {
        Some(Err(SyncError::Canceled {
            correlation_id: cid.clone(),
            reason: action.data().and_then(Value::as_str).map(str::to_string),
        }))
    } else {
        None
    }
}

// ── Cache dispatcher ─────────────────────────────────────────────

/// Commands spanning collections.
#[derive(Debug, Clone)]
pub struct EntityCacheDispatcher {
    store: Arc<Store>,
    ids: Arc<CorrelationIdGenerator>,
    save_url: String,
    optimistic_save: bool,
    wait_timeout: Option<Duration>,
}

impl EntityCacheDispatcher {
    pub fn new(store: Arc<Store>, save_url: impl Into<String>) -> Self {
        Self {
            store,
            ids: Arc::new(CorrelationIdGenerator::default()),
            save_url: save_url.into(),
            optimistic_save: EntityDispatcherDefaultOptions::default().optimistic_save_entities,
            wait_timeout: None,
        }
    }

    pub fn with_correlation_ids(mut self, ids: Arc<CorrelationIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_default_options(mut self, defaults: EntityDispatcherDefaultOptions) -> Self {
        self.optimistic_save = defaults.optimistic_save_entities;
        self
    }

    pub fn with_wait_timeout(mut self, limit: Duration) -> Self {
        self.wait_timeout = Some(limit);
        self
    }

    /// Options for a new save with a fresh correlation id.
    pub fn save_options(&self) -> SaveEntitiesOptions {
        SaveEntitiesOptions::new(self.ids.next()).optimistic(self.optimistic_save)
    }

    /// Saves a change set to the default URL and returns it as the server
    /// applied it.
    pub async fn save_entities(&self, change_set: ChangeSet) -> SyncResult<ChangeSet> {
        self.save_entities_with(change_set, None, self.save_options()).await
    }

    pub async fn save_entities_with(
        &self,
        change_set: ChangeSet,
        url: Option<&str>,
        options: SaveEntitiesOptions,
    ) -> SyncResult<ChangeSet> {
        let cid = options.correlation_id.clone();
        let url = url.unwrap_or(&self.save_url);
        let rx = self.store.action_feed();
        self.store
            .dispatch(EntityCacheAction::save_entities(change_set, url, options));
        debug!("save {} dispatched", cid);

        let mut shared = SharedId::default();
        await_completion(rx, self.wait_timeout, move |action| {
            save_outcome(action, &cid, &mut shared)
        })
        .await
    }

    /// Cancels an in-flight save. Named collections stop showing as loading.
    pub fn cancel_save_entities(
        &self,
        correlation_id: impl Into<CorrelationId>,
        reason: Option<String>,
        entity_names: Option<Vec<String>>,
    ) {
        self.store.dispatch(EntityCacheAction::SaveEntitiesCancel {
            correlation_id: correlation_id.into(),
            reason,
            entity_names,
            tag: None,
        });
    }

    /// Resets the named collections, or all of them.
    pub fn clear_collections(&self, collections: Option<Vec<String>>) {
        self.store
            .dispatch(EntityCacheAction::ClearCollections { collections, tag: None });
    }

    pub fn load_collections(&self, collections: EntityCacheQuerySet) {
        self.store
            .dispatch(EntityCacheAction::LoadCollections { collections, tag: None });
    }

    pub fn merge_query_set(&self, query_set: EntityCacheQuerySet, merge_strategy: Option<MergeStrategy>) {
        self.store.dispatch(EntityCacheAction::MergeQuerySet {
            query_set,
            merge_strategy,
            tag: None,
        });
    }
}

fn save_outcome(
    action: &Action,
    cid: &CorrelationId,
    shared: &mut SharedId,
) -> Option<SyncResult<ChangeSet>> {
    let action = action.as_cache()?;
    if action.correlation_id() != Some(cid) {
        return None;
    }
    match action {
        EntityCacheAction::SaveEntities { .. } => {
            shared.request_seen();
            None
        }
        EntityCacheAction::SaveEntitiesSuccess { change_set, .. } => Some(Ok(change_set.clone())),
        EntityCacheAction::SaveEntitiesError { error, .. } => {
            if error.is_duplicate_correlation_id() && !shared.refusal_is_own() {
                debug!("refusal of a save reusing {} ignored", cid);
                return None;
            }
            Some(Err(SyncError::Request(error.clone())))
        }
        EntityCacheAction::SaveEntitiesCanceled { reason, .. } => Some(Err(SyncError::Canceled {
            correlation_id: cid.clone(),
            reason: reason.clone(),
        })),
        _ => None,
    }
}
