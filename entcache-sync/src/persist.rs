//! Persist pipeline: single-entity queries and saves.
//!
//! Every `QUERY_*` / `SAVE_*` request calls the entity's collection data
//! service and comes back as exactly one `_SUCCESS`, `_ERROR` or
//! `CANCELED_PERSIST` action carrying the request's correlation id.

use crate::config::{DataServiceConfig, HttpUrlGenerator};
use crate::data_service::{DataServiceRegistry, EntityCollectionDataService, ServiceResult};
use crate::inflight::InFlight;
use crate::pipeline::{self, Completion, PipelineHandler, Race, Step};
use entcache_model::{
    Action, ActionOverrides, DataServiceError, EntityAction, EntityActionFactory, HttpMethod,
    ServiceFailure, Update,
};
use entcache_types::{EntityKey, EntityOp};
use futures::future::try_join_all;
use futures::stream::Stream;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds the persist pipeline over a stream of dispatched actions.
pub fn persist_pipeline<S>(
    actions: S,
    services: Arc<DataServiceRegistry>,
    config: &DataServiceConfig,
    factory: EntityActionFactory,
) -> impl Stream<Item = Action> + Send + use<S>
where
    S: Stream<Item = Action> + Send + Unpin + 'static,
{
    pipeline::drive(actions, PersistHandler::new(services, config, factory))
}

/// Request state of the persist pipeline.
pub struct PersistHandler {
    services: Arc<DataServiceRegistry>,
    urls: HttpUrlGenerator,
    timeout_ms: u64,
    factory: EntityActionFactory,
    inflight: InFlight,
    /// Outstanding queries by exhaust key, with the requests that joined them.
    outstanding: HashMap<String, Vec<EntityAction>>,
}

impl PersistHandler {
    pub fn new(
        services: Arc<DataServiceRegistry>,
        config: &DataServiceConfig,
        factory: EntityActionFactory,
    ) -> Self {
        Self {
            services,
            urls: config.url_generator(),
            timeout_ms: config.timeout_ms,
            factory,
            inflight: InFlight::new(),
            outstanding: HashMap::new(),
        }
    }

    fn cancel(&mut self, action: &EntityAction) -> Vec<Step> {
        let Some(cid) = action.correlation_id() else {
            debug!("[{}] cancel without correlation id ignored", action.entity_name());
            return Vec::new();
        };
        let reason = action.data().and_then(Value::as_str).map(str::to_string);

        if self.inflight.cancel(cid, reason.clone()) {
            debug!("[{}] canceling {}", action.entity_name(), cid);
            return Vec::new();
        }

        // A joined query has no request of its own; answer it directly.
        for joined in self.outstanding.values_mut() {
            if let Some(i) = joined.iter().position(|a| a.correlation_id() == Some(cid)) {
                let request = joined.remove(i);
                let canceled = canceled_action(&self.factory, &request, reason);
                return vec![Step::Emit(canceled.into())];
            }
        }

        debug!("[{}] late cancel of {} ignored", action.entity_name(), cid);
        Vec::new()
    }

    fn request(&mut self, action: &EntityAction) -> Vec<Step> {
        let op = action.entity_op();

        if action.skip() {
            let data = action.data().cloned().unwrap_or(Value::Null);
            return vec![Step::Emit(self.success(action, data).into())];
        }

        let exhaust_key = op.is_query().then(|| exhaust_key(action));
        if let Some(key) = &exhaust_key {
            if let Some(joined) = self.outstanding.get_mut(key) {
                debug!("[{}] {} joins outstanding query", action.entity_name(), op);
                joined.push(action.clone());
                return Vec::new();
            }
        }

        let Some(service) = self.services.get(action.entity_name()) else {
            warn!("[{}] no data service registered", action.entity_name());
            let failure =
                ServiceFailure::Rejected(format!("no data service for {}", action.entity_name()));
            return vec![Step::Emit(self.error(action, failure).into())];
        };

        let cancel = match action.correlation_id() {
            Some(cid) => match self.inflight.begin(cid.clone()) {
                Some(rx) => Some(rx),
                None => {
                    warn!("[{}] correlation id {} already in flight", action.entity_name(), cid);
                    let failure = ServiceFailure::DuplicateCorrelationId(cid.to_string());
                    return vec![Step::Emit(self.error(action, failure).into())];
                }
            },
            None => None,
        };

        if let Some(key) = &exhaust_key {
            self.outstanding.insert(key.clone(), Vec::new());
        }

        debug!("[{}] {} started", action.entity_name(), op);
        let request = action.clone();
        let factory = self.factory.clone();
        let urls = self.urls.clone();
        let timeout_ms = self.timeout_ms;
        let started = async move {
            let call = pipeline::with_timeout(timeout_ms, call_service(service, &request));
            let outcome = pipeline::race_opt(cancel, call).await;
            let action = match outcome {
                Race::Done(Ok(data)) => success_action(&factory, &request, data),
                Race::Done(Err(failure)) => error_action(&factory, &urls, &request, failure),
                Race::Canceled(reason) => canceled_action(&factory, &request, reason),
            };
            Completion {
                action: action.into(),
                correlation_id: request.correlation_id().cloned(),
                exhaust_key,
            }
        };
        vec![Step::Start(started.boxed())]
    }

    fn success(&self, request: &EntityAction, data: Value) -> EntityAction {
        success_action(&self.factory, request, data)
    }

    fn error(&self, request: &EntityAction, failure: ServiceFailure) -> EntityAction {
        error_action(&self.factory, &self.urls, request, failure)
    }
}

impl PipelineHandler for PersistHandler {
    fn on_action(&mut self, action: &Action) -> Vec<Step> {
        let Some(action) = action.as_entity() else {
            return Vec::new();
        };
        match action.entity_op() {
            EntityOp::CancelPersist => self.cancel(action),
            op if op.is_persist() => self.request(action),
            _ => Vec::new(),
        }
    }

    fn on_completion(&mut self, completion: Completion) -> Vec<Step> {
        if let Some(cid) = &completion.correlation_id {
            self.inflight.finish(cid);
        }
        let mut steps = Vec::new();
        let joined = completion
            .exhaust_key
            .as_ref()
            .and_then(|key| self.outstanding.remove(key))
            .unwrap_or_default();

        let leader_canceled = completion
            .action
            .as_entity()
            .is_some_and(|a| a.entity_op() == EntityOp::CanceledPersist);

        if leader_canceled && !joined.is_empty() {
            // The next joined request takes over; the rest stay joined to it.
            let mut joined = joined.into_iter();
            if let Some(next) = joined.next() {
                steps.extend(self.request(&next));
                let rest: Vec<EntityAction> = joined.collect();
                if let Some(key) = &completion.exhaust_key {
                    self.outstanding.entry(key.clone()).or_default().extend(rest);
                }
            }
        } else if let Some(result) = completion.action.as_entity() {
            for request in &joined {
                steps.push(Step::Emit(answer_joined(&self.factory, result, request).into()));
            }
        }

        steps.insert(0, Step::Emit(completion.action));
        steps
    }
}

/// Identical queries share one exhaust key: entity, op and argument.
fn exhaust_key(action: &EntityAction) -> String {
    let argument = match action.entity_op() {
        EntityOp::QueryByKey | EntityOp::QueryMany => {
            action.data().map(Value::to_string).unwrap_or_default()
        }
        _ => String::new(),
    };
    format!("{}|{}|{}", action.entity_name(), action.entity_op(), argument)
}

async fn call_service(
    service: Arc<dyn EntityCollectionDataService>,
    request: &EntityAction,
) -> ServiceResult<Value> {
    let service = service.as_ref();
    match request.entity_op() {
        EntityOp::QueryAll | EntityOp::QueryLoad => service.get_all().await.map(Value::Array),
        EntityOp::QueryMany => {
            let params = request.data().cloned().unwrap_or(Value::Null);
            service.get_with_query(&params).await.map(Value::Array)
        }
        EntityOp::QueryByKey => service.get_by_id(&first_key(request)?).await,
        EntityOp::SaveAddOne => service.add(single_entity(request)?).await,
        EntityOp::SaveAddMany => {
            let entities = request.entities();
            let added = try_join_all(entities.iter().map(|e| service.add(e))).await?;
            Ok(Value::Array(added))
        }
        EntityOp::SaveUpdateOne => {
            let update = request
                .updates()
                .into_iter()
                .next()
                .ok_or_else(|| invalid_request(request))?;
            Ok(saved_update(service, update).await?.to_value())
        }
        EntityOp::SaveUpdateMany => {
            let saved = try_join_all(
                request
                    .updates()
                    .into_iter()
                    .map(|update| saved_update(service, update)),
            )
            .await?;
            Ok(Value::Array(saved.iter().map(Update::to_value).collect()))
        }
        EntityOp::SaveUpsertOne => service.upsert(single_entity(request)?).await,
        EntityOp::SaveUpsertMany => {
            let entities = request.entities();
            let saved = try_join_all(entities.iter().map(|e| service.upsert(e))).await?;
            Ok(Value::Array(saved))
        }
        EntityOp::SaveDeleteOne => {
            let key = first_key(request)?;
            Ok(service.delete(&key).await?.to_value())
        }
        EntityOp::SaveDeleteMany => {
            let keys = request.keys();
            let deleted = try_join_all(keys.iter().map(|k| service.delete(k))).await?;
            Ok(Value::Array(deleted.iter().map(EntityKey::to_value).collect()))
        }
        _ => Err(invalid_request(request)),
    }
}

/// The server's answer to an update, as an update record. `changed` says
/// whether the server sent the entity back.
async fn saved_update(service: &dyn EntityCollectionDataService, update: Update) -> ServiceResult<Update> {
    let returned = service.update(&update).await?;
    Ok(match returned {
        Some(entity) => Update {
            id: update.id,
            changes: entity,
            changed: Some(true),
        },
        None => Update {
            changed: Some(false),
            ..update
        },
    })
}

fn single_entity(request: &EntityAction) -> ServiceResult<&Value> {
    request.entity().ok_or_else(|| invalid_request(request))
}

fn first_key(request: &EntityAction) -> ServiceResult<EntityKey> {
    request
        .keys()
        .into_iter()
        .next()
        .ok_or_else(|| invalid_request(request))
}

fn invalid_request(request: &EntityAction) -> ServiceFailure {
    ServiceFailure::Rejected(format!(
        "{} has no usable data for {}",
        request.entity_op(),
        request.entity_name()
    ))
}

// ── Completion actions ───────────────────────────────────────────

fn success_action(factory: &EntityActionFactory, request: &EntityAction, data: Value) -> EntityAction {
    let op = request.entity_op();
    factory.create_from_action(
        request,
        ActionOverrides::op(op.success().unwrap_or(op)).with_data(data),
    )
}

fn error_action(
    factory: &EntityActionFactory,
    urls: &HttpUrlGenerator,
    request: &EntityAction,
    failure: ServiceFailure,
) -> EntityAction {
    let op = request.entity_op();
    let (method, url) = request_target(urls, request);
    let mut error = DataServiceError::new(method, url, failure);
    if let Some(data) = request.data() {
        error = error.with_options(data.clone());
    }
    debug!("[{}] {} failed: {}", request.entity_name(), op, error);
    factory.create_from_action(request, ActionOverrides::op(op.error().unwrap_or(op)).with_error(error))
}

fn canceled_action(
    factory: &EntityActionFactory,
    request: &EntityAction,
    reason: Option<String>,
) -> EntityAction {
    let overrides = ActionOverrides::op(EntityOp::CanceledPersist);
    let overrides = match reason {
        Some(reason) => overrides.with_data(Value::String(reason)),
        None => overrides.without_data(),
    };
    factory.create_from_action(request, overrides)
}

/// The outcome of a shared query, restated for a request that joined it.
fn answer_joined(factory: &EntityActionFactory, result: &EntityAction, joined: &EntityAction) -> EntityAction {
    let mut overrides = ActionOverrides::op(result.entity_op());
    overrides = match result.data() {
        Some(data) => overrides.with_data(data.clone()),
        None => overrides.without_data(),
    };
    if let Some(error) = result.error() {
        overrides = overrides.with_error(error.clone());
    }
    factory.create_from_action(joined, overrides)
}

/// HTTP verb and URL a request maps to, for error reporting.
fn request_target(urls: &HttpUrlGenerator, request: &EntityAction) -> (HttpMethod, String) {
    let name = request.entity_name();
    let key = request
        .keys()
        .into_iter()
        .next()
        .or_else(|| request.updates().into_iter().next().map(|u| u.id));
    let with_key = |base: String| match &key {
        Some(key) => format!("{base}{key}"),
        None => base,
    };
    match request.entity_op() {
        EntityOp::QueryAll | EntityOp::QueryLoad | EntityOp::QueryMany => {
            (HttpMethod::Get, urls.collection_resource_url(name))
        }
        EntityOp::QueryByKey => (HttpMethod::Get, with_key(urls.entity_resource_url(name))),
        EntityOp::SaveUpdateOne => (HttpMethod::Put, with_key(urls.entity_resource_url(name))),
        EntityOp::SaveUpdateMany => (HttpMethod::Put, urls.entity_resource_url(name)),
        EntityOp::SaveDeleteOne => (HttpMethod::Delete, with_key(urls.entity_resource_url(name))),
        EntityOp::SaveDeleteMany => (HttpMethod::Delete, urls.entity_resource_url(name)),
        _ => (HttpMethod::Post, urls.entity_resource_url(name)),
    }
}
