//! Change-set save pipeline.
//!
//! Each `SaveEntities` request produces exactly one of
//! `SaveEntitiesSuccess`, `SaveEntitiesError` or `SaveEntitiesCanceled`.

use crate::config::DataServiceConfig;
use crate::data_service::EntityCacheDataService;
use crate::inflight::InFlight;
use crate::pipeline::{self, Completion, PipelineHandler, Race, Step};
use entcache_model::{
    Action, ChangeSet, DataServiceError, EntityCacheAction, HttpMethod, SaveEntitiesOptions,
    ServiceFailure,
};
use futures::stream::Stream;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds the save pipeline over a stream of dispatched actions.
///
/// Without a `service` every non-empty save fails with
/// [`ServiceFailure::Rejected`].
pub fn save_entities_pipeline<S>(
    actions: S,
    service: Option<Arc<dyn EntityCacheDataService>>,
    config: &DataServiceConfig,
) -> impl Stream<Item = Action> + Send + use<S>
where
    S: Stream<Item = Action> + Send + Unpin + 'static,
{
    pipeline::drive(actions, SaveEntitiesHandler::new(service, config))
}

/// Request state of the save pipeline.
pub struct SaveEntitiesHandler {
    service: Option<Arc<dyn EntityCacheDataService>>,
    save_url: String,
    timeout_ms: u64,
    inflight: InFlight,
}

impl SaveEntitiesHandler {
    pub fn new(service: Option<Arc<dyn EntityCacheDataService>>, config: &DataServiceConfig) -> Self {
        Self {
            service,
            save_url: config.save_url.clone(),
            timeout_ms: config.timeout_ms,
            inflight: InFlight::new(),
        }
    }

    fn save(&mut self, change_set: &ChangeSet, url: &str, options: &SaveEntitiesOptions) -> Vec<Step> {
        let url = if url.is_empty() { self.save_url.clone() } else { url.to_string() };
        let change_set = change_set.clone().exclude_empty_items();
        let cid = &options.correlation_id;

        if change_set.is_empty() {
            debug!("save {} has nothing to send", cid);
            return vec![Step::Emit(success(change_set, url, options.clone()))];
        }

        let Some(service) = self.service.clone() else {
            warn!("save {} rejected: no entity cache data service", cid);
            let failure = ServiceFailure::Rejected("no entity cache data service".into());
            return vec![Step::Emit(error(failure, change_set, url, options.clone()))];
        };

        let Some(cancel) = self.inflight.begin(cid.clone()) else {
            warn!("save {} rejected: correlation id already in flight", cid);
            let failure = ServiceFailure::DuplicateCorrelationId(cid.to_string());
            return vec![Step::Emit(error(failure, change_set, url, options.clone()))];
        };

        info!("saving {} ({} items)", cid, change_set.changes.len());
        let options = options.clone();
        let timeout_ms = self.timeout_ms;
        let started = async move {
            let entity_names = change_set.entity_names();
            let call = pipeline::with_timeout(timeout_ms, service.save_entities(&change_set, &url));
            let outcome = pipeline::race(cancel, call).await;
            let action = match outcome {
                Race::Done(Ok(saved)) => success(saved, url, options.clone()),
                Race::Done(Err(failure)) => error(failure, change_set, url, options.clone()),
                Race::Canceled(reason) => EntityCacheAction::SaveEntitiesCanceled {
                    correlation_id: options.correlation_id.clone(),
                    reason,
                    entity_names: Some(entity_names),
                    tag: options.tag.clone(),
                }
                .into(),
            };
            Completion {
                action,
                correlation_id: Some(options.correlation_id),
                exhaust_key: None,
            }
        };
        vec![Step::Start(started.boxed())]
    }
}

impl PipelineHandler for SaveEntitiesHandler {
    fn on_action(&mut self, action: &Action) -> Vec<Step> {
        match action.as_cache() {
            Some(EntityCacheAction::SaveEntities {
                change_set,
                url,
                options,
            }) => self.save(change_set, url, options),
            Some(EntityCacheAction::SaveEntitiesCancel {
                correlation_id,
                reason,
                ..
            }) => {
                if self.inflight.cancel(correlation_id, reason.clone()) {
                    debug!("canceling save {}", correlation_id);
                } else {
                    debug!("late cancel of save {} ignored", correlation_id);
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_completion(&mut self, completion: Completion) -> Vec<Step> {
        if let Some(cid) = &completion.correlation_id {
            self.inflight.finish(cid);
        }
        vec![Step::Emit(completion.action)]
    }
}

fn success(change_set: ChangeSet, url: String, options: SaveEntitiesOptions) -> Action {
    EntityCacheAction::SaveEntitiesSuccess {
        change_set,
        url,
        options,
    }
    .into()
}

fn error(failure: ServiceFailure, change_set: ChangeSet, url: String, options: SaveEntitiesOptions) -> Action {
    let mut error = DataServiceError::new(HttpMethod::Post, url.clone(), failure);
    if let Ok(body) = serde_json::to_value(&change_set) {
        error = error.with_options(body);
    }
    debug!("save {} failed: {}", options.correlation_id, error);
    EntityCacheAction::SaveEntitiesError {
        error,
        change_set,
        url,
        options,
    }
    .into()
}
