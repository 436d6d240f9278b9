//! Engine: wires the store to the data-service pipelines.
//!
//! The engine subscribes the persist and save pipelines to the store's
//! action channel and dispatches whatever they emit back into the store.
//! Dispatchers created by the engine share its correlation ids, action
//! factory and wait limit.

use crate::config::DataServiceConfig;
use crate::data_service::{DataServiceRegistry, EntityCacheDataService};
use crate::dispatcher::{EntityCacheDispatcher, EntityDispatcher};
use crate::persist::persist_pipeline;
use crate::pipeline::action_stream;
use crate::save_entities::save_entities_pipeline;
use entcache_model::{Action, EntityActionFactory, EntityDispatcherDefaultOptions};
use entcache_store::Store;
use entcache_types::CorrelationIdGenerator;
use futures::stream::{Stream, StreamExt};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Owns the pipeline tasks of one store.
pub struct EntityCacheEngine {
    store: Arc<Store>,
    services: Arc<DataServiceRegistry>,
    cache_service: Option<Arc<dyn EntityCacheDataService>>,
    config: DataServiceConfig,
    factory: EntityActionFactory,
    ids: Arc<CorrelationIdGenerator>,
    save_defaults: EntityDispatcherDefaultOptions,
    wait_timeout: Option<Duration>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EntityCacheEngine {
    #[must_use]
    pub fn new(store: Arc<Store>, services: DataServiceRegistry) -> Self {
        Self {
            store,
            services: Arc::new(services),
            cache_service: None,
            config: DataServiceConfig::default(),
            factory: EntityActionFactory::new(),
            ids: Arc::new(CorrelationIdGenerator::default()),
            save_defaults: EntityDispatcherDefaultOptions::default(),
            wait_timeout: None,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_cache_service(mut self, service: Arc<dyn EntityCacheDataService>) -> Self {
        self.cache_service = Some(service);
        self
    }

    pub fn with_config(mut self, config: DataServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_factory(mut self, factory: EntityActionFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_correlation_ids(mut self, ids: Arc<CorrelationIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Optimism default of change-set saves.
    pub fn with_save_defaults(mut self, defaults: EntityDispatcherDefaultOptions) -> Self {
        self.save_defaults = defaults;
        self
    }

    /// How long dispatchers wait for a completion before giving up.
    pub fn with_wait_timeout(mut self, limit: Duration) -> Self {
        self.wait_timeout = Some(limit);
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &DataServiceConfig {
        &self.config
    }

    /// Spawns the persist and save pipelines. Must be called inside a tokio
    /// runtime. Calling it again while running has no effect.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            debug!("engine already started");
            return;
        }

        // Subscribe before spawning so nothing dispatched after `start`
        // returns is missed.
        let persist = persist_pipeline(
            action_stream(self.store.action_feed()),
            Arc::clone(&self.services),
            &self.config,
            self.factory.clone(),
        );
        let save = save_entities_pipeline(
            action_stream(self.store.action_feed()),
            self.cache_service.clone(),
            &self.config,
        );

        tasks.push(tokio::spawn(feed(Arc::clone(&self.store), persist)));
        tasks.push(tokio::spawn(feed(Arc::clone(&self.store), save)));
        info!("entity cache engine started");
    }

    /// Aborts the pipeline tasks. In-flight requests are dropped without a
    /// completion.
    pub fn stop(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("entity cache engine stopped");
    }

    pub fn is_running(&self) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.iter().any(|t| !t.is_finished())
    }

    /// A dispatcher for one entity type.
    pub fn dispatcher(&self, entity_name: &str) -> EntityDispatcher {
        let dispatcher = EntityDispatcher::new(entity_name, Arc::clone(&self.store))
            .with_factory(self.factory.clone())
            .with_correlation_ids(Arc::clone(&self.ids));
        match self.wait_timeout {
            Some(limit) => dispatcher.with_wait_timeout(limit),
            None => dispatcher,
        }
    }

    /// A dispatcher for change-set saves and cache-wide commands.
    pub fn cache_dispatcher(&self) -> EntityCacheDispatcher {
        let dispatcher = EntityCacheDispatcher::new(Arc::clone(&self.store), self.config.save_url.clone())
            .with_correlation_ids(Arc::clone(&self.ids))
            .with_default_options(self.save_defaults);
        match self.wait_timeout {
            Some(limit) => dispatcher.with_wait_timeout(limit),
            None => dispatcher,
        }
    }
}

impl Drop for EntityCacheEngine {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl fmt::Debug for EntityCacheEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCacheEngine")
            .field("services", &self.services)
            .field("cache_service", &self.cache_service.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Dispatches a pipeline's output into the store until the pipeline ends.
async fn feed(store: Arc<Store>, output: impl Stream<Item = Action> + Send) {
    futures::pin_mut!(output);
    while let Some(action) = output.next().await {
        store.dispatch(action);
    }
    debug!("pipeline ended");
}
