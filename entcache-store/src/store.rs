//! The dispatch store.
//!
//! One lock serializes reductions. Each dispatch produces exactly one new
//! snapshot (published on a `watch` channel) and forwards the action, in
//! dispatch order, to every feed and to the `broadcast` observers.
//!
//! Feeds are unbounded and never drop an action; pipelines and awaiting
//! dispatchers read from them. Broadcast observers may lag and miss some.

use crate::cache_reducer::EntityCacheReducer;
use crate::meta_reducer::{reduce_with, MetaReducer};
use crate::selectors::EntitySelectors;
use entcache_model::{Action, EntityCache, EntityDefinitionService};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Capacity of the observer broadcast; slower observers lag past it.
    /// Feeds are not bounded by it.
    pub action_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { action_buffer: 256 }
    }
}

/// Holds the entity cache and applies dispatched actions to it.
pub struct Store {
    state: Mutex<Arc<EntityCache>>,
    reducer: EntityCacheReducer,
    meta_reducers: Vec<Arc<dyn MetaReducer>>,
    snapshots: watch::Sender<Arc<EntityCache>>,
    actions: broadcast::Sender<Action>,
    feeds: Mutex<Vec<mpsc::UnboundedSender<Action>>>,
    version: AtomicU64,
}

impl Store {
    /// A store with default collection reducers and configuration.
    #[must_use]
    pub fn new(definitions: Arc<EntityDefinitionService>) -> Self {
        Self::with_config(
            EntityCacheReducer::with_definitions(definitions),
            StoreConfig::default(),
        )
    }

    #[must_use]
    pub fn with_config(reducer: EntityCacheReducer, config: StoreConfig) -> Self {
        let initial = Arc::new(EntityCache::new());
        let (snapshots, _) = watch::channel(Arc::clone(&initial));
        let (actions, _) = broadcast::channel(config.action_buffer.max(1));
        Self {
            state: Mutex::new(initial),
            reducer,
            meta_reducers: Vec::new(),
            snapshots,
            actions,
            feeds: Mutex::new(Vec::new()),
            version: AtomicU64::new(0),
        }
    }

    /// Starts from an existing cache instead of an empty one.
    #[must_use]
    pub fn with_initial_state(self, cache: EntityCache) -> Self {
        let cache = Arc::new(cache);
        self.snapshots.send_replace(Arc::clone(&cache));
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = cache;
        self
    }

    /// Adds a meta-reducer. The first one added is the outermost.
    #[must_use]
    pub fn with_meta_reducer(mut self, meta_reducer: Arc<dyn MetaReducer>) -> Self {
        self.meta_reducers.push(meta_reducer);
        self
    }

    /// Reduces `action` into a new snapshot, publishes it, and forwards the
    /// action to subscribers. Returns the new version.
    pub fn dispatch(&self, action: impl Into<Action>) -> u64 {
        let action = action.into();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = Arc::clone(&state);
        reduce_with(
            &self.meta_reducers,
            &self.reducer,
            Arc::make_mut(&mut next),
            &action,
        );
        *state = Arc::clone(&next);
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        self.snapshots.send_replace(next);

        debug!("Dispatched {} (version {})", action.action_type(), version);
        // Still under the state lock, so every feed sees dispatch order.
        self.feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|feed| feed.send(action.clone()).is_ok());
        // No observers is not an error.
        let _ = self.actions.send(action);
        version
    }

    /// The current snapshot.
    pub fn state(&self) -> Arc<EntityCache> {
        Arc::clone(&self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of dispatches applied so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Watches snapshots. The receiver sees the latest one.
    pub fn subscribe(&self) -> watch::Receiver<Arc<EntityCache>> {
        self.snapshots.subscribe()
    }

    /// Observes actions dispatched from now on. A receiver that falls more
    /// than [`StoreConfig::action_buffer`] behind skips the oldest.
    pub fn actions(&self) -> broadcast::Receiver<Action> {
        self.actions.subscribe()
    }

    /// Receives every action dispatched from now on, without loss. The feed
    /// is released on the first dispatch after the receiver is dropped.
    pub fn action_feed(&self) -> mpsc::UnboundedReceiver<Action> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn definitions(&self) -> &Arc<EntityDefinitionService> {
        self.reducer.registry().definitions()
    }

    pub fn selectors(&self, entity_name: &str) -> EntitySelectors {
        EntitySelectors::new(self.definitions().definition_or_default(entity_name))
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("version", &self.version())
            .field("meta_reducers", &self.meta_reducers.len())
            .field(
                "feeds",
                &self.feeds.lock().unwrap_or_else(PoisonError::into_inner).len(),
            )
            .finish()
    }
}
