//! Meta-reducers wrap the whole reduction of a dispatch.
//!
//! Each meta-reducer receives the action and a `next` continuation; it may
//! inspect, rewrite or swallow the action, and may look at the cache before
//! and after calling `next`.

use crate::cache_reducer::EntityCacheReducer;
use entcache_model::{Action, EntityCache, EntityCacheAction};
use std::sync::Arc;
use tracing::{debug, warn};

/// The rest of the reducer chain.
pub type Next<'a> = &'a dyn Fn(&mut EntityCache, &Action);

pub trait MetaReducer: Send + Sync {
    fn reduce(&self, cache: &mut EntityCache, action: &Action, next: Next<'_>);
}

impl<F> MetaReducer for F
where
    F: Fn(&mut EntityCache, &Action, Next<'_>) + Send + Sync,
{
    fn reduce(&self, cache: &mut EntityCache, action: &Action, next: Next<'_>) {
        self(cache, action, next)
    }
}

/// Logs every dispatched action; failures at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMetaReducer;

impl MetaReducer for LoggingMetaReducer {
    fn reduce(&self, cache: &mut EntityCache, action: &Action, next: Next<'_>) {
        debug!("Reducing {}", action.action_type());
        match action {
            Action::Entity(entity_action) => {
                if let Some(error) = entity_action.error() {
                    warn!("{} failed: {}", entity_action.action_type, error);
                }
            }
            Action::Cache(EntityCacheAction::SaveEntitiesError { error, options, .. }) => {
                warn!("Save {} failed: {}", options.correlation_id, error);
            }
            _ => {}
        }
        next(cache, action);
    }
}

/// Runs `action` through `metas` (outermost first), then `reducer`.
pub(crate) fn reduce_with(
    metas: &[Arc<dyn MetaReducer>],
    reducer: &EntityCacheReducer,
    cache: &mut EntityCache,
    action: &Action,
) {
    match metas.split_first() {
        Some((outer, rest)) => outer.reduce(cache, action, &|cache: &mut EntityCache, action: &Action| {
            reduce_with(rest, reducer, cache, action)
        }),
        None => reducer.reduce(cache, action),
    }
}
