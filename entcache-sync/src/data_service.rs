//! Data-service contracts.
//!
//! The pipelines talk to the server only through these traits. A concrete
//! HTTP transport is left to the application; [`mock`] provides in-memory
//! implementations for tests and demos.

use async_trait::async_trait;
use entcache_model::{ChangeSet, ServiceFailure, Update};
use entcache_types::EntityKey;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Result type for data-service calls.
pub type ServiceResult<T> = Result<T, ServiceFailure>;

/// Remote CRUD operations for one entity type.
#[async_trait]
pub trait EntityCollectionDataService: Send + Sync {
    /// Entity name this service serves.
    fn name(&self) -> &str;

    async fn get_all(&self) -> ServiceResult<Vec<Value>>;

    async fn get_by_id(&self, key: &EntityKey) -> ServiceResult<Value>;

    /// Entities matching query parameters (an object of field values).
    async fn get_with_query(&self, params: &Value) -> ServiceResult<Vec<Value>>;

    /// Returns the entity as stored, typically with its assigned id.
    async fn add(&self, entity: &Value) -> ServiceResult<Value>;

    /// Returns the updated entity, or `None` when the server answers
    /// without a body.
    async fn update(&self, update: &Update) -> ServiceResult<Option<Value>>;

    async fn upsert(&self, entity: &Value) -> ServiceResult<Value>;

    async fn delete(&self, key: &EntityKey) -> ServiceResult<EntityKey>;
}

/// Saves a multi-entity change set in one round trip.
#[async_trait]
pub trait EntityCacheDataService: Send + Sync {
    /// Returns the change set as the server applied it.
    async fn save_entities(&self, change_set: &ChangeSet, url: &str) -> ServiceResult<ChangeSet>;
}

/// Collection data services by entity name.
#[derive(Clone, Default)]
pub struct DataServiceRegistry {
    services: HashMap<String, Arc<dyn EntityCollectionDataService>>,
}

impl DataServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service under its own name, replacing any previous one.
    pub fn register(&mut self, service: Arc<dyn EntityCollectionDataService>) {
        self.services.insert(service.name().to_string(), service);
    }

    pub fn with_service(mut self, service: Arc<dyn EntityCollectionDataService>) -> Self {
        self.register(service);
        self
    }

    pub fn get(&self, entity_name: &str) -> Option<Arc<dyn EntityCollectionDataService>> {
        self.services.get(entity_name).cloned()
    }

    pub fn contains(&self, entity_name: &str) -> bool {
        self.services.contains_key(entity_name)
    }
}

impl fmt::Debug for DataServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.services.keys().collect();
        names.sort();
        f.debug_struct("DataServiceRegistry")
            .field("services", &names)
            .finish()
    }
}

/// In-memory data services for testing.
pub mod mock {
    use super::*;
    use entcache_model::{merge_shallow, ChangeSetOperation};
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Holds calls back until released, to stage races.
    #[derive(Debug)]
    pub struct Gate {
        held: AtomicBool,
        waiting: AtomicUsize,
        permits: Semaphore,
    }

    impl Default for Gate {
        fn default() -> Self {
            Self {
                held: AtomicBool::new(false),
                waiting: AtomicUsize::new(0),
                permits: Semaphore::new(0),
            }
        }
    }

    impl Gate {
        /// Makes subsequent calls wait for [`Gate::release`].
        pub fn hold(&self) {
            self.held.store(true, Ordering::SeqCst);
        }

        /// Lets `n` waiting (or future) calls through.
        pub fn release(&self, n: usize) {
            self.permits.add_permits(n);
        }

        /// Stops holding and lets every waiting call through.
        pub fn open(&self) {
            self.held.store(false, Ordering::SeqCst);
            self.permits.add_permits(self.waiting.load(Ordering::SeqCst));
        }

        /// Calls currently held.
        pub fn waiting(&self) -> usize {
            self.waiting.load(Ordering::SeqCst)
        }

        async fn pass(&self) {
            if !self.held.load(Ordering::SeqCst) {
                return;
            }
            self.waiting.fetch_add(1, Ordering::SeqCst);
            let _waiting = Waiting(&self.waiting);
            if let Ok(permit) = self.permits.acquire().await {
                permit.forget();
            }
        }
    }

    /// Counts a held call until it passes or is dropped.
    struct Waiting<'a>(&'a AtomicUsize);

    impl Drop for Waiting<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Call log, injected failure, latency and gate shared by the mocks.
    #[derive(Debug, Default)]
    struct Behavior {
        calls: Mutex<Vec<String>>,
        failure: Mutex<Option<ServiceFailure>>,
        delay: Mutex<Option<Duration>>,
        gate: Gate,
    }

    impl Behavior {
        async fn enter(&self, call: String) -> ServiceResult<()> {
            self.calls.lock().unwrap().push(call);
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.gate.pass().await;
            match self.failure.lock().unwrap().clone() {
                Some(failure) => Err(failure),
                None => Ok(()),
            }
        }
    }

    /// An in-memory REST resource for one entity type.
    ///
    /// Entities without an `id` get the next integer id on `add`.
    #[derive(Debug)]
    pub struct MockCollectionService {
        name: String,
        entities: Mutex<Vec<Value>>,
        next_id: AtomicI64,
        echo_updates: AtomicBool,
        behavior: Behavior,
    }

    impl MockCollectionService {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                entities: Mutex::new(Vec::new()),
                next_id: AtomicI64::new(1),
                echo_updates: AtomicBool::new(true),
                behavior: Behavior::default(),
            }
        }

        /// Seeds the server side. Ids continue after the largest numeric id.
        pub fn with_entities(self, entities: Vec<Value>) -> Self {
            let max = entities
                .iter()
                .filter_map(|e| e.get("id").and_then(Value::as_i64))
                .max()
                .unwrap_or(0);
            self.next_id.store(max + 1, Ordering::SeqCst);
            *self.entities.lock().unwrap() = entities;
            self
        }

        /// Makes every call fail with `failure` (or succeed again with `None`).
        pub fn fail_with(&self, failure: Option<ServiceFailure>) {
            *self.behavior.failure.lock().unwrap() = failure;
        }

        /// Adds latency to every call.
        pub fn set_delay(&self, delay: Option<Duration>) {
            *self.behavior.delay.lock().unwrap() = delay;
        }

        /// Whether `update` returns the stored entity or no body.
        pub fn echo_updates(&self, echo: bool) {
            self.echo_updates.store(echo, Ordering::SeqCst);
        }

        pub fn gate(&self) -> &Gate {
            &self.behavior.gate
        }

        /// Calls received so far, e.g. `"add"` or `"get_by_id 7"`.
        pub fn calls(&self) -> Vec<String> {
            self.behavior.calls.lock().unwrap().clone()
        }

        /// Server-side state.
        pub fn entities(&self) -> Vec<Value> {
            self.entities.lock().unwrap().clone()
        }

        fn position(entities: &[Value], key: &EntityKey) -> Option<usize> {
            entities
                .iter()
                .position(|e| e.get("id").and_then(EntityKey::from_value).as_ref() == Some(key))
        }

        fn not_found(key: &EntityKey) -> ServiceFailure {
            ServiceFailure::Http {
                status: 404,
                message: format!("{key} not found"),
            }
        }
    }

    #[async_trait]
    impl EntityCollectionDataService for MockCollectionService {
        fn name(&self) -> &str {
            &self.name
        }

        async fn get_all(&self) -> ServiceResult<Vec<Value>> {
            self.behavior.enter("get_all".into()).await?;
            Ok(self.entities())
        }

        async fn get_by_id(&self, key: &EntityKey) -> ServiceResult<Value> {
            self.behavior.enter(format!("get_by_id {key}")).await?;
            let entities = self.entities.lock().unwrap();
            Self::position(&entities, key)
                .map(|i| entities[i].clone())
                .ok_or_else(|| Self::not_found(key))
        }

        async fn get_with_query(&self, params: &Value) -> ServiceResult<Vec<Value>> {
            self.behavior.enter(format!("get_with_query {params}")).await?;
            let matches = |entity: &Value| match params.as_object() {
                Some(fields) => fields.iter().all(|(field, wanted)| {
                    entity.get(field).is_some_and(|actual| {
                        actual == wanted
                            || wanted.as_str().is_some_and(|w| actual.to_string() == w)
                    })
                }),
                None => true,
            };
            Ok(self.entities().into_iter().filter(|e| matches(e)).collect())
        }

        async fn add(&self, entity: &Value) -> ServiceResult<Value> {
            self.behavior.enter("add".into()).await?;
            let mut stored = entity.clone();
            if stored.get("id").is_none_or(Value::is_null) {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                if let Some(fields) = stored.as_object_mut() {
                    fields.insert("id".into(), Value::from(id));
                }
            }
            self.entities.lock().unwrap().push(stored.clone());
            Ok(stored)
        }

        async fn update(&self, update: &Update) -> ServiceResult<Option<Value>> {
            self.behavior.enter(format!("update {}", update.id)).await?;
            let mut entities = self.entities.lock().unwrap();
            let i = Self::position(&entities, &update.id).ok_or_else(|| Self::not_found(&update.id))?;
            entities[i] = merge_shallow(&entities[i], &update.changes);
            Ok(self
                .echo_updates
                .load(Ordering::SeqCst)
                .then(|| entities[i].clone()))
        }

        async fn upsert(&self, entity: &Value) -> ServiceResult<Value> {
            self.behavior.enter("upsert".into()).await?;
            let key = entity
                .get("id")
                .and_then(EntityKey::from_value)
                .ok_or_else(|| ServiceFailure::Http {
                    status: 400,
                    message: "upsert requires an id".into(),
                })?;
            let mut entities = self.entities.lock().unwrap();
            match Self::position(&entities, &key) {
                Some(i) => entities[i] = entity.clone(),
                None => entities.push(entity.clone()),
            }
            Ok(entity.clone())
        }

        async fn delete(&self, key: &EntityKey) -> ServiceResult<EntityKey> {
            self.behavior.enter(format!("delete {key}")).await?;
            let mut entities = self.entities.lock().unwrap();
            if let Some(i) = Self::position(&entities, key) {
                entities.remove(i);
            }
            Ok(key.clone())
        }
    }

    /// Accepts every change set, assigning ids to added entities without one.
    #[derive(Debug)]
    pub struct MockCacheService {
        next_id: AtomicI64,
        saved: Mutex<Vec<(String, ChangeSet)>>,
        behavior: Behavior,
    }

    impl Default for MockCacheService {
        fn default() -> Self {
            Self {
                next_id: AtomicI64::new(1000),
                saved: Mutex::new(Vec::new()),
                behavior: Behavior::default(),
            }
        }
    }

    impl MockCacheService {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_with(&self, failure: Option<ServiceFailure>) {
            *self.behavior.failure.lock().unwrap() = failure;
        }

        pub fn set_delay(&self, delay: Option<Duration>) {
            *self.behavior.delay.lock().unwrap() = delay;
        }

        pub fn gate(&self) -> &Gate {
            &self.behavior.gate
        }

        /// Number of `save_entities` calls received, including failed ones.
        pub fn call_count(&self) -> usize {
            self.behavior.calls.lock().unwrap().len()
        }

        /// Change sets that were saved, with the url they were sent to.
        pub fn saved(&self) -> Vec<(String, ChangeSet)> {
            self.saved.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EntityCacheDataService for MockCacheService {
        async fn save_entities(&self, change_set: &ChangeSet, url: &str) -> ServiceResult<ChangeSet> {
            self.behavior.enter(format!("save_entities {url}")).await?;
            let mut applied = change_set.clone();
            for item in &mut applied.changes {
                if item.op != ChangeSetOperation::Add {
                    continue;
                }
                for entity in &mut item.entities {
                    if entity.get("id").is_none_or(Value::is_null) {
                        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                        if let Some(fields) = entity.as_object_mut() {
                            fields.insert("id".into(), Value::from(id));
                        }
                    }
                }
            }
            self.saved.lock().unwrap().push((url.to_string(), applied.clone()));
            Ok(applied)
        }
    }
}
