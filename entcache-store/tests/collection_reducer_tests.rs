use entcache_model::{
    ChangeType, DataServiceError, EntityAction, EntityActionFactory, EntityActionOptions,
    EntityCollection, EntityDefinition, EntityDefinitionService, EntityMetadata, HttpMethod,
    MergeStrategy, ServiceFailure,
};
use entcache_store::{CollectionReducer, EntityCollectionReducer, EntityCollectionReducerRegistry};
use entcache_types::{CorrelationId, EntityKey, EntityOp};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn reducer_for(metadata: EntityMetadata) -> EntityCollectionReducer {
    EntityCollectionReducer::new(Arc::new(EntityDefinition::new(metadata)))
}

fn reducer() -> EntityCollectionReducer {
    reducer_for(EntityMetadata::new("Hero"))
}

fn action(op: EntityOp, data: Option<Value>, options: EntityActionOptions) -> EntityAction {
    EntityActionFactory::new()
        .create("Hero", op, data, options)
        .unwrap()
}

fn optimistic(cid: &str) -> EntityActionOptions {
    EntityActionOptions::new()
        .with_correlation_id(cid)
        .optimistic(true)
}

fn correlated(cid: &str) -> EntityActionOptions {
    EntityActionOptions::new().with_correlation_id(cid)
}

fn seeded() -> EntityCollection {
    let mut c = EntityCollection::new("Hero");
    c.insert(EntityKey::Num(1), json!({"id": 1, "name": "A", "power": "x"}));
    c.insert(EntityKey::Num(2), json!({"id": 2, "name": "B", "power": "z"}));
    c
}

fn key(n: i64) -> EntityKey {
    EntityKey::Num(n)
}

// ── Optimistic add ───────────────────────────────────────────────

#[test]
fn provisional_add_is_rekeyed_on_success() {
    let r = reducer();
    let mut c = EntityCollection::new("Hero");

    r.reduce(
        &mut c,
        &action(EntityOp::SaveAddOne, Some(json!({"name": "Francis"})), optimistic("C1")),
    );
    let provisional = EntityKey::provisional(&CorrelationId::from("C1"));
    assert_eq!(provisional, EntityKey::from("?C1"));
    assert_eq!(c.ids(), &[provisional.clone()]);
    assert_eq!(c.get(&provisional), Some(&json!({"name": "Francis"})));
    let state = &c.change_state[&provisional];
    assert_eq!(state.change_type, ChangeType::Added);
    assert_eq!(state.correlation_id, Some(CorrelationId::from("C1")));
    assert!(c.loading);

    r.reduce(
        &mut c,
        &action(
            EntityOp::SaveAddOneSuccess,
            Some(json!({"id": 42, "name": "Francis"})),
            optimistic("C1"),
        ),
    );
    assert_eq!(c.ids(), &[key(42)]);
    assert_eq!(c.get(&key(42)), Some(&json!({"id": 42, "name": "Francis"})));
    assert!(c.change_state.is_empty());
    assert!(!c.loading);
}

#[test]
fn add_success_yields_exactly_the_server_entity() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(
        &mut c,
        &action(EntityOp::SaveAddOne, Some(json!({"id": 3, "name": "C"})), optimistic("C1")),
    );
    r.reduce(
        &mut c,
        &action(
            EntityOp::SaveAddOneSuccess,
            Some(json!({"id": 3, "name": "C", "createdAt": 7})),
            optimistic("C1"),
        ),
    );
    assert_eq!(c.ids(), &[key(1), key(2), key(3)]);
    assert_eq!(c.get(&key(3)), Some(&json!({"id": 3, "name": "C", "createdAt": 7})));
    assert!(c.change_state.is_empty());
}

#[test]
fn add_error_restores_previous_state() {
    let r = reducer();
    let before = seeded();
    let mut c = before.clone();
    r.reduce(
        &mut c,
        &action(EntityOp::SaveAddOne, Some(json!({"id": 3, "name": "C"})), optimistic("C1")),
    );
    assert_eq!(c.len(), 3);
    r.reduce(
        &mut c,
        &action(EntityOp::SaveAddOneError, Some(json!({"id": 3, "name": "C"})), optimistic("C1")),
    );
    assert_eq!(c, before);
}

#[test]
fn provisional_add_error_removes_placeholder() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(
        &mut c,
        &action(EntityOp::SaveAddOne, Some(json!({"name": "Francis"})), optimistic("C1")),
    );
    r.reduce(
        &mut c,
        &action(EntityOp::SaveAddOneError, Some(json!({"name": "Francis"})), optimistic("C1")),
    );
    assert_eq!(c, seeded());
}

#[test]
fn pessimistic_add_only_sets_loading() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(
        &mut c,
        &action(EntityOp::SaveAddOne, Some(json!({"id": 3})), correlated("C1")),
    );
    assert!(c.loading);
    assert_eq!(c.len(), 2);

    r.reduce(
        &mut c,
        &action(EntityOp::SaveAddOneSuccess, Some(json!({"id": 3, "name": "C"})), correlated("C1")),
    );
    assert!(!c.loading);
    assert_eq!(c.get(&key(3)), Some(&json!({"id": 3, "name": "C"})));
    assert!(c.change_state.is_empty());
}

// ── Optimistic update & delete ───────────────────────────────────

#[test]
fn update_records_original_and_commits() {
    let r = reducer();
    let mut c = seeded();
    let update = json!({"id": 1, "changes": {"name": "A1"}});
    r.reduce(&mut c, &action(EntityOp::SaveUpdateOne, Some(update.clone()), optimistic("C1")));

    assert_eq!(c.get(&key(1)).unwrap()["name"], "A1");
    let state = &c.change_state[&key(1)];
    assert_eq!(state.change_type, ChangeType::Updated);
    assert_eq!(state.original_value, Some(json!({"id": 1, "name": "A", "power": "x"})));

    r.reduce(&mut c, &action(EntityOp::SaveUpdateOneSuccess, Some(update), optimistic("C1")));
    assert_eq!(c.get(&key(1)), Some(&json!({"id": 1, "name": "A1", "power": "x"})));
    assert!(c.change_state.is_empty());
}

#[test]
fn update_error_restores_original() {
    let r = reducer();
    let mut c = seeded();
    let update = json!({"id": 1, "changes": {"name": "A1"}});
    r.reduce(&mut c, &action(EntityOp::SaveUpdateOne, Some(update.clone()), optimistic("C1")));
    r.reduce(&mut c, &action(EntityOp::SaveUpdateOneError, Some(update), optimistic("C1")));
    assert_eq!(c, seeded());
}

#[test]
fn delete_then_error_restores_entity() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(&mut c, &action(EntityOp::SaveDeleteOne, Some(json!(1)), optimistic("C1")));
    assert!(!c.contains(&key(1)));
    assert_eq!(c.change_state[&key(1)].change_type, ChangeType::Deleted);

    r.reduce(&mut c, &action(EntityOp::SaveDeleteOneError, Some(json!(1)), optimistic("C1")));
    assert_eq!(c.get(&key(1)), seeded().get(&key(1)));
    assert!(c.change_state.is_empty());
    assert_eq!(c.len(), 2);
}

#[test]
fn refused_duplicate_only_reverts_its_own_keys() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(&mut c, &action(EntityOp::SaveDeleteOne, Some(json!(1)), optimistic("C1")));
    r.reduce(&mut c, &action(EntityOp::SaveDeleteOne, Some(json!(2)), optimistic("C1")));
    assert!(c.is_empty());

    let refusal = DataServiceError::new(
        HttpMethod::Delete,
        "api/hero/2",
        ServiceFailure::DuplicateCorrelationId("C1".into()),
    );
    r.reduce(
        &mut c,
        &action(
            EntityOp::SaveDeleteOneError,
            Some(json!(2)),
            optimistic("C1").with_error(refusal),
        ),
    );
    assert_eq!(c.ids(), &[key(2)]);
    assert_eq!(c.change_state[&key(1)].change_type, ChangeType::Deleted);
    assert!(!c.change_state.contains_key(&key(2)));
    assert!(c.loading);
}

#[test]
fn delete_success_clears_entry() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(&mut c, &action(EntityOp::SaveDeleteOne, Some(json!(2)), optimistic("C1")));
    r.reduce(&mut c, &action(EntityOp::SaveDeleteOneSuccess, Some(json!(2)), optimistic("C1")));
    assert_eq!(c.ids(), &[key(1)]);
    assert!(c.change_state.is_empty());
}

#[test]
fn deleting_unsaved_addition_discards_it() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(&mut c, &action(EntityOp::AddOne, Some(json!({"id": 9})), EntityActionOptions::new()));
    assert_eq!(c.change_state[&key(9)].change_type, ChangeType::Added);
    r.reduce(&mut c, &action(EntityOp::SaveDeleteOne, Some(json!(9)), optimistic("C1")));
    assert!(!c.contains(&key(9)));
    assert!(!c.change_state.contains_key(&key(9)));
}

#[test]
fn upsert_tracks_added_or_updated() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(
        &mut c,
        &action(
            EntityOp::SaveUpsertMany,
            Some(json!([{"id": 1, "name": "A1"}, {"id": 5, "name": "E"}])),
            optimistic("C1"),
        ),
    );
    assert_eq!(c.change_state[&key(1)].change_type, ChangeType::Updated);
    assert_eq!(c.change_state[&key(5)].change_type, ChangeType::Added);
    assert_eq!(c.ids(), &[key(1), key(2), key(5)]);
}

// ── Stale responses ──────────────────────────────────────────────

/// Entity 1 updated by C1 (name) and then by C2 (power), so its entry
/// belongs to C2 and is stale for C1's response.
fn stale_setup(r: &EntityCollectionReducer) -> EntityCollection {
    let mut c = seeded();
    r.reduce(
        &mut c,
        &action(
            EntityOp::SaveUpdateOne,
            Some(json!({"id": 1, "changes": {"name": "A1"}})),
            optimistic("C1"),
        ),
    );
    r.reduce(
        &mut c,
        &action(
            EntityOp::SaveUpdateOne,
            Some(json!({"id": 1, "changes": {"power": "y"}})),
            optimistic("C2"),
        ),
    );
    c
}

fn c1_update_success(strategy: Option<MergeStrategy>) -> EntityAction {
    let mut options = optimistic("C1");
    if let Some(strategy) = strategy {
        options = options.with_merge_strategy(strategy);
    }
    action(
        EntityOp::SaveUpdateOneSuccess,
        Some(json!({"id": 1, "changes": {"name": "A1"}})),
        options,
    )
}

#[test]
fn stale_success_default_overwrites_and_clears() {
    let r = reducer();
    let mut c = stale_setup(&r);
    r.reduce(&mut c, &c1_update_success(None));
    assert_eq!(c.get(&key(1)), Some(&json!({"id": 1, "name": "A1", "power": "x"})));
    assert!(c.change_state.is_empty());
}

#[test]
fn stale_success_overwrite_matches_default() {
    let r = reducer();
    let mut explicit = stale_setup(&r);
    let mut default = stale_setup(&r);
    r.reduce(&mut explicit, &c1_update_success(Some(MergeStrategy::OverwriteChanges)));
    r.reduce(&mut default, &c1_update_success(None));
    assert_eq!(explicit, default);
}

#[test]
fn stale_success_ignore_leaves_entry() {
    let r = reducer();
    let mut c = stale_setup(&r);
    let entry_before = c.change_state[&key(1)].clone();
    r.reduce(&mut c, &c1_update_success(Some(MergeStrategy::IgnoreChanges)));
    assert_eq!(c.get(&key(1)), Some(&json!({"id": 1, "name": "A1", "power": "x"})));
    assert_eq!(c.change_state[&key(1)], entry_before);
}

#[test]
fn stale_success_preserve_keeps_local_fields() {
    let r = reducer();
    let mut c = stale_setup(&r);
    r.reduce(&mut c, &c1_update_success(Some(MergeStrategy::PreserveChanges)));
    assert_eq!(c.get(&key(1)), Some(&json!({"id": 1, "name": "A1", "power": "y"})));
    let state = &c.change_state[&key(1)];
    assert_eq!(state.change_type, ChangeType::Updated);
    assert_eq!(state.original_value, Some(json!({"id": 1, "name": "A1", "power": "x"})));
    assert_eq!(state.correlation_id, Some(CorrelationId::from("C2")));
}

#[test]
fn stale_error_preserve_leaves_local_state() {
    let r = reducer();
    let mut c = stale_setup(&r);
    let before = c.clone();
    r.reduce(
        &mut c,
        &action(
            EntityOp::SaveUpdateOneError,
            Some(json!({"id": 1, "changes": {"name": "A1"}})),
            optimistic("C1").with_merge_strategy(MergeStrategy::PreserveChanges),
        ),
    );
    assert_eq!(c.get(&key(1)), before.get(&key(1)));
    assert_eq!(c.change_state, before.change_state);
    assert!(!c.loading);
}

#[test]
fn stale_error_default_rolls_back() {
    let r = reducer();
    let mut c = stale_setup(&r);
    r.reduce(
        &mut c,
        &action(
            EntityOp::SaveUpdateOneError,
            Some(json!({"id": 1, "changes": {"name": "A1"}})),
            optimistic("C1"),
        ),
    );
    assert_eq!(c.get(&key(1)), seeded().get(&key(1)));
    assert!(c.change_state.is_empty());
}

// ── Queries ──────────────────────────────────────────────────────

#[test]
fn query_all_success_merges_and_sets_loaded() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(&mut c, &action(EntityOp::QueryAll, None, EntityActionOptions::new()));
    assert!(c.loading);
    r.reduce(
        &mut c,
        &action(EntityOp::UpdateOne, Some(json!({"id": 1, "changes": {"name": "local"}})), EntityActionOptions::new()),
    );
    r.reduce(
        &mut c,
        &action(
            EntityOp::QueryAllSuccess,
            Some(json!([{"id": 1, "name": "S"}, {"id": 5, "name": "E"}])),
            EntityActionOptions::new(),
        ),
    );
    assert!(!c.loading);
    assert!(c.loaded);
    assert_eq!(c.ids(), &[key(1), key(2), key(5)]);
    assert_eq!(c.get(&key(1)), Some(&json!({"id": 1, "name": "S"})));
    assert!(c.change_state.is_empty());
}

#[test]
fn query_success_with_preserve_keeps_unsaved_edits() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(
        &mut c,
        &action(EntityOp::UpdateOne, Some(json!({"id": 1, "changes": {"name": "local"}})), EntityActionOptions::new()),
    );
    r.reduce(
        &mut c,
        &action(
            EntityOp::QueryManySuccess,
            Some(json!([{"id": 1, "name": "S", "power": "q"}])),
            EntityActionOptions::new().with_merge_strategy(MergeStrategy::PreserveChanges),
        ),
    );
    assert_eq!(c.get(&key(1)), Some(&json!({"id": 1, "name": "local", "power": "q"})));
    assert_eq!(
        c.change_state[&key(1)].original_value,
        Some(json!({"id": 1, "name": "S", "power": "q"}))
    );
    assert!(!c.loaded);
}

#[test]
fn query_load_success_replaces_collection() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(&mut c, &action(EntityOp::RemoveOne, Some(json!(1)), EntityActionOptions::new()));
    r.reduce(
        &mut c,
        &action(EntityOp::QueryLoadSuccess, Some(json!([{"id": 7}])), EntityActionOptions::new()),
    );
    assert_eq!(c.ids(), &[key(7)]);
    assert!(c.change_state.is_empty());
    assert!(c.loaded);
}

#[test]
fn query_error_only_clears_loading() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(&mut c, &action(EntityOp::QueryByKey, Some(json!(1)), EntityActionOptions::new()));
    r.reduce(&mut c, &action(EntityOp::QueryByKeyError, Some(json!(1)), EntityActionOptions::new()));
    assert_eq!(c, seeded());
}

// ── Cache-only ops ───────────────────────────────────────────────

#[test]
fn cache_only_ops_track_unless_ignored() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(&mut c, &action(EntityOp::AddOne, Some(json!({"id": 3})), EntityActionOptions::new()));
    assert_eq!(c.change_state[&key(3)].change_type, ChangeType::Added);

    r.reduce(
        &mut c,
        &action(
            EntityOp::AddOne,
            Some(json!({"id": 4})),
            EntityActionOptions::new().with_merge_strategy(MergeStrategy::IgnoreChanges),
        ),
    );
    assert!(c.contains(&key(4)));
    assert!(!c.change_state.contains_key(&key(4)));
}

#[test]
fn untracked_metadata_records_nothing() {
    let r = reducer_for(EntityMetadata::new("Hero").without_change_tracking());
    let mut c = seeded();
    r.reduce(&mut c, &action(EntityOp::RemoveOne, Some(json!(1)), EntityActionOptions::new()));
    r.reduce(&mut c, &action(EntityOp::SaveAddOne, Some(json!({"id": 3})), optimistic("C1")));
    assert_eq!(c.ids(), &[key(2), key(3)]);
    assert!(c.change_state.is_empty());
}

#[test]
fn commit_and_undo() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(&mut c, &action(EntityOp::RemoveMany, Some(json!([1, 2])), EntityActionOptions::new()));
    r.reduce(&mut c, &action(EntityOp::CommitOne, Some(json!(1)), EntityActionOptions::new()));
    assert_eq!(c.change_state.len(), 1);

    r.reduce(&mut c, &action(EntityOp::UndoAll, None, EntityActionOptions::new()));
    assert_eq!(c.ids(), &[key(2)]);
    assert!(c.change_state.is_empty());
}

#[test]
fn undo_one_accepts_entity_or_key() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(
        &mut c,
        &action(EntityOp::UpsertOne, Some(json!({"id": 2, "name": "B2"})), EntityActionOptions::new()),
    );
    r.reduce(
        &mut c,
        &action(EntityOp::UndoOne, Some(json!({"id": 2, "name": "B2"})), EntityActionOptions::new()),
    );
    assert_eq!(c, seeded());
}

#[test]
fn remove_all_resets_flags() {
    let r = reducer();
    let mut c = seeded();
    c.loaded = true;
    r.reduce(&mut c, &action(EntityOp::UpdateOne, Some(json!({"id": 1, "changes": {}})), EntityActionOptions::new()));
    r.reduce(&mut c, &action(EntityOp::RemoveAll, None, EntityActionOptions::new()));
    assert!(c.is_empty());
    assert!(c.change_state.is_empty());
    assert!(!c.loaded);
}

#[test]
fn add_all_replaces_and_marks_loaded() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(&mut c, &action(EntityOp::AddAll, Some(json!([{"id": 8}, {"id": 9}])), EntityActionOptions::new()));
    assert_eq!(c.ids(), &[key(8), key(9)]);
    assert!(c.loaded);
}

#[test]
fn set_flags_and_filter() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(&mut c, &action(EntityOp::SetFilter, Some(json!("bat")), EntityActionOptions::new()));
    r.reduce(&mut c, &action(EntityOp::SetLoaded, Some(json!(true)), EntityActionOptions::new()));
    r.reduce(&mut c, &action(EntityOp::SetLoading, Some(json!(true)), EntityActionOptions::new()));
    assert_eq!(c.filter, "bat");
    assert!(c.loaded);
    assert!(c.loading);

    r.reduce(&mut c, &action(EntityOp::SetFilter, None, EntityActionOptions::new()));
    assert_eq!(c.filter, "");
}

#[test]
fn set_change_state_resolves_keys() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(
        &mut c,
        &action(
            EntityOp::SetChangeState,
            Some(json!({
                "1": {"changeType": "Updated", "originalValue": {"id": 1, "name": "old"}},
                "7": {"changeType": "Deleted", "originalValue": {"id": 7}}
            })),
            EntityActionOptions::new(),
        ),
    );
    assert_eq!(c.change_state[&key(1)].change_type, ChangeType::Updated);
    assert_eq!(c.change_state[&key(7)].change_type, ChangeType::Deleted);

    r.reduce(&mut c, &action(EntityOp::SetChangeState, None, EntityActionOptions::new()));
    assert!(c.change_state.is_empty());
}

#[test]
fn set_collection_replaces_state_and_keeps_name() {
    let r = reducer();
    let mut c = seeded();
    let replacement = json!({
        "entityName": "Other",
        "ids": ["a"],
        "entities": {"a": {"id": "a"}},
        "loaded": true
    });
    r.reduce(&mut c, &action(EntityOp::SetCollection, Some(replacement), EntityActionOptions::new()));
    assert_eq!(c.entity_name, "Hero");
    assert_eq!(c.ids(), &[EntityKey::from("a")]);
    assert!(c.loaded);

    let before = c.clone();
    r.reduce(&mut c, &action(EntityOp::SetCollection, Some(json!({"ids": 3})), EntityActionOptions::new()));
    assert_eq!(c, before);
}

// ── Cancellation ─────────────────────────────────────────────────

#[test]
fn canceled_persist_rolls_back_only_that_correlation() {
    let r = reducer();
    let mut c = seeded();
    r.reduce(&mut c, &action(EntityOp::SaveDeleteOne, Some(json!(1)), optimistic("C1")));
    r.reduce(&mut c, &action(EntityOp::SaveDeleteOne, Some(json!(2)), optimistic("C2")));

    r.reduce(&mut c, &action(EntityOp::CancelPersist, None, correlated("C1")));
    assert!(!c.loading);
    r.reduce(&mut c, &action(EntityOp::CanceledPersist, None, correlated("C1")));

    assert_eq!(c.ids(), &[key(1)]);
    assert_eq!(c.change_state.len(), 1);
    assert!(c.change_state.contains_key(&key(2)));
}

// ── Sorting & custom reducers ────────────────────────────────────

#[test]
fn sort_comparer_orders_after_every_mutation() {
    let r = reducer_for(EntityMetadata::new("Hero").with_sort_comparer(|a, b| {
        a["name"].as_str().cmp(&b["name"].as_str())
    }));
    let mut c = EntityCollection::new("Hero");
    r.reduce(
        &mut c,
        &action(
            EntityOp::AddMany,
            Some(json!([{"id": 1, "name": "c"}, {"id": 2, "name": "a"}, {"id": 3, "name": "b"}])),
            EntityActionOptions::new(),
        ),
    );
    assert_eq!(c.ids(), &[key(2), key(3), key(1)]);
}

struct CountingReducer {
    calls: AtomicUsize,
}

impl CollectionReducer for CountingReducer {
    fn reduce(&self, collection: &mut EntityCollection, _action: &EntityAction) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        collection.extra.insert("touched".into(), json!(true));
    }
}

#[test]
fn registry_prefers_custom_reducer() {
    let custom = Arc::new(CountingReducer {
        calls: AtomicUsize::new(0),
    });
    let registry = EntityCollectionReducerRegistry::new(Arc::new(EntityDefinitionService::new()))
        .with_reducer("Villain", custom.clone());

    let mut villains = EntityCollection::new("Villain");
    registry
        .get_or_create("Villain")
        .reduce(&mut villains, &action(EntityOp::AddOne, Some(json!({"id": 1})), EntityActionOptions::new()));
    assert_eq!(custom.calls.load(Ordering::SeqCst), 1);
    assert!(villains.is_empty());
    assert_eq!(villains.extra.get("touched"), Some(&json!(true)));

    let mut heroes = EntityCollection::new("Hero");
    registry
        .get_or_create("Hero")
        .reduce(&mut heroes, &action(EntityOp::AddOne, Some(json!({"id": 1})), EntityActionOptions::new()));
    assert_eq!(heroes.len(), 1);
}

// ── Properties ───────────────────────────────────────────────────

fn cache_only_op() -> impl Strategy<Value = (u8, i64)> {
    (0u8..4, 0i64..5)
}

proptest! {
    #[test]
    fn undo_all_restores_entities_after_tracked_edits(ops in prop::collection::vec(cache_only_op(), 0..40)) {
        let r = reducer();
        let mut c = seeded();
        let original = c.entity_map().clone();
        for (op, n) in ops {
            let a = match op {
                0 => action(EntityOp::AddOne, Some(json!({"id": n, "v": "added"})), EntityActionOptions::new()),
                1 => action(EntityOp::RemoveOne, Some(json!(n)), EntityActionOptions::new()),
                2 => action(EntityOp::UpdateOne, Some(json!({"id": n, "changes": {"v": "upd"}})), EntityActionOptions::new()),
                _ => action(EntityOp::UpsertOne, Some(json!({"id": n, "v": "ups"})), EntityActionOptions::new()),
            };
            r.reduce(&mut c, &a);
            prop_assert_eq!(c.ids().len(), c.entity_map().len());
        }
        r.reduce(&mut c, &action(EntityOp::UndoAll, None, EntityActionOptions::new()));
        prop_assert_eq!(c.entity_map(), &original);
        prop_assert!(c.change_state.is_empty());
    }
}
