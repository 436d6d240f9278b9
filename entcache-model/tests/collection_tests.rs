use entcache_model::{
    ChangeState, ChangeType, EntityCache, EntityCollection, SnapshotError,
};
use entcache_types::{CorrelationId, EntityKey};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

fn key(n: i64) -> EntityKey {
    EntityKey::Num(n)
}

fn heroes() -> EntityCollection {
    let mut c = EntityCollection::new("Hero");
    c.insert(key(1), json!({"id": 1, "name": "A"}));
    c.insert(key(2), json!({"id": 2, "name": "B"}));
    c
}

// ── Mutations keep ids and entities in lockstep ──────────────────

#[test]
fn insert_ignores_existing_key() {
    let mut c = heroes();
    assert!(!c.insert(key(1), json!({"id": 1, "name": "Z"})));
    assert_eq!(c.get(&key(1)), Some(&json!({"id": 1, "name": "A"})));
    assert_eq!(c.ids(), &[key(1), key(2)]);
}

#[test]
fn upsert_replaces_in_place_or_appends() {
    let mut c = heroes();
    c.upsert(key(1), json!({"id": 1, "name": "Z"}));
    c.upsert(key(3), json!({"id": 3}));
    assert_eq!(c.ids(), &[key(1), key(2), key(3)]);
    assert_eq!(c.get(&key(1)).unwrap()["name"], "Z");
}

#[test]
fn replace_only_touches_existing() {
    let mut c = heroes();
    assert!(!c.replace(&key(9), json!({})));
    assert_eq!(c.len(), 2);
    assert!(c.replace(&key(2), json!({"id": 2, "name": "BB"})));
}

#[test]
fn remove_drops_id() {
    let mut c = heroes();
    assert_eq!(c.remove(&key(1)), Some(json!({"id": 1, "name": "A"})));
    assert_eq!(c.remove(&key(1)), None);
    assert_eq!(c.ids(), &[key(2)]);
}

#[test]
fn rekey_keeps_position() {
    let mut c = heroes();
    c.insert(EntityKey::from("?C1"), json!({"name": "Francis"}));
    c.insert(key(3), json!({"id": 3}));
    c.rekey(&EntityKey::from("?C1"), key(42), json!({"id": 42, "name": "Francis"}));
    assert_eq!(c.ids(), &[key(1), key(2), key(42), key(3)]);
    assert!(!c.contains(&EntityKey::from("?C1")));
}

#[test]
fn rekey_onto_existing_key_does_not_duplicate() {
    let mut c = heroes();
    c.insert(EntityKey::from("?C1"), json!({"name": "A2"}));
    c.rekey(&EntityKey::from("?C1"), key(1), json!({"id": 1, "name": "A2"}));
    assert_eq!(c.ids(), &[key(1), key(2)]);
    assert_eq!(c.get(&key(1)).unwrap()["name"], "A2");
}

#[test]
fn set_all_deduplicates() {
    let mut c = heroes();
    c.set_all(vec![
        (key(5), json!({"id": 5, "v": 1})),
        (key(6), json!({"id": 6})),
        (key(5), json!({"id": 5, "v": 2})),
    ]);
    assert_eq!(c.ids(), &[key(5), key(6)]);
    assert_eq!(c.get(&key(5)).unwrap()["v"], 2);
}

#[test]
fn sort_by_is_stable() {
    let mut c = EntityCollection::new("Hero");
    c.insert(key(1), json!({"rank": 2}));
    c.insert(key(2), json!({"rank": 1}));
    c.insert(key(3), json!({"rank": 2}));
    c.sort_by(|a, b| a["rank"].as_i64().cmp(&b["rank"].as_i64()));
    assert_eq!(c.ids(), &[key(2), key(1), key(3)]);
}

#[test]
fn iter_follows_id_order() {
    let c = heroes();
    let names: Vec<_> = c.values().map(|e| e["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["A", "B"]);
}

// ── Change state ─────────────────────────────────────────────────

#[test]
fn stale_when_other_correlation_staged_it() {
    let state = ChangeState::new(ChangeType::Updated, None, Some(CorrelationId::from("C2")));
    assert!(state.is_stale_for(Some(&CorrelationId::from("C1"))));
    assert!(!state.is_stale_for(Some(&CorrelationId::from("C2"))));
    assert!(!state.is_stale_for(None));

    let untagged = ChangeState::new(ChangeType::Updated, None, None);
    assert!(untagged.is_stale_for(Some(&CorrelationId::from("C1"))));
}

// ── Snapshots ────────────────────────────────────────────────────

#[test]
fn snapshot_has_plain_json_shape() {
    let mut c = heroes();
    c.loaded = true;
    c.extra.insert("selected".into(), json!(null));
    c.change_state.insert(
        key(2),
        ChangeState::new(ChangeType::Updated, Some(json!({"id": 2, "name": "b"})), None),
    );

    let value = serde_json::to_value(&c).unwrap();
    assert_eq!(
        value,
        json!({
            "entityName": "Hero",
            "ids": [1, 2],
            "entities": {"1": {"id": 1, "name": "A"}, "2": {"id": 2, "name": "B"}},
            "filter": "",
            "loading": false,
            "loaded": true,
            "changeState": {"2": {"changeType": "Updated", "originalValue": {"id": 2, "name": "b"}}},
            "selected": null
        })
    );
}

#[test]
fn snapshot_round_trips_including_deleted_keys() {
    let mut c = heroes();
    c.remove(&key(2));
    c.change_state.insert(
        key(2),
        ChangeState::new(
            ChangeType::Deleted,
            Some(json!({"id": 2, "name": "B"})),
            Some(CorrelationId::from("C7")),
        ),
    );
    c.change_state.insert(EntityKey::from("x"), ChangeState::new(ChangeType::Deleted, None, None));

    let json = serde_json::to_string(&c).unwrap();
    let back: EntityCollection = serde_json::from_str(&json).unwrap();
    assert_eq!(back, c);
}

#[test]
fn snapshot_rejects_missing_entity() {
    let err = serde_json::from_value::<EntityCollection>(json!({
        "entityName": "Hero",
        "ids": [1],
        "entities": {}
    }))
    .unwrap_err();
    assert!(err.to_string().contains("id 1 has no entity"), "{err}");
}

#[test]
fn snapshot_rejects_duplicates_and_orphans() {
    assert!(serde_json::from_value::<EntityCollection>(json!({
        "entityName": "Hero",
        "ids": [1, 1],
        "entities": {"1": {}}
    }))
    .is_err());
    assert!(serde_json::from_value::<EntityCollection>(json!({
        "entityName": "Hero",
        "ids": [],
        "entities": {"1": {}}
    }))
    .is_err());
}

#[test]
fn snapshot_error_display() {
    let err = SnapshotError {
        entity_name: "Hero".into(),
        reason: "broken".into(),
    };
    assert_eq!(err.to_string(), "inconsistent collection Hero: broken");
}

// ── Cache ────────────────────────────────────────────────────────

#[test]
fn cache_creates_collections_lazily() {
    let mut cache = EntityCache::new();
    assert!(!cache.contains("Hero"));
    cache.get_or_insert_with("Hero", || EntityCollection::new("Hero")).loading = true;
    assert!(cache.get("Hero").unwrap().loading);
    cache.get_or_insert_with("Hero", || panic!("must not recreate"));
    assert_eq!(cache.len(), 1);
}

#[test]
fn cache_serializes_as_map_of_collections() {
    let mut cache = EntityCache::new();
    cache.insert(heroes());
    let value = serde_json::to_value(&cache).unwrap();
    assert_eq!(value["Hero"]["ids"], json!([1, 2]));
    let back: EntityCache = serde_json::from_value(value).unwrap();
    assert_eq!(back, cache);
}

proptest! {
    #[test]
    fn ids_match_entity_keys_after_any_mutation(ops in prop::collection::vec((0u8..4, 0i64..8), 0..60)) {
        let mut c = EntityCollection::new("Hero");
        for (op, n) in ops {
            match op {
                0 => { c.insert(key(n), json!({"id": n})); }
                1 => c.upsert(key(n), json!({"id": n, "u": true})),
                2 => { c.remove(&key(n)); }
                _ => c.rekey(&key(n), key(n + 1), json!({"id": n + 1})),
            }
            let mut ids: Vec<_> = c.ids().to_vec();
            prop_assert_eq!(ids.len(), c.entity_map().len());
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), c.entity_map().len());
            for id in c.ids() {
                prop_assert!(c.contains(id));
            }
        }
    }
}
