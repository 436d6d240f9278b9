use entcache_model::{
    format_action_type, ActionError, ActionOverrides, DataServiceError, EntityActionFactory,
    EntityActionOptions, EntityOp, HttpMethod, MergeStrategy, ServiceFailure, Update,
};
use entcache_types::{CorrelationId, EntityKey};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

fn factory() -> EntityActionFactory {
    EntityActionFactory::new()
}

// ── create ───────────────────────────────────────────────────────

#[test]
fn create_sets_payload_and_type() {
    let action = factory()
        .create(
            "Hero",
            EntityOp::SaveAddOne,
            Some(json!({"id": 1, "name": "Francis"})),
            EntityActionOptions::new()
                .with_correlation_id("C1")
                .optimistic(true),
        )
        .unwrap();

    assert_eq!(action.action_type, "[Hero] @entcache/save/add-one");
    assert_eq!(action.entity_name(), "Hero");
    assert_eq!(action.entity_op(), EntityOp::SaveAddOne);
    assert_eq!(action.correlation_id(), Some(&CorrelationId::from("C1")));
    assert!(action.is_optimistic());
    assert!(!action.skip());
    assert_eq!(action.merge_strategy(), None);
}

#[test]
fn create_uses_tag_in_type() {
    let action = factory()
        .create(
            "Hero",
            EntityOp::QueryAll,
            None,
            EntityActionOptions::new().with_tag("HeroList"),
        )
        .unwrap();
    assert_eq!(action.action_type, "[HeroList] @entcache/query-all");
    assert_eq!(action.tag(), Some("HeroList"));
}

#[test]
fn create_without_entity_name_fails() {
    let err = factory()
        .create("", EntityOp::QueryAll, None, EntityActionOptions::new())
        .unwrap_err();
    assert_eq!(err, ActionError::MissingEntityName);

    let err = factory()
        .create("   ", EntityOp::QueryAll, None, EntityActionOptions::new())
        .unwrap_err();
    assert_eq!(err, ActionError::MissingEntityName);
}

#[test]
fn custom_formatter_is_used() {
    let factory = EntityActionFactory::with_formatter(|op, name| format!("{name}:{op:?}"));
    let action = factory
        .create("Villain", EntityOp::RemoveAll, None, EntityActionOptions::new())
        .unwrap();
    assert_eq!(action.action_type, "Villain:RemoveAll");
    assert_eq!(factory.format_action_type(EntityOp::AddOne, "X"), "X:AddOne");
}

// ── create_from_json ─────────────────────────────────────────────

#[test]
fn create_from_json_accepts_wire_shape() {
    let action = factory()
        .create_from_json(&json!({
            "type": "ignored",
            "payload": {
                "entityName": "Hero",
                "entityOp": "@entcache/save/delete-one",
                "data": 7,
                "correlationId": "C9",
                "isOptimistic": true,
                "mergeStrategy": "PreserveChanges"
            }
        }))
        .unwrap();
    assert_eq!(action.action_type, "[Hero] @entcache/save/delete-one");
    assert_eq!(action.keys(), vec![EntityKey::Num(7)]);
    assert_eq!(action.merge_strategy(), Some(MergeStrategy::PreserveChanges));
}

#[test]
fn create_from_json_accepts_bare_payload() {
    let action = factory()
        .create_from_json(&json!({"entityName": "Hero", "entityOp": "@entcache/query-all"}))
        .unwrap();
    assert_eq!(action.entity_op(), EntityOp::QueryAll);
}

#[test]
fn create_from_json_missing_entity_name_fails() {
    let err = factory()
        .create_from_json(&json!({"entityOp": "@entcache/query-all"}))
        .unwrap_err();
    assert_eq!(err, ActionError::MissingEntityName);
}

#[test]
fn create_from_json_missing_entity_op_fails() {
    let err = factory()
        .create_from_json(&json!({"payload": {"entityName": "Hero"}}))
        .unwrap_err();
    assert_eq!(err, ActionError::MissingEntityOp);

    let err = factory()
        .create_from_json(&json!({"entityName": "Hero", "entityOp": ""}))
        .unwrap_err();
    assert_eq!(err, ActionError::MissingEntityOp);
}

#[test]
fn create_from_json_unknown_entity_op_fails() {
    let err = factory()
        .create_from_json(&json!({"entityName": "Hero", "entityOp": "fly"}))
        .unwrap_err();
    assert_eq!(err, ActionError::UnknownEntityOp("fly".into()));
}

#[test]
fn create_from_json_bad_field_type_fails() {
    let err = factory()
        .create_from_json(&json!({
            "entityName": "Hero",
            "entityOp": "@entcache/query-all",
            "isOptimistic": "yes"
        }))
        .unwrap_err();
    assert!(matches!(err, ActionError::InvalidPayload(_)));
}

// ── create_from_action ───────────────────────────────────────────

#[test]
fn create_from_action_carries_concurrency_options() {
    let f = factory();
    let request = f
        .create(
            "Hero",
            EntityOp::SaveUpdateOne,
            Some(json!({"id": 1, "changes": {"name": "B"}})),
            EntityActionOptions::new()
                .with_correlation_id("C2")
                .optimistic(true)
                .with_merge_strategy(MergeStrategy::IgnoreChanges)
                .with_tag("Editor"),
        )
        .unwrap();

    let success = f.create_from_action(&request, ActionOverrides::op(EntityOp::SaveUpdateOneSuccess));

    assert_eq!(success.action_type, "[Editor] @entcache/save/update-one/success");
    assert_eq!(success.correlation_id(), request.correlation_id());
    assert!(success.is_optimistic());
    assert_eq!(success.merge_strategy(), Some(MergeStrategy::IgnoreChanges));
    assert_eq!(success.data(), request.data());
}

#[test]
fn create_from_action_overrides_data_and_error() {
    let f = factory();
    let request = f
        .create("Hero", EntityOp::SaveAddOne, Some(json!({"name": "A"})), EntityActionOptions::new())
        .unwrap();
    let error = DataServiceError::new(HttpMethod::Post, "api/hero", ServiceFailure::Network("down".into()));

    let failed = f.create_from_action(
        &request,
        ActionOverrides::op(EntityOp::SaveAddOneError).with_error(error.clone()),
    );
    assert_eq!(failed.error(), Some(&error));
    assert_eq!(failed.data(), request.data());

    let emptied = f.create_from_action(&request, ActionOverrides::op(EntityOp::SaveAddOneSuccess).without_data());
    assert_eq!(emptied.data(), None);

    let replaced = f.create_from_action(&request, ActionOverrides::default().with_data(json!({"id": 9})));
    assert_eq!(replaced.entity_op(), EntityOp::SaveAddOne);
    assert_eq!(replaced.data(), Some(&json!({"id": 9})));
}

// ── Data extraction ──────────────────────────────────────────────

#[test]
fn entities_from_array_single_and_null() {
    let f = factory();
    let many = f
        .create("Hero", EntityOp::AddMany, Some(json!([{"id": 1}, {"id": 2}])), EntityActionOptions::new())
        .unwrap();
    assert_eq!(many.entities().len(), 2);

    let one = f
        .create("Hero", EntityOp::AddOne, Some(json!({"id": 1})), EntityActionOptions::new())
        .unwrap();
    assert_eq!(one.entities(), vec![json!({"id": 1})]);

    let none = f
        .create("Hero", EntityOp::QueryByKeySuccess, Some(json!(null)), EntityActionOptions::new())
        .unwrap();
    assert!(none.entities().is_empty());
    assert!(none.entity().is_none());
}

#[test]
fn updates_from_data() {
    let action = factory()
        .create(
            "Hero",
            EntityOp::UpdateMany,
            Some(json!([{"id": 1, "changes": {"a": 1}}, {"bogus": true}])),
            EntityActionOptions::new(),
        )
        .unwrap();
    assert_eq!(action.updates(), vec![Update::new(1, json!({"a": 1}))]);
}

#[test]
fn update_applies_shallow_merge() {
    let update = Update::new("h1", json!({"name": "New", "power": null}));
    let merged = update.apply_to(&json!({"id": "h1", "name": "Old", "power": 3, "age": 30}));
    assert_eq!(merged, json!({"id": "h1", "name": "New", "power": null, "age": 30}));
}

// ── Wire shape ───────────────────────────────────────────────────

#[test]
fn action_serializes_camel_case_and_skips_absent_fields() {
    let action = factory()
        .create(
            "Hero",
            EntityOp::QueryAll,
            None,
            EntityActionOptions::new().with_correlation_id("C1"),
        )
        .unwrap();
    let value = serde_json::to_value(&action).unwrap();
    assert_eq!(
        value,
        json!({
            "type": "[Hero] @entcache/query-all",
            "payload": {
                "entityName": "Hero",
                "entityOp": "@entcache/query-all",
                "correlationId": "C1"
            }
        })
    );
}

proptest! {
    #[test]
    fn format_action_type_is_pure(name in "[A-Za-z][A-Za-z0-9]{0,20}", idx in 0usize..EntityOp::ALL.len()) {
        let op = EntityOp::ALL[idx];
        prop_assert_eq!(format_action_type(op, &name), format_action_type(op, &name));
        let f = EntityActionFactory::new();
        prop_assert_eq!(f.format_action_type(op, &name), format_action_type(op, &name));
    }

    #[test]
    fn well_formed_creation_never_fails(name in "[A-Za-z][A-Za-z0-9]{0,20}", idx in 0usize..EntityOp::ALL.len()) {
        let op = EntityOp::ALL[idx];
        let action = EntityActionFactory::new().create(name.clone(), op, None, EntityActionOptions::new());
        prop_assert!(action.is_ok());
        let action = action.unwrap();
        prop_assert_eq!(action.entity_name(), name.as_str());
        prop_assert_eq!(action.entity_op(), op);
    }
}
