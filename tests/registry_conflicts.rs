mod common;

use std::sync::Arc;

use eavault::EavaultError;
use eavault::datatype::ScalarKind;
use eavault::registry::{EntityTypeDef, FieldKind, Registry};

use common::*;

#[test]
fn identical_registration_is_a_no_op() {
    let registry = Registry::new();
    let first = registry
        .register_field(1, "name", FieldKind::Scalar(ScalarKind::Text))
        .expect("first");
    let again = registry
        .register_field(1, "name", FieldKind::Scalar(ScalarKind::Text))
        .expect("again");
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(registry.snapshot().expect("snapshot").field_count(), 1);
}

#[test]
fn field_conflict_is_fatal() {
    let registry = Registry::new();
    registry
        .register_field(1, "name", FieldKind::Scalar(ScalarKind::Text))
        .expect("name");
    let renamed = registry.register_field(1, "title", FieldKind::Scalar(ScalarKind::Text));
    assert!(matches!(renamed, Err(EavaultError::MetadataConflict(_))));
    let retyped = registry.register_field(1, "name", FieldKind::Array(ScalarKind::Text));
    assert!(matches!(retyped, Err(EavaultError::MetadataConflict(_))));
    assert_eq!(registry.lookup_field(1).expect("kept").name(), "name");
}

#[test]
fn entity_type_conflict_leaves_original_intact() {
    let registry = Registry::new();
    registry
        .register_field(1, "name", FieldKind::Scalar(ScalarKind::Text))
        .expect("name");
    registry
        .register_field(2, "age", FieldKind::Scalar(ScalarKind::Integer))
        .expect("age");
    registry
        .register_entity_type(EntityTypeDef::new(5, "Person").field(1))
        .expect("person");
    let conflicting = registry.register_entity_type(EntityTypeDef::new(5, "Person").field(1).field(2));
    assert!(matches!(conflicting, Err(EavaultError::MetadataConflict(_))));
    let kept = registry.lookup_entity_type(5).expect("kept");
    assert!(kept.field(1).is_some());
    assert!(kept.field(2).is_none());
    assert_eq!(registry.snapshot().expect("snapshot").entity_type_count(), 1);
}

#[test]
fn unknown_metadata_is_reported() {
    let registry = Registry::new();
    assert!(matches!(registry.lookup_field(7), Err(EavaultError::UnknownMetadata(_))));
    assert!(matches!(
        registry.lookup_entity_type(7),
        Err(EavaultError::UnknownMetadata(_))
    ));
    assert!(matches!(
        registry.register_entity_type(EntityTypeDef::new(7, "Orphan").field(99)),
        Err(EavaultError::UnknownMetadata(_))
    ));
    assert!(matches!(
        registry.register_entity_type(EntityTypeDef::new(8, "Child").extends(7)),
        Err(EavaultError::UnknownMetadata(_))
    ));
    assert!(matches!(registry.instantiate(7), Err(EavaultError::UnknownMetadata(_))));
}

#[test]
fn names_must_be_identifiers() {
    let registry = Registry::new();
    let bad = registry.register_field(1, "drop table; --", FieldKind::Scalar(ScalarKind::Text));
    assert!(matches!(bad, Err(EavaultError::InvalidIdentifier(_))));
    let digit = registry.register_field(2, "1st", FieldKind::Scalar(ScalarKind::Text));
    assert!(matches!(digit, Err(EavaultError::InvalidIdentifier(_))));
    assert!(registry.register_field(3, "_ok_2", FieldKind::Scalar(ScalarKind::Text)).is_ok());
}

#[test]
fn enum_fields_are_registered_with_literals() {
    let registry = Registry::new();
    assert!(matches!(
        registry.register_field(1, "colour", FieldKind::Enum),
        Err(EavaultError::InvalidDefinition(_))
    ));
    assert!(matches!(
        registry.register_enum_field(1, "colour", &["red", "red"]),
        Err(EavaultError::InvalidDefinition(_))
    ));
    let colour = registry
        .register_enum_field(1, "colour", &["red", "green"])
        .expect("colour");
    assert_eq!(colour.index_of("green"), Some(1));
    assert_eq!(colour.literal_at(0), Some("red"));
    assert_eq!(colour.literal_at(2), None);
    assert!(matches!(
        registry.register_enum_field(1, "colour", &["green", "red"]),
        Err(EavaultError::MetadataConflict(_))
    ));
    // an enum field must be listed as one
    assert!(matches!(
        registry.register_entity_type(EntityTypeDef::new(2, "Paint").field(1)),
        Err(EavaultError::InvalidDefinition(_))
    ));
}

#[test]
fn extends_unions_parent_fields() {
    let registry = registry();
    let dog = registry.lookup_entity_type(DOG).expect("dog");
    assert_eq!(dog.extends(), &[PET]);
    for field in [NAME, SPECIES, WEIGHT, COLOURS] {
        assert!(dog.field(field).is_some(), "dog lacks field {}", field);
    }
    assert!(dog.enum_field(COLOURS).is_some());
    assert!(dog.field(AGE).is_none());
}

#[test]
fn snapshots_do_not_see_later_registrations() {
    let registry = Registry::new();
    let before = registry.snapshot().expect("snapshot");
    registry
        .register_field(1, "name", FieldKind::Scalar(ScalarKind::Text))
        .expect("name");
    assert!(before.field(1).is_none());
    assert!(registry.snapshot().expect("snapshot").field(1).is_some());
}

#[test]
fn ensure_entity_type_adopts_foreign_definitions() {
    let source = registry();
    let person = source.lookup_entity_type(PERSON).expect("person");
    let target = Registry::new();
    assert!(target.ensure_entity_type(&person).expect("first"));
    assert!(!target.ensure_entity_type(&person).expect("second"));
    assert!(target.lookup_field(NAME).is_ok());
    assert!(target.lookup_enum_field(COLOURS).is_ok());

    let clash = Registry::new();
    clash
        .register_field(NAME, "title", FieldKind::Scalar(ScalarKind::Text))
        .expect("title");
    assert!(matches!(
        clash.ensure_entity_type(&person),
        Err(EavaultError::MetadataConflict(_))
    ));
    // nothing of the failed registration was published
    assert!(clash.lookup_entity_type(PERSON).is_err());
    assert!(clash.lookup_field(AGE).is_err());
}

#[test]
fn concurrent_registration_keeps_one_definition() {
    let registry = Arc::new(Registry::new());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                registry
                    .register_field(i % 2, &format!("field_{}", i % 2), FieldKind::Scalar(ScalarKind::Long))
                    .expect("register")
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join");
    }
    assert_eq!(registry.snapshot().expect("snapshot").field_count(), 2);
}
