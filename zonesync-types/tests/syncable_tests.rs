use proptest::prelude::*;
use zonesync_types::{Error, FieldKind, FieldSpec, SyncableType, TypeRegistry, ZoneId};

fn dog_type() -> SyncableType {
    SyncableType::builder("Dog")
        .field(FieldSpec::string("name"))
        .field(FieldSpec::int("age"))
        .field(FieldSpec::blob("avatar"))
        .build()
        .unwrap()
}

// ── Builder ───────────────────────────────────────────────────────

#[test]
fn builder_defaults() {
    let ty = dog_type();
    assert_eq!(ty.record_type, "Dog");
    assert_eq!(ty.primary_key, "id");
    assert_eq!(ty.soft_delete_field, "isDeleted");
    assert_eq!(ty.zone, ZoneId::owned("DogsZone"));
}

#[test]
fn builder_custom_zone_and_owner() {
    let ty = SyncableType::builder("Cat")
        .zone("Pets")
        .zone_owner("alice")
        .primary_key("uuid")
        .build()
        .unwrap();
    assert_eq!(ty.zone, ZoneId::new("Pets", "alice"));
    assert_eq!(ty.primary_key, "uuid");
}

#[test]
fn builder_default_zone() {
    let ty = SyncableType::builder("Post").default_zone().build().unwrap();
    assert!(ty.zone.is_default_zone());
}

#[test]
fn builder_rejects_duplicate_fields() {
    let err = SyncableType::builder("Dog")
        .field(FieldSpec::string("name"))
        .field(FieldSpec::int("name"))
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidDescriptor { .. }));
}

#[test]
fn builder_rejects_reserved_field_names() {
    let err = SyncableType::builder("Dog")
        .field(FieldSpec::bool("isDeleted"))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("isDeleted"));
}

#[test]
fn builder_rejects_empty_name() {
    assert!(SyncableType::builder("").build().is_err());
}

#[test]
fn field_lookup_and_blob_fields() {
    let ty = dog_type();
    assert_eq!(ty.field("age").map(|f| f.kind), Some(FieldKind::Int));
    assert!(ty.field("unknown").is_none());
    assert_eq!(ty.blob_fields().collect::<Vec<_>>(), vec!["avatar"]);
}

proptest! {
    #[test]
    fn blob_prefix_covers_every_field_key(pk in "[a-zA-Z0-9-]{1,24}", field in "[a-z]{1,12}") {
        let ty = dog_type();
        prop_assert!(ty.blob_key(&pk, &field).starts_with(&ty.blob_prefix(&pk)));
    }
}

// ── Registry ──────────────────────────────────────────────────────

#[test]
fn registry_lookup() {
    let registry = TypeRegistry::new([dog_type()]).unwrap();
    assert_eq!(registry.len(), 1);
    assert!(registry.get("Dog").is_some());
    assert!(registry.get("Cat").is_none());
}

#[test]
fn registry_rejects_duplicates() {
    let err = TypeRegistry::new([dog_type(), dog_type()]).unwrap_err();
    assert!(matches!(err, Error::DuplicateType(name) if name == "Dog"));
}

#[test]
fn registry_groups_shared_zones() {
    let dog = SyncableType::builder("Dog").zone("Pets").build().unwrap();
    let cat = SyncableType::builder("Cat").zone("Pets").build().unwrap();
    let note = SyncableType::builder("Note").build().unwrap();
    let registry = TypeRegistry::new([dog, cat, note]).unwrap();

    let pets = ZoneId::owned("Pets");
    assert_eq!(registry.zones(), vec![pets.clone(), ZoneId::owned("NotesZone")]);
    assert!(registry.is_shared_zone(&pets));
    assert!(!registry.is_shared_zone(&ZoneId::owned("NotesZone")));

    let names: Vec<_> = registry
        .types_in_zone(&pets)
        .iter()
        .map(|t| t.record_type.clone())
        .collect();
    assert_eq!(names, vec!["Dog", "Cat"]);
}

#[test]
fn empty_registry() {
    let registry = TypeRegistry::new(Vec::new()).unwrap();
    assert!(registry.is_empty());
    assert!(registry.zones().is_empty());
}
