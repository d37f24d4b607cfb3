use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use zonesync_types::{Asset, Entity, FieldKind, FieldValue, Record, RecordId, ZoneId};

fn dog_record() -> Record {
    Record::new("Dog", RecordId::new("x1", ZoneId::owned("DogsZone")))
        .with_field("name", "Rex")
        .with_field("age", 3i64)
        .with_field("isDeleted", false)
}

// ── FieldValue ────────────────────────────────────────────────────

#[test]
fn field_value_kinds() {
    assert_eq!(FieldValue::Int(1).kind(), Some(FieldKind::Int));
    assert_eq!(FieldValue::from("a").kind(), Some(FieldKind::String));
    assert_eq!(FieldValue::Bool(true).kind(), Some(FieldKind::Bool));
    assert_eq!(FieldValue::Float(1.0).kind(), Some(FieldKind::Float));
    assert_eq!(FieldValue::Double(1.0).kind(), Some(FieldKind::Double));
    assert_eq!(
        FieldValue::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()).kind(),
        Some(FieldKind::Timestamp)
    );
    assert_eq!(FieldValue::BlobRef("loc".into()).kind(), Some(FieldKind::Blob));
    assert_eq!(
        FieldValue::Asset(Asset { key: "k".into(), bytes: vec![1] }).kind(),
        Some(FieldKind::Blob)
    );
    assert_eq!(FieldValue::Null.kind(), None);
}

#[test]
fn field_value_accessors() {
    assert_eq!(FieldValue::from("Rex").as_str(), Some("Rex"));
    assert_eq!(FieldValue::Bool(true).as_bool(), Some(true));
    assert_eq!(FieldValue::Int(7).as_int(), Some(7));
    assert_eq!(FieldValue::Int(7).as_str(), None);
}

#[test]
fn field_value_json_is_tagged() {
    let json = serde_json::to_string(&FieldValue::Int(5)).unwrap();
    assert_eq!(json, r#"{"type":"int","value":5}"#);
}

// ── Record ────────────────────────────────────────────────────────

#[test]
fn record_builder_sets_fields() {
    let record = dog_record();
    assert_eq!(record.record_type, "Dog");
    assert_eq!(record.get("name"), Some(&FieldValue::from("Rex")));
    assert_eq!(record.get("missing"), None);
}

#[test]
fn record_size_counts_asset_bytes() {
    let small = dog_record();
    let big = dog_record().with_field(
        "avatar",
        FieldValue::Asset(Asset { key: "Dog_x1_avatar".into(), bytes: vec![0u8; 1024] }),
    );
    assert!(big.approximate_size() >= small.approximate_size() + 1024);
}

// ── Entity ────────────────────────────────────────────────────────

#[test]
fn entity_starts_live() {
    let entity = Entity::new("Dog", "x1").with_field("name", "Rex");
    assert!(!entity.is_deleted);
    assert_eq!(entity.get_str("name"), Some("Rex"));
}

#[test]
fn entity_soft_delete_keeps_fields() {
    let mut entity = Entity::new("Dog", "x1").with_field("name", "Rex");
    entity.mark_deleted();
    assert!(entity.is_deleted);
    assert_eq!(entity.get_str("name"), Some("Rex"));
}

#[test]
fn entity_set_overwrites() {
    let mut entity = Entity::new("Dog", "x1").with_field("name", "Rex");
    entity.set("name", "Max");
    assert_eq!(entity.get_str("name"), Some("Max"));
}

#[test]
fn entity_deserializes_without_flag() {
    let entity: Entity =
        serde_json::from_str(r#"{"entity_type":"Dog","id":"x1","fields":{}}"#).unwrap();
    assert!(!entity.is_deleted);
}
