#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;
use zonesync_sync::{ChangeSink, DeletedRecord, SyncResult, ZoneChangesPage, ZonePageResult};
use zonesync_types::{ChangeToken, FieldSpec, Record, RecordId, SyncableType, TypeRegistry, ZoneId};

/// Routes engine logs to the test harness when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn note_type() -> SyncableType {
    SyncableType::builder("Note")
        .primary_key("id")
        .zone("NotesZone")
        .field(FieldSpec::string("title"))
        .field(FieldSpec::int("rank"))
        .field(FieldSpec::blob("attachment"))
        .build()
        .unwrap()
}

pub fn tag_type() -> SyncableType {
    SyncableType::builder("Tag")
        .field(FieldSpec::string("label"))
        .build()
        .unwrap()
}

pub fn registry() -> Arc<TypeRegistry> {
    Arc::new(TypeRegistry::new([note_type(), tag_type()]).unwrap())
}

pub fn notes_zone() -> ZoneId {
    ZoneId::owned("NotesZone")
}

pub fn tags_zone() -> ZoneId {
    ZoneId::owned("TagsZone")
}

pub fn note_record(id: &str, title: &str) -> Record {
    Record::new("Note", RecordId::new(id, notes_zone())).with_field("title", title)
}

/// A zone page carrying `records`, ending at `token`.
pub fn zone_page(zone: &ZoneId, records: Vec<Record>, token: &str, more_coming: bool) -> ZoneChangesPage {
    ZoneChangesPage {
        changed: records,
        deleted: Vec::new(),
        zone_results: vec![ZonePageResult {
            zone: zone.clone(),
            token: Some(ChangeToken::from(token)),
            more_coming,
            error: None,
        }],
    }
}

pub fn deletion(zone: &ZoneId, id: &str, record_type: &str) -> DeletedRecord {
    DeletedRecord {
        id: RecordId::new(id, zone.clone()),
        record_type: record_type.to_string(),
    }
}

/// Collects everything a pull hands over.
#[derive(Default)]
pub struct RecordingSink {
    pub added: Mutex<Vec<Record>>,
    pub removed: Mutex<Vec<(RecordId, String)>>,
    pub deleted_zones: Mutex<Vec<ZoneId>>,
    pub completed: Mutex<Vec<(ZoneId, usize, usize)>>,
}

impl RecordingSink {
    pub fn added_ids(&self) -> Vec<String> {
        self.added
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.id.unique_id.clone())
            .collect()
    }
}

#[async_trait]
impl ChangeSink for RecordingSink {
    async fn on_added(&self, record: Record) -> SyncResult<()> {
        self.added.lock().unwrap().push(record);
        Ok(())
    }

    async fn on_removed(&self, id: RecordId, record_type: String) -> SyncResult<()> {
        self.removed.lock().unwrap().push((id, record_type));
        Ok(())
    }

    async fn on_zone_deleted(&self, zone: &ZoneId) -> SyncResult<()> {
        self.deleted_zones.lock().unwrap().push(zone.clone());
        Ok(())
    }

    async fn on_zone_completed(&self, zone: &ZoneId, added: usize, removed: usize) {
        self.completed.lock().unwrap().push((zone.clone(), added, removed));
    }
}
