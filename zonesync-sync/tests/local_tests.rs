use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};
use zonesync_storage::{LocalStore, MemoryStore, WriteTransaction};
use zonesync_sync::{LocalBatch, LocalChangeSource};
use zonesync_types::Entity;

const DEBOUNCE: Duration = Duration::from_millis(500);

fn note(id: &str, title: &str) -> Entity {
    Entity::new("Note", id).with_field("title", title)
}

fn upsert(store: &Arc<dyn LocalStore>, entity: Entity) {
    let mut txn = WriteTransaction::new();
    txn.upsert(entity);
    store.write(txn).unwrap();
}

fn setup() -> (
    Arc<dyn LocalStore>,
    LocalChangeSource,
    mpsc::UnboundedReceiver<LocalBatch>,
) {
    let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
    let (tx, rx) = mpsc::unbounded_channel();
    let source = LocalChangeSource::spawn(store.clone(), "Note", DEBOUNCE, tx).unwrap();
    (store, source, rx)
}

fn titles(entities: &[Entity]) -> Vec<&str> {
    entities.iter().filter_map(|e| e.get_str("title")).collect()
}

async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<LocalBatch>) {
    assert!(timeout(Duration::from_secs(5), rx.recv()).await.is_err());
}

// ── Debounce ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn changes_within_window_collapse_into_one_batch() {
    let (store, source, mut rx) = setup();
    assert_eq!(source.record_type(), "Note");

    upsert(&store, note("a", "A1"));
    sleep(Duration::from_millis(200)).await;
    upsert(&store, note("b", "B"));
    upsert(&store, note("a", "A2"));
    let last_change = Instant::now();

    let batch = rx.recv().await.unwrap();
    assert!(last_change.elapsed() >= DEBOUNCE);
    assert_eq!(batch.record_type, "Note");
    assert_eq!(titles(&batch.to_store), vec!["A2", "B"]);
    assert!(batch.to_delete.is_empty());
    assert_quiet(&mut rx).await;
}

#[tokio::test(start_paused = true)]
async fn changes_after_window_form_a_new_batch() {
    let (store, _source, mut rx) = setup();

    upsert(&store, note("a", "A1"));
    let first = rx.recv().await.unwrap();
    upsert(&store, note("a", "A2"));
    let second = rx.recv().await.unwrap();

    assert_eq!(titles(&first.to_store), vec!["A1"]);
    assert_eq!(titles(&second.to_store), vec!["A2"]);
}

// ── Classification ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn soft_deleted_rows_become_deletions() {
    let (store, _source, mut rx) = setup();
    upsert(&store, note("a", "A"));
    rx.recv().await.unwrap();

    let mut deleted = note("a", "A");
    deleted.mark_deleted();
    upsert(&store, deleted);

    let batch = rx.recv().await.unwrap();
    assert!(batch.to_store.is_empty());
    assert_eq!(batch.to_delete.len(), 1);
    assert_eq!(batch.to_delete[0].id, "a");
}

#[tokio::test(start_paused = true)]
async fn inserting_a_deleted_row_is_not_a_change() {
    let (store, _source, mut rx) = setup();
    let mut deleted = note("a", "A");
    deleted.mark_deleted();
    upsert(&store, deleted);
    assert_quiet(&mut rx).await;
}

#[tokio::test(start_paused = true)]
async fn physical_removals_are_ignored() {
    let (store, _source, mut rx) = setup();
    upsert(&store, note("a", "A"));
    rx.recv().await.unwrap();

    let mut txn = WriteTransaction::new();
    txn.delete("Note", "a");
    store.write(txn).unwrap();
    assert_quiet(&mut rx).await;
}

#[tokio::test(start_paused = true)]
async fn other_types_and_suppressed_writes_are_not_seen() {
    let (store, source, mut rx) = setup();

    upsert(&store, Entity::new("Tag", "t"));
    let mut txn = WriteTransaction::suppressing(source.observer());
    txn.upsert(note("a", "from remote"));
    store.write(txn).unwrap();

    assert_quiet(&mut rx).await;
}

#[tokio::test(start_paused = true)]
async fn dropping_the_source_stops_observation() {
    let (store, source, mut rx) = setup();
    drop(source);
    upsert(&store, note("a", "A"));
    assert!(timeout(Duration::from_secs(5), rx.recv()).await.map_or(true, |b| b.is_none()));
}
