use pretty_assertions::assert_eq;
use std::sync::Arc;
use zonesync_storage::{LocalStore, MemoryStore, StorageError, WriteTransaction};
use zonesync_types::Entity;

fn note(id: &str, title: &str) -> Entity {
    Entity::new("Note", id).with_field("title", title)
}

fn commit(store: &MemoryStore, build: impl FnOnce(&mut WriteTransaction)) {
    let mut txn = WriteTransaction::new();
    build(&mut txn);
    store.write(txn).unwrap();
}

// ── Queries ─────────────────────────────────────────────────────

#[test]
fn query_unknown_type_is_empty() {
    let store = MemoryStore::new();
    assert!(store.query("Note").unwrap().is_empty());
    assert!(store.find("Note", "a").unwrap().is_none());
}

#[test]
fn rows_keep_first_insertion_order() {
    let store = MemoryStore::new();
    commit(&store, |t| {
        t.upsert(note("b", "B")).upsert(note("a", "A"));
    });
    commit(&store, |t| {
        t.upsert(note("c", "C")).upsert(note("b", "B2"));
    });

    let ids: Vec<String> = store.query("Note").unwrap().into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["b", "a", "c"]);
    assert_eq!(store.find("Note", "b").unwrap().unwrap().get_str("title"), Some("B2"));
}

#[test]
fn collections_are_separate_per_type() {
    let store = MemoryStore::new();
    commit(&store, |t| {
        t.upsert(note("a", "A")).upsert(Entity::new("Tag", "a"));
    });
    assert_eq!(store.query("Note").unwrap().len(), 1);
    assert_eq!(store.query("Tag").unwrap().len(), 1);
}

// ── Transactions ────────────────────────────────────────────────

#[test]
fn failed_transaction_writes_nothing() {
    let store = MemoryStore::new();
    commit(&store, |t| {
        t.upsert(note("a", "A"));
    });

    let mut txn = WriteTransaction::new();
    txn.upsert(note("b", "B")).insert(note("a", "dup"));
    let err = store.write(txn).unwrap_err();
    assert!(matches!(err, StorageError::DuplicateKey { .. }));

    let rows = store.query("Note").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_str("title"), Some("A"));
}

#[test]
fn upsert_without_primary_key_is_rejected() {
    let store = MemoryStore::new();
    let mut txn = WriteTransaction::new();
    txn.upsert(note("", "x"));
    assert!(matches!(store.write(txn), Err(StorageError::InvalidData(_))));
}

#[test]
fn delete_of_missing_row_is_noop() {
    let store = MemoryStore::new();
    commit(&store, |t| {
        t.delete("Note", "ghost");
    });
    assert!(store.query("Note").unwrap().is_empty());
}

#[test]
fn closure_transaction_rolls_back_on_error() {
    let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
    let result = store.transaction(None, |t| {
        t.upsert(note("a", "A"));
        Err(StorageError::InvalidData("abort".into()))
    });
    assert!(result.is_err());
    assert!(store.query("Note").unwrap().is_empty());

    store
        .transaction(None, |t| {
            t.upsert(note("a", "A"));
            Ok(())
        })
        .unwrap();
    assert_eq!(store.query("Note").unwrap().len(), 1);
}

// ── Observation ─────────────────────────────────────────────────

#[tokio::test]
async fn observer_sees_insertions_modifications_and_deletions() {
    let store = MemoryStore::new();
    commit(&store, |t| {
        t.upsert(note("a", "A")).upsert(note("b", "B"));
    });

    let mut obs = store.observe("Note").unwrap();
    commit(&store, |t| {
        t.upsert(note("a", "A2")).delete("Note", "b").upsert(note("c", "C"));
    });

    let change = obs.changes.recv().await.unwrap();
    assert_eq!(change.deletions, vec![1]);
    assert_eq!(change.modifications, vec![0]);
    assert_eq!(change.insertions, vec![1]);
    assert_eq!(change.snapshot[1].id, "c");
}

#[tokio::test]
async fn unchanged_rewrite_does_not_notify() {
    let store = MemoryStore::new();
    commit(&store, |t| {
        t.upsert(note("a", "A"));
    });
    let mut obs = store.observe("Note").unwrap();
    commit(&store, |t| {
        t.upsert(note("a", "A"));
    });
    assert!(obs.changes.try_recv().is_err());
}

#[tokio::test]
async fn suppressed_observer_is_skipped_but_others_notified() {
    let store = MemoryStore::new();
    let mut suppressed = store.observe("Note").unwrap();
    let mut other = store.observe("Note").unwrap();

    let mut txn = WriteTransaction::suppressing(suppressed.id);
    txn.upsert(note("a", "A"));
    store.write(txn).unwrap();

    assert!(suppressed.changes.try_recv().is_err());
    assert_eq!(other.changes.recv().await.unwrap().insertions, vec![0]);
}

#[tokio::test]
async fn observers_only_see_their_type() {
    let store = MemoryStore::new();
    let mut notes = store.observe("Note").unwrap();
    commit(&store, |t| {
        t.upsert(Entity::new("Tag", "t"));
    });
    assert!(notes.changes.try_recv().is_err());
}

#[tokio::test]
async fn unobserve_closes_channel() {
    let store = MemoryStore::new();
    let mut obs = store.observe("Note").unwrap();
    store.unobserve(obs.id);
    commit(&store, |t| {
        t.upsert(note("a", "A"));
    });
    assert!(obs.changes.recv().await.is_none());
}
