//! Contract tests run against both store backends, so neither can drift
//! from the shared [`contact_cache::store::ContactStore`] guarantees.

use contact_cache::model::{ContactRecord, SyncState, UpsertOutcome};
use contact_cache::store::memory::MemoryStore;
use contact_cache::store::sqlite::SqliteStore;
use contact_cache::store::{ContactStore, StoreTransaction};

fn record(id: &str, version: i64) -> ContactRecord {
    ContactRecord {
        source_device: "dev1".to_string(),
        external_contact_id: id.to_string(),
        display_name: format!("Contact {id}"),
        phones: vec!["+15551234567".to_string()],
        emails: vec!["c@example.com".to_string()],
        avatar_etag: None,
        source_version: version,
        source_last_modified_ms: version,
        local_updated_ms: version,
        deleted: false,
    }
}

fn with_both_backends(f: impl Fn(&mut dyn ContactStore)) {
    let mut memory = MemoryStore::new();
    f(&mut memory);

    let mut sqlite = SqliteStore::open_in_memory().unwrap();
    f(&mut sqlite);
}

#[test]
fn commit_makes_writes_durable() {
    with_both_backends(|store| {
        let mut tx = store.begin_transaction().unwrap();
        assert_eq!(
            tx.upsert_contact(&record("a", 1)).unwrap(),
            UpsertOutcome::Inserted
        );
        tx.commit().unwrap();
        assert_eq!(store.count_contacts("dev1").unwrap(), 1);
    });
}

#[test]
fn drop_without_commit_rolls_back() {
    with_both_backends(|store| {
        {
            let mut tx = store.begin_transaction().unwrap();
            tx.upsert_contact(&record("a", 1)).unwrap();
        }
        assert_eq!(store.count_contacts("dev1").unwrap(), 0);
        assert!(store.get_contact("dev1", "a").unwrap().is_none());
    });
}

#[test]
fn higher_version_wins_lower_version_is_stale() {
    with_both_backends(|store| {
        let mut tx = store.begin_transaction().unwrap();
        tx.upsert_contact(&record("a", 5)).unwrap();
        let outcome = tx.upsert_contact(&record("a", 3)).unwrap();
        assert_eq!(outcome, UpsertOutcome::StaleIgnored);
        tx.commit().unwrap();
        let stored = store.get_contact("dev1", "a").unwrap().unwrap();
        assert_eq!(stored.source_version, 5);
    });
}

#[test]
fn repeated_identical_upsert_is_unchanged() {
    with_both_backends(|store| {
        let mut tx = store.begin_transaction().unwrap();
        tx.upsert_contact(&record("a", 1)).unwrap();
        let outcome = tx.upsert_contact(&record("a", 1)).unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        tx.commit().unwrap();
    });
}

#[test]
fn unchanged_upsert_does_not_advance_local_updated_ms() {
    with_both_backends(|store| {
        let mut tx = store.begin_transaction().unwrap();
        tx.upsert_contact(&record("a", 1)).unwrap();
        let mut replay = record("a", 1);
        replay.local_updated_ms = 999;
        let outcome = tx.upsert_contact(&replay).unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        tx.commit().unwrap();
        let stored = store.get_contact("dev1", "a").unwrap().unwrap();
        assert_eq!(stored.local_updated_ms, 1);
    });
}

#[test]
fn mark_deleted_tombstones_and_is_idempotent() {
    with_both_backends(|store| {
        let mut tx = store.begin_transaction().unwrap();
        tx.upsert_contact(&record("a", 1)).unwrap();
        assert!(tx.mark_deleted("dev1", "a", 2).unwrap());
        assert!(!tx.mark_deleted("dev1", "a", 2).unwrap());
        tx.commit().unwrap();
        assert_eq!(store.count_contacts("dev1").unwrap(), 0);
        assert!(store.get_contact("dev1", "a").unwrap().unwrap().deleted);
    });
}

#[test]
fn mark_deleted_on_absent_id_is_a_no_op() {
    with_both_backends(|store| {
        let mut tx = store.begin_transaction().unwrap();
        assert!(!tx.mark_deleted("dev1", "missing", 2).unwrap());
        tx.commit().unwrap();
    });
}

#[test]
fn delete_missing_only_tombstones_absent_ids() {
    with_both_backends(|store| {
        let mut tx = store.begin_transaction().unwrap();
        tx.upsert_contact(&record("a", 1)).unwrap();
        tx.upsert_contact(&record("b", 1)).unwrap();
        let deleted = tx.delete_missing("dev1", &["a".to_string()], 5).unwrap();
        assert_eq!(deleted, 1);
        tx.commit().unwrap();
        assert_eq!(store.count_contacts("dev1").unwrap(), 1);
        assert!(!store.get_contact("dev1", "a").unwrap().unwrap().deleted);
        assert!(store.get_contact("dev1", "b").unwrap().unwrap().deleted);
    });
}

#[test]
fn sync_state_roundtrips() {
    with_both_backends(|store| {
        let mut tx = store.begin_transaction().unwrap();
        let state = SyncState {
            last_full_sync_ms: 100,
            last_sync_token: Some("tok-1".to_string()),
            last_source_sync_sequence: 3,
            cache_schema_version: 1,
        };
        tx.set_sync_state("dev1", &state).unwrap();
        assert_eq!(tx.get_sync_state("dev1").unwrap(), Some(state));
        tx.commit().unwrap();
    });
}

#[test]
fn list_contacts_excludes_deleted() {
    with_both_backends(|store| {
        let mut tx = store.begin_transaction().unwrap();
        tx.upsert_contact(&record("a", 1)).unwrap();
        tx.mark_deleted("dev1", "a", 2).unwrap();
        tx.commit().unwrap();
        assert!(store.list_contacts("dev1").unwrap().is_empty());
    });
}

#[test]
fn purge_deleted_before_leaves_live_rows_alone() {
    with_both_backends(|store| {
        let mut tx = store.begin_transaction().unwrap();
        tx.upsert_contact(&record("a", 1)).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.purge_deleted_before(1_000).unwrap(), 0);
        assert_eq!(store.count_contacts("dev1").unwrap(), 1);
    });
}

#[test]
fn purge_deleted_before_only_removes_tombstones_older_than_cutoff() {
    with_both_backends(|store| {
        let mut tx = store.begin_transaction().unwrap();
        tx.upsert_contact(&record("old", 1)).unwrap();
        tx.mark_deleted("dev1", "old", 100).unwrap();
        tx.upsert_contact(&record("new", 1)).unwrap();
        tx.mark_deleted("dev1", "new", 500).unwrap();
        tx.commit().unwrap();

        let purged = store.purge_deleted_before(200).unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_contact("dev1", "old").unwrap().is_none());
        assert!(store.get_contact("dev1", "new").unwrap().is_some());
    });
}

#[test]
fn purge_deleted_before_is_a_no_op_on_an_empty_store() {
    with_both_backends(|store| {
        assert_eq!(store.purge_deleted_before(1_000).unwrap(), 0);
    });
}

#[test]
fn cross_device_isolation() {
    with_both_backends(|store| {
        let mut tx = store.begin_transaction().unwrap();
        tx.upsert_contact(&record("a", 1)).unwrap();
        let mut other = record("a", 1);
        other.source_device = "dev2".to_string();
        tx.upsert_contact(&other).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.count_contacts("dev1").unwrap(), 1);
        assert_eq!(store.count_contacts("dev2").unwrap(), 1);
    });
}
