//! In-memory store backend. Grounded in the same transactional contract as
//! the SQLite backend but implements rollback by snapshot-and-restore
//! rather than a WAL, per §9's explicit callout that the in-memory backend
//! "may implement rollback via snapshot instead of a journal."

use std::collections::BTreeMap;

use crate::error::Result;
use crate::model::{ContactRecord, SyncState, UpsertOutcome};
use crate::store::{ContactStore, StoreTransaction};

type Key = (String, String);

#[derive(Debug, Clone, Default)]
struct MemoryStoreInner {
    contacts: BTreeMap<Key, ContactRecord>,
    sync_state: BTreeMap<String, SyncState>,
}

/// A [`ContactStore`] backed by an in-process `BTreeMap`, with no
/// persistence across process restarts. Useful for tests and for adapters
/// that only need a cache for the lifetime of a single process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: MemoryStoreInner,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContactStore for MemoryStore {
    fn begin_transaction(&mut self) -> Result<Box<dyn StoreTransaction + '_>> {
        let snapshot = self.inner.clone();
        Ok(Box::new(MemoryTransaction {
            store: &mut self.inner,
            snapshot: Some(snapshot),
        }))
    }

    fn list_contacts(&self, source_device: &str) -> Result<Vec<ContactRecord>> {
        let mut out: Vec<ContactRecord> = self
            .inner
            .contacts
            .iter()
            .filter(|((device, _), record)| device == source_device && !record.deleted)
            .map(|(_, record)| record.clone())
            .collect();
        out.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.external_contact_id.cmp(&b.external_contact_id))
        });
        Ok(out)
    }

    fn get_contact(
        &self,
        source_device: &str,
        external_contact_id: &str,
    ) -> Result<Option<ContactRecord>> {
        let key = (source_device.to_string(), external_contact_id.to_string());
        Ok(self.inner.contacts.get(&key).cloned())
    }

    fn count_contacts(&self, source_device: &str) -> Result<u32> {
        Ok(self
            .inner
            .contacts
            .iter()
            .filter(|((device, _), record)| device == source_device && !record.deleted)
            .count() as u32)
    }

    fn get_sync_state(&self, source_device: &str) -> Result<Option<SyncState>> {
        Ok(self.inner.sync_state.get(source_device).cloned())
    }

    fn purge_deleted_before(&mut self, cutoff_ms: i64) -> Result<u32> {
        let mut count = 0u32;
        self.inner.contacts.retain(|_, record| {
            let purge = record.deleted && record.local_updated_ms < cutoff_ms;
            if purge {
                count += 1;
            }
            !purge
        });
        Ok(count)
    }
}

/// An open transaction over a [`MemoryStore`]. Holds a full clone of the
/// pre-transaction state; `Drop` restores it unless [`commit`] consumed the
/// handle first.
///
/// [`commit`]: StoreTransaction::commit
pub struct MemoryTransaction<'a> {
    store: &'a mut MemoryStoreInner,
    snapshot: Option<MemoryStoreInner>,
}

impl<'a> Drop for MemoryTransaction<'a> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.store = snapshot;
        }
    }
}

impl<'a> StoreTransaction for MemoryTransaction<'a> {
    fn upsert_contact(&mut self, record: &ContactRecord) -> Result<UpsertOutcome> {
        let key = (
            record.source_device.clone(),
            record.external_contact_id.clone(),
        );
        let outcome = match self.store.contacts.get(&key) {
            None => UpsertOutcome::Inserted,
            Some(existing) => {
                if crate::engine::is_preferred(record, existing) {
                    if crate::engine::is_unchanged(record, existing) {
                        UpsertOutcome::Unchanged
                    } else {
                        UpsertOutcome::Updated
                    }
                } else {
                    UpsertOutcome::StaleIgnored
                }
            }
        };
        if matches!(outcome, UpsertOutcome::Inserted | UpsertOutcome::Updated) {
            self.store.contacts.insert(key, record.clone());
        }
        Ok(outcome)
    }

    fn mark_deleted(
        &mut self,
        source_device: &str,
        external_contact_id: &str,
        local_updated_ms: i64,
    ) -> Result<bool> {
        let key = (source_device.to_string(), external_contact_id.to_string());
        match self.store.contacts.get_mut(&key) {
            None => Ok(false),
            Some(existing) if existing.deleted => Ok(false),
            Some(existing) => {
                existing.deleted = true;
                existing.local_updated_ms = local_updated_ms;
                Ok(true)
            }
        }
    }

    fn delete_missing(
        &mut self,
        source_device: &str,
        keep_ids: &[String],
        local_updated_ms: i64,
    ) -> Result<u32> {
        let keep: std::collections::HashSet<&str> = keep_ids.iter().map(String::as_str).collect();
        let mut count = 0u32;
        let stale: Vec<Key> = self
            .store
            .contacts
            .iter()
            .filter(|((device, id), record)| {
                device == source_device && !record.deleted && !keep.contains(id.as_str())
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some(existing) = self.store.contacts.get_mut(&key) {
                existing.deleted = true;
                existing.local_updated_ms = local_updated_ms;
                count += 1;
            }
        }
        Ok(count)
    }

    fn get_sync_state(&self, source_device: &str) -> Result<Option<SyncState>> {
        Ok(self.store.sync_state.get(source_device).cloned())
    }

    fn set_sync_state(&mut self, source_device: &str, state: &SyncState) -> Result<()> {
        self.store
            .sync_state
            .insert(source_device.to_string(), state.clone());
        Ok(())
    }

    fn count_contacts(&self, source_device: &str) -> Result<u32> {
        Ok(self
            .store
            .contacts
            .iter()
            .filter(|((device, _), record)| device == source_device && !record.deleted)
            .count() as u32)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    fn record(id: &str, version: i64) -> ContactRecord {
        ContactRecord {
            source_device: "dev1".to_string(),
            external_contact_id: id.to_string(),
            display_name: format!("Contact {id}"),
            phones: vec![],
            emails: vec![],
            avatar_etag: None,
            source_version: version,
            source_last_modified_ms: version,
            local_updated_ms: version,
            deleted: false,
        }
    }

    #[test]
    fn rollback_on_drop_restores_prior_state() {
        let mut store = MemoryStore::new();
        {
            let mut tx = store.begin_transaction().unwrap();
            tx.upsert_contact(&record("c1", 1)).unwrap();
            tx.commit().unwrap();
        }
        {
            let mut tx = store.begin_transaction().unwrap();
            tx.upsert_contact(&record("c2", 1)).unwrap();
            // dropped without commit
        }
        assert_eq!(store.count_contacts("dev1").unwrap(), 1);
        assert!(store.get_contact("dev1", "c2").unwrap().is_none());
    }

    #[test]
    fn commit_persists_writes() {
        let mut store = MemoryStore::new();
        let mut tx = store.begin_transaction().unwrap();
        tx.upsert_contact(&record("c1", 1)).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.count_contacts("dev1").unwrap(), 1);
    }

    #[test]
    fn stale_write_is_ignored() {
        let mut store = MemoryStore::new();
        let mut tx = store.begin_transaction().unwrap();
        assert_eq!(
            tx.upsert_contact(&record("c1", 5)).unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            tx.upsert_contact(&record("c1", 1)).unwrap(),
            UpsertOutcome::StaleIgnored
        );
        tx.commit().unwrap();
        let stored = store.get_contact("dev1", "c1").unwrap().unwrap();
        assert_eq!(stored.source_version, 5);
    }
}
