//! Read path — a thin, allocation-free wrapper over a [`ContactStore`] that
//! never opens a transaction, so lookups never contend with an in-flight
//! sync.

use crate::error::Result;
use crate::model::{ContactRecord, SyncState};
use crate::store::ContactStore;

/// Read-only view over one backend. Borrowing `&S` rather than `&mut S`
/// means a `ContactReader` can be held concurrently with callers that only
/// read, while a sync in progress (which needs `&mut`) simply cannot be
/// started until every outstanding reader is dropped — enforced by the
/// borrow checker rather than a runtime lock.
pub struct ContactReader<'a, S: ContactStore> {
    store: &'a S,
}

impl<'a, S: ContactStore> ContactReader<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// All live contacts for a device, ordered by display name.
    pub fn list_contacts(&self, source_device: &str) -> Result<Vec<ContactRecord>> {
        self.store.list_contacts(source_device)
    }

    /// A single contact, including tombstoned rows, or `None` if the id has
    /// never been seen for this device.
    pub fn get_contact(
        &self,
        source_device: &str,
        external_contact_id: &str,
    ) -> Result<Option<ContactRecord>> {
        self.store.get_contact(source_device, external_contact_id)
    }

    /// Count of live contacts cached for a device.
    pub fn count_contacts(&self, source_device: &str) -> Result<u32> {
        self.store.count_contacts(source_device)
    }

    /// Sync bookkeeping for a device, as of the last commit.
    pub fn get_sync_state(&self, source_device: &str) -> Result<Option<SyncState>> {
        self.store.get_sync_state(source_device)
    }

    /// All live contacts for a device with `display_name` starting with
    /// `prefix` (case-insensitive), truncated to `limit` results when
    /// `limit > 0`.
    pub fn list_contacts_by_prefix(
        &self,
        source_device: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<ContactRecord>> {
        let prefix_lower = prefix.to_lowercase();
        let mut matches: Vec<ContactRecord> = self
            .store
            .list_contacts(source_device)?
            .into_iter()
            .filter(|c| c.display_name.to_lowercase().starts_with(&prefix_lower))
            .collect();
        if limit > 0 {
            matches.truncate(limit);
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn reads_through_to_store() {
        let store = MemoryStore::new();
        let reader = ContactReader::new(&store);
        assert_eq!(reader.count_contacts("dev1").unwrap(), 0);
        assert!(reader.list_contacts("dev1").unwrap().is_empty());
    }
}
