//! Transactional store contract. A [`ContactStore`] opens
//! [`StoreTransaction`]s; all mutation happens through the transaction
//! handle, never directly on the store. Because the only way to obtain a
//! `StoreTransaction` is `ContactStore::begin_transaction(&mut self)`, the
//! borrow checker statically rules out two classes of bug the distilled
//! spec calls out as runtime errors elsewhere: writing outside a
//! transaction (there is no write method on `ContactStore` itself) and
//! nested transactions (a second `begin_transaction` call cannot be made
//! while the first transaction's exclusive borrow of `&mut self` is still
//! live).

pub mod memory;
pub mod sqlite;

use crate::error::Result;
use crate::model::{ContactRecord, SyncState, UpsertOutcome};

/// A persistence backend for the contact cache.
///
/// Implementations must provide snapshot isolation for the lifetime of a
/// single transaction: reads inside a transaction see a consistent view
/// unaffected by concurrent writers, and no partial effects of an aborted
/// transaction are ever observable.
pub trait ContactStore {
    /// Open a new transaction. Dropping the returned handle without calling
    /// `commit` rolls back every write made through it.
    fn begin_transaction(&mut self) -> Result<Box<dyn StoreTransaction + '_>>;

    /// Read path: all live (non-deleted) contacts for one source device,
    /// ordered by `display_name` then `external_contact_id` for a stable
    /// iteration order.
    fn list_contacts(&self, source_device: &str) -> Result<Vec<ContactRecord>>;

    /// Read path: a single contact by its compound key, including
    /// tombstoned (deleted) rows.
    fn get_contact(
        &self,
        source_device: &str,
        external_contact_id: &str,
    ) -> Result<Option<ContactRecord>>;

    /// Count of live (non-deleted) contacts currently cached for a device.
    fn count_contacts(&self, source_device: &str) -> Result<u32>;

    /// Read path / pre-transaction check: sync bookkeeping for a device as
    /// of the last commit. Does not require an open transaction.
    fn get_sync_state(&self, source_device: &str) -> Result<Option<SyncState>>;

    /// Permanently remove every tombstoned row with `local_updated_ms <
    /// cutoff_ms`, across all source devices. Unlike every other mutation,
    /// this may run outside a transaction: a purge that is interrupted
    /// partway simply leaves some additional tombstones physically present,
    /// which is harmless and will be swept by the next purge.
    fn purge_deleted_before(&mut self, cutoff_ms: i64) -> Result<u32>;
}

/// An open, uncommitted transaction against a [`ContactStore`].
///
/// All methods operate within the transaction's isolated view. Nothing is
/// durable until [`StoreTransaction::commit`] is called; the implementation
/// must guarantee rollback on drop otherwise.
pub trait StoreTransaction {
    /// Insert or update a single contact row by `(source_device,
    /// external_contact_id)`, applying the store's own conflict-resolution
    /// rule (see [`crate::engine`]'s `is_preferred`) and returning which
    /// branch was taken.
    fn upsert_contact(&mut self, record: &ContactRecord) -> Result<UpsertOutcome>;

    /// Mark a contact as deleted (tombstone) rather than physically
    /// removing its row. Unlike `upsert_contact`, this is unconditional:
    /// an explicit deletion always wins over whatever version is stored,
    /// so it returns whether a non-tombstoned row existed to flip rather
    /// than a version-conflict outcome. A second call on an
    /// already-tombstoned row is a no-op returning `false`.
    fn mark_deleted(
        &mut self,
        source_device: &str,
        external_contact_id: &str,
        local_updated_ms: i64,
    ) -> Result<bool>;

    /// Tombstone every live contact for `source_device` whose
    /// `external_contact_id` is not in `keep_ids`. Used by full-sync
    /// reconciliation against a complete snapshot.
    fn delete_missing(
        &mut self,
        source_device: &str,
        keep_ids: &[String],
        local_updated_ms: i64,
    ) -> Result<u32>;

    /// Read sync bookkeeping for a device within this transaction's view.
    /// Lives on the transaction (not on [`ContactStore`]) so the engine can
    /// check sequence monotonicity against the same isolated snapshot it is
    /// about to write into, without a second, separately-borrowed read.
    fn get_sync_state(&self, source_device: &str) -> Result<Option<SyncState>>;

    /// Replace the sync bookkeeping row for a device.
    fn set_sync_state(&mut self, source_device: &str, state: &SyncState) -> Result<()>;

    /// Count of live contacts for a device as of this transaction's view —
    /// used for the capacity precheck before admitting new rows.
    fn count_contacts(&self, source_device: &str) -> Result<u32>;

    /// Make every write in this transaction durable. Consumes the handle so
    /// a committed transaction cannot be reused or rolled back afterward.
    fn commit(self: Box<Self>) -> Result<()>;
}
