//! SQLite-backed store. Schema and transaction handling mirror the
//! reference bridge's `db.rs`: a singleton `sync_metadata`-style row per
//! source device, `INSERT ... ON CONFLICT DO UPDATE` upserts, and
//! `rusqlite::Transaction`'s own drop-rollback instead of a hand-rolled
//! guard.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::model::{ContactRecord, SyncState, UpsertOutcome};
use crate::store::{ContactStore, StoreTransaction};
use tracing::warn;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS contacts (
    source_device           TEXT NOT NULL,
    external_contact_id     TEXT NOT NULL,
    display_name            TEXT NOT NULL,
    phones_json             TEXT NOT NULL,
    emails_json             TEXT NOT NULL,
    avatar_etag             TEXT,
    source_version          INTEGER NOT NULL,
    source_last_modified_ms INTEGER NOT NULL,
    local_updated_ms        INTEGER NOT NULL,
    deleted                 INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (source_device, external_contact_id)
);

CREATE INDEX IF NOT EXISTS idx_contacts_device_name
    ON contacts (source_device, display_name);

CREATE TABLE IF NOT EXISTS sync_state (
    source_device               TEXT PRIMARY KEY,
    last_full_sync_ms           INTEGER NOT NULL,
    last_sync_token             TEXT,
    last_source_sync_sequence   INTEGER NOT NULL,
    cache_schema_version        INTEGER NOT NULL
);
";

fn to_store_error(e: rusqlite::Error) -> crate::error::Error {
    crate::error::Error::Store(StoreError::Sqlite(e))
}

fn row_to_contact(row: &rusqlite::Row) -> rusqlite::Result<ContactRecord> {
    let phones_json: String = row.get("phones_json")?;
    let emails_json: String = row.get("emails_json")?;
    let phones: Vec<String> = serde_json::from_str(&phones_json).unwrap_or_default();
    let emails: Vec<String> = serde_json::from_str(&emails_json).unwrap_or_default();
    Ok(ContactRecord {
        source_device: row.get("source_device")?,
        external_contact_id: row.get("external_contact_id")?,
        display_name: row.get("display_name")?,
        phones,
        emails,
        avatar_etag: row.get("avatar_etag")?,
        source_version: row.get("source_version")?,
        source_last_modified_ms: row.get("source_last_modified_ms")?,
        local_updated_ms: row.get("local_updated_ms")?,
        deleted: row.get::<_, i64>("deleted")? != 0,
    })
}

/// A [`ContactStore`] backed by a single `rusqlite` connection, following
/// the bundled-sqlite, no-system-dependency convention of the reference
/// bridge's own database layer.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if absent) a database file and run migrations.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(to_store_error)?;
        Self::from_connection(conn)
    }

    /// Open a private, non-persistent database — used by tests and by
    /// adapters that only need the cache for one process lifetime.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(to_store_error)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(to_store_error)?;
        Ok(Self { conn })
    }
}

impl ContactStore for SqliteStore {
    fn begin_transaction(&mut self) -> Result<Box<dyn StoreTransaction + '_>> {
        let tx = self.conn.transaction().map_err(to_store_error)?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    fn list_contacts(&self, source_device: &str) -> Result<Vec<ContactRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT * FROM contacts
                 WHERE source_device = ?1 AND deleted = 0
                 ORDER BY display_name, external_contact_id",
            )
            .map_err(to_store_error)?;
        let rows = stmt
            .query_map(params![source_device], row_to_contact)
            .map_err(to_store_error)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(to_store_error)?);
        }
        Ok(out)
    }

    fn get_contact(
        &self,
        source_device: &str,
        external_contact_id: &str,
    ) -> Result<Option<ContactRecord>> {
        self.conn
            .query_row(
                "SELECT * FROM contacts WHERE source_device = ?1 AND external_contact_id = ?2",
                params![source_device, external_contact_id],
                row_to_contact,
            )
            .optional()
            .map_err(to_store_error)
    }

    fn count_contacts(&self, source_device: &str) -> Result<u32> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM contacts WHERE source_device = ?1 AND deleted = 0",
                params![source_device],
                |row| row.get(0),
            )
            .map_err(to_store_error)?;
        Ok(count as u32)
    }

    fn get_sync_state(&self, source_device: &str) -> Result<Option<SyncState>> {
        self.conn
            .query_row(
                "SELECT last_full_sync_ms, last_sync_token, last_source_sync_sequence,
                        cache_schema_version
                 FROM sync_state WHERE source_device = ?1",
                params![source_device],
                |row| {
                    Ok(SyncState {
                        last_full_sync_ms: row.get(0)?,
                        last_sync_token: row.get(1)?,
                        last_source_sync_sequence: row.get(2)?,
                        cache_schema_version: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(to_store_error)
    }

    fn purge_deleted_before(&mut self, cutoff_ms: i64) -> Result<u32> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM contacts WHERE deleted = 1 AND local_updated_ms < ?1",
                params![cutoff_ms],
            )
            .map_err(to_store_error)?;
        if changed == 0 && cutoff_ms > 0 {
            warn!(cutoff_ms, "purge_deleted_before removed no rows");
        }
        Ok(changed as u32)
    }
}

/// An open SQLite transaction. Relies on `rusqlite::Transaction`'s own
/// `Drop` impl (`ROLLBACK` unless `commit`/`finish` was called) rather than
/// reimplementing rollback-on-drop.
pub struct SqliteTransaction<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl<'a> StoreTransaction for SqliteTransaction<'a> {
    fn upsert_contact(&mut self, record: &ContactRecord) -> Result<UpsertOutcome> {
        let existing = self
            .tx
            .query_row(
                "SELECT * FROM contacts WHERE source_device = ?1 AND external_contact_id = ?2",
                params![record.source_device, record.external_contact_id],
                row_to_contact,
            )
            .optional()
            .map_err(to_store_error)?;

        let outcome = match &existing {
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

        if !matches!(outcome, UpsertOutcome::Inserted | UpsertOutcome::Updated) {
            return Ok(outcome);
        }

        let phones_json = serde_json::to_string(&record.phones)
            .map_err(|e| crate::error::Error::Store(StoreError::Other(e.to_string())))?;
        let emails_json = serde_json::to_string(&record.emails)
            .map_err(|e| crate::error::Error::Store(StoreError::Other(e.to_string())))?;

        self.tx
            .execute(
                "INSERT INTO contacts (
                    source_device, external_contact_id, display_name, phones_json,
                    emails_json, avatar_etag, source_version, source_last_modified_ms,
                    local_updated_ms, deleted
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT (source_device, external_contact_id) DO UPDATE SET
                    display_name = excluded.display_name,
                    phones_json = excluded.phones_json,
                    emails_json = excluded.emails_json,
                    avatar_etag = excluded.avatar_etag,
                    source_version = excluded.source_version,
                    source_last_modified_ms = excluded.source_last_modified_ms,
                    local_updated_ms = excluded.local_updated_ms,
                    deleted = excluded.deleted",
                params![
                    record.source_device,
                    record.external_contact_id,
                    record.display_name,
                    phones_json,
                    emails_json,
                    record.avatar_etag,
                    record.source_version,
                    record.source_last_modified_ms,
                    record.local_updated_ms,
                    record.deleted as i64,
                ],
            )
            .map_err(to_store_error)?;

        Ok(outcome)
    }

    fn mark_deleted(
        &mut self,
        source_device: &str,
        external_contact_id: &str,
        local_updated_ms: i64,
    ) -> Result<bool> {
        let changed = self
            .tx
            .execute(
                "UPDATE contacts SET deleted = 1, local_updated_ms = ?3
                 WHERE source_device = ?1 AND external_contact_id = ?2 AND deleted = 0",
                params![source_device, external_contact_id, local_updated_ms],
            )
            .map_err(to_store_error)?;
        Ok(changed > 0)
    }

    fn delete_missing(
        &mut self,
        source_device: &str,
        keep_ids: &[String],
        local_updated_ms: i64,
    ) -> Result<u32> {
        let mut stmt = self
            .tx
            .prepare(
                "SELECT external_contact_id FROM contacts
                 WHERE source_device = ?1 AND deleted = 0",
            )
            .map_err(to_store_error)?;
        let all_ids: Vec<String> = stmt
            .query_map(params![source_device], |row| row.get(0))
            .map_err(to_store_error)?
            .collect::<rusqlite::Result<_>>()
            .map_err(to_store_error)?;
        drop(stmt);

        let keep: std::collections::HashSet<&str> = keep_ids.iter().map(String::as_str).collect();
        let mut count = 0u32;
        for id in all_ids {
            if !keep.contains(id.as_str()) {
                self.tx
                    .execute(
                        "UPDATE contacts SET deleted = 1, local_updated_ms = ?3
                         WHERE source_device = ?1 AND external_contact_id = ?2",
                        params![source_device, id, local_updated_ms],
                    )
                    .map_err(to_store_error)?;
                count += 1;
            }
        }
        Ok(count)
    }

    fn get_sync_state(&self, source_device: &str) -> Result<Option<SyncState>> {
        self.tx
            .query_row(
                "SELECT last_full_sync_ms, last_sync_token, last_source_sync_sequence,
                        cache_schema_version
                 FROM sync_state WHERE source_device = ?1",
                params![source_device],
                |row| {
                    Ok(SyncState {
                        last_full_sync_ms: row.get(0)?,
                        last_sync_token: row.get(1)?,
                        last_source_sync_sequence: row.get(2)?,
                        cache_schema_version: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(to_store_error)
    }

    fn set_sync_state(&mut self, source_device: &str, state: &SyncState) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO sync_state (
                    source_device, last_full_sync_ms, last_sync_token,
                    last_source_sync_sequence, cache_schema_version
                 ) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (source_device) DO UPDATE SET
                    last_full_sync_ms = excluded.last_full_sync_ms,
                    last_sync_token = excluded.last_sync_token,
                    last_source_sync_sequence = excluded.last_source_sync_sequence,
                    cache_schema_version = excluded.cache_schema_version",
                params![
                    source_device,
                    state.last_full_sync_ms,
                    state.last_sync_token,
                    state.last_source_sync_sequence,
                    state.cache_schema_version,
                ],
            )
            .map_err(to_store_error)?;
        Ok(())
    }

    fn count_contacts(&self, source_device: &str) -> Result<u32> {
        let count: i64 = self
            .tx
            .query_row(
                "SELECT COUNT(*) FROM contacts WHERE source_device = ?1 AND deleted = 0",
                params![source_device],
                |row| row.get(0),
            )
            .map_err(to_store_error)?;
        Ok(count as u32)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().map_err(to_store_error)
    }
}
