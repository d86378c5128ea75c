//! Sync engine — applies full and delta batches from a single source
//! device to a [`ContactStore`], enforcing capacity limits and sequence
//! monotonicity and producing a [`SyncSummary`] tally.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::{
    CacheLimits, ContactRecord, NormalizedContact, RawContact, SyncMetadata, SyncState,
    SyncSummary, UpsertOutcome,
};
use crate::normalize;
use crate::store::{ContactStore, StoreTransaction};

/// Conflict-resolution rule shared by every backend's `upsert_contact`:
/// prefer the candidate over the stored row when its `source_version` is
/// strictly greater, or equal with a later or equal
/// `source_last_modified_ms` — otherwise the stored row wins and the write
/// is ignored as stale. Equal version and equal timestamp favors the
/// candidate, so re-applying the same batch is idempotent rather than a
/// no-op-vs-stale coin flip.
pub fn is_preferred(candidate: &ContactRecord, existing: &ContactRecord) -> bool {
    match candidate.source_version.cmp(&existing.source_version) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            candidate.source_last_modified_ms >= existing.source_last_modified_ms
        }
    }
}

/// Per §4.2, `UNCHANGED` is decided on exactly `{display_name, phones,
/// emails, avatar_etag, source_version, source_last_modified_ms}` with
/// `existing` not tombstoned — not on every `ContactRecord` field, which
/// would also compare `local_updated_ms` (always advancing) and `deleted`.
pub fn is_unchanged(candidate: &ContactRecord, existing: &ContactRecord) -> bool {
    !existing.deleted
        && existing.display_name == candidate.display_name
        && existing.phones == candidate.phones
        && existing.emails == candidate.emails
        && existing.avatar_etag == candidate.avatar_etag
        && existing.source_version == candidate.source_version
        && existing.source_last_modified_ms == candidate.source_last_modified_ms
}

/// Synchronizes one source device's contacts into a [`ContactStore`].
///
/// Generic over the store backend rather than boxed, since an adapter
/// always knows at construction time which of the two concrete backends it
/// wants — see [`crate::store::memory::MemoryStore`] and
/// [`crate::store::sqlite::SqliteStore`].
pub struct SyncEngine<S: ContactStore> {
    store: S,
    limits: CacheLimits,
    clock: Arc<dyn Clock>,
}

impl<S: ContactStore> SyncEngine<S> {
    pub fn new(store: S, limits: CacheLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            limits,
            clock,
        }
    }

    /// Borrow the underlying store for read-only operations — see
    /// [`crate::read::ContactReader`].
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply a complete snapshot from `source_device`: every contact
    /// currently live at the source is present in `contacts`. Any cached
    /// contact not named in the batch is tombstoned.
    ///
    /// Normalization is applied first; records failing it are dropped and
    /// counted in [`SyncSummary::invalid_dropped`], never failing the
    /// batch. Intra-batch duplicates (same `external_contact_id` more than
    /// once) are deduplicated in favor of the version [`is_preferred`]
    /// would choose, so applying a batch with duplicates yields the same
    /// end state as applying it with duplicates removed by the caller.
    pub fn apply_full_sync(
        &mut self,
        source_device: &str,
        contacts: &[RawContact],
        metadata: &SyncMetadata,
    ) -> Result<SyncSummary> {
        let source_device = normalize::normalize_source_device(source_device, &self.limits)?;
        let (normalized, invalid_dropped) = normalize_and_dedupe(contacts, &self.limits);
        let now_ms = self.clock.now_ms();

        if normalized.len() > self.limits.max_contacts_per_device as usize {
            return Err(Error::SyncRejected(format!(
                "batch of {} contacts exceeds max_contacts_per_device={}",
                normalized.len(),
                self.limits.max_contacts_per_device
            )));
        }

        let mut tx = self.store.begin_transaction()?;

        let prior_state = tx.get_sync_state(&source_device)?;
        check_sequence_monotonic(prior_state.as_ref(), metadata)?;

        let mut summary = SyncSummary {
            partial_snapshot: !metadata.complete_snapshot,
            ..Default::default()
        };
        summary.invalid_dropped = invalid_dropped;

        let mut kept_ids = Vec::with_capacity(normalized.len());
        for contact in &normalized {
            kept_ids.push(contact.external_contact_id.clone());
            let record = to_record(&source_device, contact, now_ms);
            tally(&mut summary, tx.upsert_contact(&record)?);
        }

        if metadata.complete_snapshot {
            let deleted = tx.delete_missing(&source_device, &kept_ids, now_ms)?;
            summary.deleted = deleted;
        }

        let new_state = SyncState {
            last_full_sync_ms: now_ms,
            last_sync_token: metadata.sync_token.clone(),
            last_source_sync_sequence: metadata.source_sync_sequence,
            cache_schema_version: crate::model::CACHE_SCHEMA_VERSION,
        };
        tx.set_sync_state(&source_device, &new_state)?;
        tx.commit()?;

        info!(
            source_device = %source_device,
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            invalid_dropped = summary.invalid_dropped,
            "full sync applied"
        );
        Ok(summary)
    }

    /// Apply an incremental batch: contacts present are upserts, and
    /// `deleted_ids` are tombstoned. Unlike full sync, contacts absent from
    /// both lists are left untouched.
    pub fn apply_delta_sync(
        &mut self,
        source_device: &str,
        contacts: &[RawContact],
        deleted_ids: &[String],
        metadata: &SyncMetadata,
    ) -> Result<SyncSummary> {
        let source_device = normalize::normalize_source_device(source_device, &self.limits)?;
        let (normalized, invalid_dropped) = normalize_and_dedupe(contacts, &self.limits);
        let deletion_ids = normalize_deletion_ids(deleted_ids, &normalized, &self.limits);
        let now_ms = self.clock.now_ms();

        let existing_count = self.store.count_contacts(&source_device)? as usize;
        if existing_count + normalized.len() > self.limits.max_contacts_per_device as usize {
            return Err(Error::SyncRejected(format!(
                "existing {existing_count} + incoming {} exceeds max_contacts_per_device={}",
                normalized.len(),
                self.limits.max_contacts_per_device
            )));
        }

        let mut tx = self.store.begin_transaction()?;

        let prior_state = tx.get_sync_state(&source_device)?;
        check_sequence_monotonic(prior_state.as_ref(), metadata)?;

        let mut summary = SyncSummary {
            partial_snapshot: true,
            ..Default::default()
        };
        summary.invalid_dropped = invalid_dropped;

        for contact in &normalized {
            let record = to_record(&source_device, contact, now_ms);
            tally(&mut summary, tx.upsert_contact(&record)?);
        }

        for id in &deletion_ids {
            if tx.mark_deleted(&source_device, id, now_ms)? {
                summary.deleted += 1;
            }
        }

        let new_state = SyncState {
            // Reference behavior: delta sync also stamps last_full_sync_ms
            // and always overwrites last_sync_token, even with None.
            last_full_sync_ms: now_ms,
            last_sync_token: metadata.sync_token.clone(),
            last_source_sync_sequence: metadata.source_sync_sequence,
            cache_schema_version: crate::model::CACHE_SCHEMA_VERSION,
        };
        tx.set_sync_state(&source_device, &new_state)?;
        tx.commit()?;

        debug!(
            source_device = %source_device,
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            "delta sync applied"
        );
        Ok(summary)
    }
}

fn to_record(source_device: &str, contact: &NormalizedContact, now_ms: i64) -> ContactRecord {
    ContactRecord {
        source_device: source_device.to_string(),
        external_contact_id: contact.external_contact_id.clone(),
        display_name: contact.display_name.clone(),
        phones: contact.phones.clone(),
        emails: contact.emails.clone(),
        avatar_etag: contact.avatar_etag.clone(),
        source_version: contact.source_version,
        source_last_modified_ms: contact.source_last_modified_ms,
        local_updated_ms: now_ms,
        deleted: false,
    }
}

/// Normalize every record, dropping invalid ones, then collapse
/// intra-batch duplicate `external_contact_id`s to the one [`is_preferred`]
/// would keep.
fn normalize_and_dedupe(
    contacts: &[RawContact],
    limits: &CacheLimits,
) -> (Vec<NormalizedContact>, u32) {
    let mut invalid_dropped = 0u32;
    let mut by_id: HashMap<String, NormalizedContact> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for raw in contacts {
        match normalize::normalize(raw, limits) {
            None => invalid_dropped += 1,
            Some(contact) => match by_id.get(&contact.external_contact_id) {
                None => {
                    order.push(contact.external_contact_id.clone());
                    by_id.insert(contact.external_contact_id.clone(), contact);
                }
                Some(current) => {
                    if preferred_normalized(&contact, current) {
                        by_id.insert(contact.external_contact_id.clone(), contact);
                    }
                }
            },
        }
    }

    let normalized = order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect();
    (normalized, invalid_dropped)
}

/// Trim each deletion id, drop blanks, truncate to `max_external_id_chars`,
/// dedupe preserving first-occurrence order, then drop any id that also
/// appears in the upsert set for this batch — an id upserted and deleted in
/// the same delta wins as an upsert.
fn normalize_deletion_ids(
    raw_ids: &[String],
    normalized_upserts: &[NormalizedContact],
    limits: &CacheLimits,
) -> Vec<String> {
    let upserted: std::collections::HashSet<&str> = normalized_upserts
        .iter()
        .map(|c| c.external_contact_id.as_str())
        .collect();

    let mut seen = std::collections::HashSet::new();
    let mut ids = Vec::new();
    for raw in raw_ids {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let truncated: String = if trimmed.chars().count() <= limits.max_external_id_chars {
            trimmed.to_string()
        } else {
            trimmed.chars().take(limits.max_external_id_chars).collect()
        };
        if upserted.contains(truncated.as_str()) {
            continue;
        }
        if seen.insert(truncated.clone()) {
            ids.push(truncated);
        }
    }
    ids
}

fn preferred_normalized(candidate: &NormalizedContact, existing: &NormalizedContact) -> bool {
    match candidate.source_version.cmp(&existing.source_version) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            candidate.source_last_modified_ms >= existing.source_last_modified_ms
        }
    }
}

/// Reject a batch whose `source_sync_sequence` regresses relative to the
/// stored state, unless the caller explicitly set
/// `allow_sequence_regression`. A non-positive sequence (including the
/// default when metadata is absent) opts out of the check entirely.
fn check_sequence_monotonic(prior: Option<&SyncState>, metadata: &SyncMetadata) -> Result<()> {
    if metadata.source_sync_sequence <= 0 {
        return Ok(());
    }
    if metadata.allow_sequence_regression {
        return Ok(());
    }
    if let Some(prior) = prior {
        if metadata.source_sync_sequence < prior.last_source_sync_sequence {
            return Err(Error::SyncRejected(format!(
                "source_sync_sequence {} regresses before last applied {}",
                metadata.source_sync_sequence, prior.last_source_sync_sequence
            )));
        }
    }
    Ok(())
}

fn tally(summary: &mut SyncSummary, outcome: UpsertOutcome) {
    match outcome {
        UpsertOutcome::Inserted => summary.inserted += 1,
        UpsertOutcome::Updated => summary.updated += 1,
        UpsertOutcome::Unchanged => summary.unchanged += 1,
        UpsertOutcome::StaleIgnored => summary.stale_ignored += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::memory::MemoryStore;

    fn engine(limits: CacheLimits) -> SyncEngine<MemoryStore> {
        SyncEngine::new(
            MemoryStore::new(),
            limits,
            Arc::new(FixedClock::new(1_000)),
        )
    }

    fn raw(id: &str, version: i64) -> RawContact {
        RawContact {
            external_contact_id: id.to_string(),
            display_name: format!("Contact {id}"),
            source_version: version,
            source_last_modified_ms: version,
            ..Default::default()
        }
    }

    #[test]
    fn full_sync_inserts_and_tombstones_missing() {
        let mut engine = engine(CacheLimits::default());
        let meta = SyncMetadata {
            complete_snapshot: true,
            ..Default::default()
        };
        let summary = engine
            .apply_full_sync("dev1", &[raw("a", 1), raw("b", 1)], &meta)
            .unwrap();
        assert_eq!(summary.inserted, 2);

        let summary = engine.apply_full_sync("dev1", &[raw("a", 2)], &meta).unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(engine.store().count_contacts("dev1").unwrap(), 1);
    }

    #[test]
    fn delta_sync_leaves_untouched_contacts_alone() {
        let mut engine = engine(CacheLimits::default());
        let meta = SyncMetadata::default();
        engine
            .apply_full_sync(
                "dev1",
                &[raw("a", 1), raw("b", 1)],
                &SyncMetadata {
                    complete_snapshot: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let summary = engine.apply_delta_sync("dev1", &[raw("a", 2)], &[], &meta).unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(engine.store().count_contacts("dev1").unwrap(), 2);
    }

    #[test]
    fn delta_sync_deletes_named_ids() {
        let mut engine = engine(CacheLimits::default());
        engine
            .apply_full_sync(
                "dev1",
                &[raw("a", 1)],
                &SyncMetadata {
                    complete_snapshot: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let summary = engine
            .apply_delta_sync("dev1", &[], &["a".to_string()], &SyncMetadata::default())
            .unwrap();
        assert_eq!(summary.deleted, 1);
        assert_eq!(engine.store().count_contacts("dev1").unwrap(), 0);
    }

    #[test]
    fn sequence_regression_is_rejected() {
        let mut engine = engine(CacheLimits::default());
        engine
            .apply_full_sync(
                "dev1",
                &[raw("a", 1)],
                &SyncMetadata {
                    source_sync_sequence: 5,
                    complete_snapshot: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let result = engine.apply_delta_sync(
            "dev1",
            &[raw("b", 1)],
            &[],
            &SyncMetadata {
                source_sync_sequence: 2,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(Error::SyncRejected(_))));
    }

    #[test]
    fn sequence_regression_allowed_with_override() {
        let mut engine = engine(CacheLimits::default());
        engine
            .apply_full_sync(
                "dev1",
                &[raw("a", 1)],
                &SyncMetadata {
                    source_sync_sequence: 5,
                    complete_snapshot: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let result = engine.apply_delta_sync(
            "dev1",
            &[raw("b", 1)],
            &[],
            &SyncMetadata {
                source_sync_sequence: 2,
                allow_sequence_regression: true,
                ..Default::default()
            },
        );
        assert!(result.is_ok());
    }

    #[test]
    fn oversized_full_batch_is_rejected() {
        let limits = CacheLimits {
            max_contacts_per_device: 2,
            ..CacheLimits::default()
        };
        let mut engine = engine(limits);
        let result = engine.apply_full_sync(
            "dev1",
            &[raw("a", 1), raw("b", 1), raw("c", 1)],
            &SyncMetadata {
                complete_snapshot: true,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(Error::SyncRejected(_))));
    }

    #[test]
    fn intra_batch_duplicates_dedupe_to_preferred_version() {
        let mut engine = engine(CacheLimits::default());
        let meta = SyncMetadata {
            complete_snapshot: true,
            ..Default::default()
        };
        let mut newer = raw("a", 2);
        newer.display_name = "Newer".to_string();
        let summary = engine
            .apply_full_sync("dev1", &[raw("a", 1), newer], &meta)
            .unwrap();
        assert_eq!(summary.inserted, 1);
        let stored = engine.store().get_contact("dev1", "a").unwrap().unwrap();
        assert_eq!(stored.display_name, "Newer");
    }

    #[test]
    fn cross_source_isolation() {
        let mut engine = engine(CacheLimits::default());
        let meta = SyncMetadata {
            complete_snapshot: true,
            ..Default::default()
        };
        engine.apply_full_sync("dev1", &[raw("a", 1)], &meta).unwrap();
        engine.apply_full_sync("dev2", &[raw("a", 1)], &meta).unwrap();
        assert_eq!(engine.store().count_contacts("dev1").unwrap(), 1);
        assert_eq!(engine.store().count_contacts("dev2").unwrap(), 1);
    }

    #[test]
    fn invalid_records_are_dropped_not_fatal() {
        let mut engine = engine(CacheLimits::default());
        let mut blank = raw("", 1);
        blank.external_contact_id = "   ".to_string();
        let summary = engine
            .apply_full_sync(
                "dev1",
                &[raw("a", 1), blank],
                &SyncMetadata {
                    complete_snapshot: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.invalid_dropped, 1);
    }

    #[test]
    fn unchanged_replay_under_an_advancing_clock_does_not_touch_local_updated_ms() {
        let clock = Arc::new(FixedClock::new(1_000));
        let mut engine = SyncEngine::new(MemoryStore::new(), CacheLimits::default(), clock.clone());
        let meta = SyncMetadata {
            complete_snapshot: true,
            ..Default::default()
        };
        engine.apply_full_sync("dev1", &[raw("a", 1)], &meta).unwrap();
        let first = engine.store().get_contact("dev1", "a").unwrap().unwrap();

        clock.advance(500);
        let summary = engine.apply_full_sync("dev1", &[raw("a", 1)], &meta).unwrap();
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.updated, 0);

        let second = engine.store().get_contact("dev1", "a").unwrap().unwrap();
        assert_eq!(first.local_updated_ms, second.local_updated_ms);
    }

    #[test]
    fn zero_sequence_does_not_trip_regression_check() {
        let mut engine = engine(CacheLimits::default());
        engine
            .apply_full_sync(
                "dev1",
                &[raw("a", 1)],
                &SyncMetadata {
                    source_sync_sequence: 10,
                    complete_snapshot: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let result = engine.apply_delta_sync("dev1", &[raw("b", 1)], &[], &SyncMetadata::default());
        assert!(result.is_ok());
    }
}
