//! Data model — contact records, sync state, and the types that flow
//! between the Normalizer, the Transactional Store, and the Sync Engine.

use serde::{Deserialize, Serialize};

/// A raw contact payload as handed to the engine by a source adapter.
///
/// No field here is trusted: the Normalizer trims, truncates, and validates
/// every value before it ever reaches the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawContact {
    pub external_contact_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub phones: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub avatar_etag: Option<String>,
    #[serde(default)]
    pub source_version: i64,
    #[serde(default)]
    pub source_last_modified_ms: i64,
}

/// The output of `Normalizer::normalize` — a `RawContact` that has passed
/// validation and had every field trimmed, truncated, and deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedContact {
    pub external_contact_id: String,
    pub display_name: String,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
    pub avatar_etag: Option<String>,
    pub source_version: i64,
    pub source_last_modified_ms: i64,
}

/// A cache row, uniquely identified by `(source_device, external_contact_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub source_device: String,
    pub external_contact_id: String,
    pub display_name: String,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
    pub avatar_etag: Option<String>,
    pub source_version: i64,
    pub source_last_modified_ms: i64,
    pub local_updated_ms: i64,
    pub deleted: bool,
}

/// Per-`source_device` sync bookkeeping row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub last_full_sync_ms: i64,
    pub last_sync_token: Option<String>,
    pub last_source_sync_sequence: i64,
    pub cache_schema_version: i64,
}

/// The fixed schema version this crate writes. Monotonic; upgrades are
/// additive only (new indexes), per §6.
pub const CACHE_SCHEMA_VERSION: i64 = 1;

/// The closed set of outcomes `StoreTransaction::upsert_contact` can
/// return. Callers are expected to match on this exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
    StaleIgnored,
}

/// Per-sync metadata supplied alongside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub sync_token: Option<String>,
    pub source_sync_sequence: i64,
    /// Full sync only; ignored by delta sync.
    pub complete_snapshot: bool,
    pub allow_sequence_regression: bool,
}

impl Default for SyncMetadata {
    fn default() -> Self {
        Self {
            sync_token: None,
            source_sync_sequence: 0,
            complete_snapshot: false,
            allow_sequence_regression: false,
        }
    }
}

/// Tally returned by `apply_full_sync` / `apply_delta_sync`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub inserted: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub deleted: u32,
    pub stale_ignored: u32,
    pub invalid_dropped: u32,
    pub partial_snapshot: bool,
}

/// Immutable, construction-time configuration. No dynamic reconfiguration;
/// a new `SyncEngine` is built when limits change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_contacts_per_device: u32,
    pub max_phones_per_contact: usize,
    pub max_emails_per_contact: usize,
    pub max_display_name_chars: usize,
    pub max_phone_chars: usize,
    pub max_email_chars: usize,
    pub max_source_device_chars: usize,
    pub max_external_id_chars: usize,
}

/// Cap applied to every `avatar_etag`, per §3 ("optional opaque tag, ≤ 128
/// chars"). Not configurable via `CacheLimits` — the distilled spec gives it
/// as a fixed constant rather than a §6 field.
pub const MAX_AVATAR_ETAG_CHARS: usize = 128;

impl Default for CacheLimits {
    /// Production defaults from §6.
    fn default() -> Self {
        Self {
            max_contacts_per_device: 50_000,
            max_phones_per_contact: 20,
            max_emails_per_contact: 20,
            max_display_name_chars: 256,
            max_phone_chars: 64,
            max_email_chars: 320,
            max_source_device_chars: 128,
            max_external_id_chars: 128,
        }
    }
}
