//! Contact cache library — re-exports testable modules.
//!
//! A per-source-device, transactionally-consistent contact cache: the
//! [`normalize`] module turns untrusted source payloads into validated
//! records, [`store`] persists them behind a transaction boundary, and
//! [`engine`] drives full and incremental sync batches into the store
//! while enforcing capacity and ordering invariants. [`read`] is the
//! non-transactional path consumers use to query the cache.

pub mod clock;
pub mod engine;
pub mod error;
pub mod model;
pub mod normalize;
pub mod read;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::SyncEngine;
pub use error::{Error, Result, StoreError};
pub use model::{
    CacheLimits, ContactRecord, NormalizedContact, RawContact, SyncMetadata, SyncState,
    SyncSummary, UpsertOutcome,
};
pub use read::ContactReader;
pub use store::memory::MemoryStore;
pub use store::sqlite::SqliteStore;
pub use store::{ContactStore, StoreTransaction};
