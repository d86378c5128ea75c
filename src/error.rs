//! Error taxonomy — four closed kinds, matched exhaustively by callers.

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error kind returned by every public operation.
///
/// Invalid individual contact records are *not* represented here — the
/// normalizer silently drops them and counts them in
/// [`crate::model::SyncSummary::invalid_dropped`] instead, so a batch
/// containing some garbage still makes progress.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller-provided argument violates a precondition (e.g. a blank
    /// `source_device`). Always fails synchronously before any state change.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The engine refuses the batch due to a policy violation: capacity
    /// exceeded, or a sequence regression without an explicit override.
    /// Raised before opening the transaction when possible, always before
    /// commit.
    #[error("sync rejected: {0}")]
    SyncRejected(String),

    /// The underlying persistence layer failed. The transaction has been
    /// aborted by the time this reaches the caller.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// API misuse indicating a bug in the caller, not a runtime condition —
    /// should not be caught for recovery. The store trait's shape makes the
    /// two conditions the distilled spec names here (writes outside a
    /// transaction, nested transactions) unrepresentable at compile time;
    /// this variant remains for backends that must still surface
    /// driver-level misuse defensively.
    #[error("programming error: {0}")]
    Programming(String),
}

/// Failure modes specific to a [`crate::store::ContactStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}
