use thiserror::Error;

/// Error taxonomy for `fleet-store`, mapped at call sites onto the
/// discriminants of the external error taxonomy (§7).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("invalid or expired code")]
    InvalidCode,
    #[error("too many failed attempts")]
    TooManyAttempts,
    #[error("agent is not pending")]
    NotPending,
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}
