use thiserror::Error;

/// Error surface of the core engine.
///
/// Low-level OS errors wrap into one of these at the component boundary;
/// raw OS messages never leak through the command API.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A path escapes its library root. Never retried.
    #[error("path escapes library root: {0}")]
    PathUnsafe(String),

    /// A semantic pre-check failed (exists / not exists / wrong kind).
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// The journal append could not be made durable. The operation must be
    /// considered not to have occurred.
    #[error("CRITICAL: journal write failed; operation ABORTED: {0}")]
    JournalWrite(#[source] std::io::Error),

    /// A filesystem call failed during commit. Partial filesystem state is
    /// possible; rollback is the caller's responsibility.
    #[error("operation failed: {0}")]
    OperationFailed(String),

    /// Reversal of a committed or prepared operation failed. The journal
    /// keeps the transaction visible for manual inspection.
    #[error("rollback failed: {0}")]
    RollbackFailed(String),

    /// Boot-time recovery failed; the read-only fuse has been engaged.
    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    /// Canonicalization found the external alias claimed by a different
    /// canonical entity. Never auto-resolved.
    #[error(
        "identity link conflict: {source_type}:{external_id} already belongs to canonical {existing_canonical_id}"
    )]
    Conflict {
        source_type: String,
        external_id: String,
        existing_canonical_id: String,
    },

    /// A scan or long-running job was cancelled; safe to ignore.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// The doomsday fuse is engaged: writes are rejected until an operator
    /// intervenes. Retryable from the caller's point of view.
    #[error("service is read-only after a recovery failure; writes are disabled")]
    ReadOnly,

    #[error("not found: {0}")]
    NotFound(String),

    /// An API was used out of order (e.g. commit before prepare).
    #[error("invalid transaction state: {0}")]
    InvalidState(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] galdex_model::ModelError),

    #[error("catalog error: {0}")]
    Catalog(#[from] galdex_contracts::catalog::CatalogError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
