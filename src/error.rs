//! Error taxonomy for the versioned object store.
//!
//! Every failure surfaced by the public API is a [`StoreError`]. The store
//! performs no silent retries: storage errors propagate and the enclosing
//! transaction rolls back in full. Notification-hook failures are the one
//! exception and are handled inside [`crate::events`], never here.

use thiserror::Error;
use uuid::Uuid;

use crate::models::EntityKind;

/// Result alias used across the crate.
pub type StoreResult<T> = Result<T, StoreError>;

/// Main error type for the store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Proposed attribute key is not registered for the entity's kind.
    /// Caller error, never retried automatically.
    #[error("attribute '{key}' is not registered for kind '{kind}'")]
    InvalidAttribute { kind: EntityKind, key: String },

    /// Value does not conform to any acceptable type for the key.
    #[error("attribute '{key}' accepts {expected}, got {found}")]
    TypeMismatch {
        key: String,
        expected: String,
        found: String,
    },

    /// Value shape is not supported by any registered codec.
    #[error("value cannot be serialized: {reason}")]
    UnserializableValue { reason: String },

    /// Attempt to accept/reject a change twice. Surfaced as a conflict;
    /// the caller should re-read state.
    #[error("change {change_id} has already been judged")]
    AlreadyJudged { change_id: Uuid },

    /// Merge across incompatible entity kinds.
    #[error("cannot merge a '{found}' into a '{expected}'")]
    KindMismatch {
        expected: EntityKind,
        found: EntityKind,
    },

    /// Id or key does not resolve.
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },

    /// Backing-store I/O error; the enclosing transaction is rolled back.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Stored value failed to encode/decode.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Blob-store I/O error.
    #[error("blob store error: {0}")]
    Blob(#[from] std::io::Error),
}

impl StoreError {
    /// Shorthand for a [`StoreError::NotFound`] with a uuid id.
    pub(crate) fn not_found(what: &'static str, id: Uuid) -> Self {
        StoreError::NotFound {
            what,
            id: id.to_string(),
        }
    }
}
