//! Typed error enums for each subsystem boundary.
//!
//! Mirrors the taxonomy in the design: one `thiserror` enum per external
//! seam (blob adapter, store engine, sync client), structured fields over
//! bare strings, `#[non_exhaustive]` so new variants don't break callers.

use thiserror::Error;

use crate::validator::ValidationError;

/// Errors surfaced by a [`crate::blob::BlobAdapter`] implementation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlobError {
    /// The requested path does not exist.
    #[error("blob not found: {path}")]
    NotFound {
        /// The path that was requested.
        path: String,
    },

    /// The path failed normalization (traversal, control characters, etc).
    #[error("invalid blob path: {path}")]
    InvalidPath {
        /// The offending path.
        path: String,
    },

    /// The adapter's underlying backend failed.
    #[error("blob operation failed: {message}")]
    OperationFailed {
        /// A description of the failure.
        message: String,
    },
}

/// Errors surfaced by [`crate::store::Store`] operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The requested document id does not exist in the collection.
    #[error("document not found: {id}")]
    NotFound {
        /// The id that was requested.
        id: String,
    },

    /// The value failed schema validation; the write was aborted.
    #[error("schema validation failed for {id}: {errors:?}")]
    SchemaInvalid {
        /// The id that was being written.
        id: String,
        /// The validator's reported errors.
        errors: Vec<ValidationError>,
    },

    /// The blob adapter failed.
    #[error("store operation failed: {message}")]
    OperationFailed {
        /// A description of the failure.
        message: String,
    },

    /// A stored document failed to parse; it is excluded from `all()` and
    /// surfaced (rather than silently dropped) for direct `get()` lookups.
    #[error("corrupt document {id}: {reason}")]
    Corrupt {
        /// The id of the corrupt document.
        id: String,
        /// Why it failed to parse.
        reason: String,
    },
}

impl From<BlobError> for StoreError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound { path } => Self::OperationFailed {
                message: format!("blob not found: {path}"),
            },
            BlobError::InvalidPath { path } => Self::OperationFailed {
                message: format!("invalid path: {path}"),
            },
            BlobError::OperationFailed { message } => Self::OperationFailed { message },
        }
    }
}

/// Errors surfaced by [`crate::sync::SyncClient`] operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// The remote peer returned a non-2xx response.
    #[error("sync failed with status {status}: {message}")]
    SyncFailed {
        /// The HTTP status code.
        status: u16,
        /// The response body or reason phrase.
        message: String,
    },

    /// The request could not be sent, or the response body didn't parse.
    #[error("sync transport error: {0}")]
    Transport(String),

    /// The configured base URL (or a path joined onto it) is not a valid
    /// URL.
    #[error("invalid sync peer url: {0}")]
    InvalidUrl(String),

    /// The peers disagree on `BUCKET_COUNT` or otherwise speak incompatible
    /// protocol shapes.
    #[error("sync protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// The local store rejected merged data.
    #[error("sync store error: {0}")]
    Store(#[from] StoreError),
}
