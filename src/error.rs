//! Failure kinds for the storage and codec layers.
//!
//! Read paths degrade to "no data" wherever possible; only writes and opens
//! surface errors to the caller. `Busy` is retried internally and never
//! escapes the storage layer under normal operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Transient contention on the underlying store; retryable.
    #[error("database is busy")]
    Busy,

    /// The requested key or metadata entry does not exist.
    #[error("key not found")]
    NotFound,

    /// A mutating call was issued against a read-only handle.
    #[error("storage opened read-only")]
    ReadOnly,

    /// The store cannot be opened or a commit failed terminally.
    #[error("storage failure: {0}")]
    Fatal(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => StorageError::NotFound,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                StorageError::Busy
            }
            other => StorageError::Fatal(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    Compress(String),

    /// The layer was configured with an empty dictionary.
    #[error("compression dictionary missing")]
    DictionaryMissing,

    /// The compressed frame does not carry a decoded-size hint.
    #[error("frame content size unknown")]
    FrameUnknownSize,

    /// Decompression failed; usually a foreign frame or the wrong dictionary.
    #[error("decompression failed (dictionary mismatch?): {0}")]
    DictionaryMismatch(String),

    /// The decoded payload failed a structural sanity check.
    #[error("corrupt unit payload: {0}")]
    Corrupt(&'static str),
}
