//! Failure kinds surfaced by bucket operations.
//!
//! None of these are retried by the bucket. Every variant that concerns a
//! particular file names it, so a chunk-level inconsistency can be traced
//! without looking at the store.

use crate::models::file::FileKey;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridFsError {
    #[error("file [{0}] not found")]
    NotFound(FileKey),
    #[error("file [{key}] range offset={offset} size={size} out of range, length={length}")]
    OutOfRange {
        key: FileKey,
        offset: u64,
        size: u64,
        length: u64,
    },
    #[error("file [{filename}] payload of at least {read} bytes exceeds declared length {length}")]
    Overflow {
        filename: String,
        length: u64,
        read: u64,
    },
    #[error("file [{key}] size={size} exceeds buffer limit {limit}")]
    TooLarge { key: FileKey, size: u64, limit: u64 },
    #[error("file [{key}] not ready: {reason}")]
    Incomplete { key: FileKey, reason: String },
    #[error("file [{key}] corrupt: {reason}")]
    Corrupt { key: FileKey, reason: String },
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("chunk size must be positive, got {0}")]
    InvalidChunkSize(u32),
    #[error("worker task failed: {0}")]
    Worker(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Metadata(#[from] serde_json::Error),
}

pub type GridFsResult<T> = Result<T, GridFsError>;

impl GridFsError {
    pub(crate) fn incomplete(key: impl Into<FileKey>, reason: impl Into<String>) -> Self {
        Self::Incomplete {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
