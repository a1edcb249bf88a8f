//! Represents a stored blob's descriptor (the `<bucket>.files` record).

use crate::services::{
    error::{GridFsError, GridFsResult},
    layout::ChunkLayout,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{collections::BTreeMap, fmt};
use uuid::Uuid;

/// Caller-supplied metadata attached to a file. Key order is irrelevant.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Addresses a file either by its generated id or by its caller-supplied checksum.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FileKey {
    Id(Uuid),
    Checksum(String),
}

impl FileKey {
    pub fn checksum(md5: impl Into<String>) -> Self {
        Self::Checksum(md5.into())
    }
}

impl From<Uuid> for FileKey {
    fn from(id: Uuid) -> Self {
        Self::Id(id)
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKey::Id(id) => write!(f, "id={}", id),
            FileKey::Checksum(md5) => write!(f, "md5={}", md5),
        }
    }
}

/// A stored blob.
///
/// The descriptor only carries bookkeeping; the payload lives in the chunk
/// collection. `length` and `chunk_size` are fixed when the file is created
/// and never change afterwards, not even through ranged writes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileDescriptor {
    /// Identifier generated by the writer.
    pub id: Uuid,

    /// Declared total size in bytes.
    pub length: u64,

    /// Bytes per chunk for this file; every chunk but the last is this long.
    pub chunk_size: u32,

    /// When the descriptor was written.
    pub upload_date: DateTime<Utc>,

    /// Caller-supplied content hash. Stored as given, never verified.
    pub md5: String,

    /// Caller-supplied display name.
    pub filename: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl FileDescriptor {
    pub fn layout(&self) -> ChunkLayout {
        ChunkLayout::new(self.chunk_size, self.length)
    }
}

/// Everything a caller provides when creating a file.
#[derive(Clone, Debug, Default)]
pub struct NewFile {
    pub filename: String,
    pub md5: String,
    pub length: u64,
    pub metadata: Metadata,
}

impl NewFile {
    pub fn new(filename: impl Into<String>, md5: impl Into<String>, length: u64) -> Self {
        Self {
            filename: filename.into(),
            md5: md5.into(),
            length,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Row shape of the files collection. Column names are the on-disk contract.
#[derive(FromRow, Debug)]
pub(crate) struct FileRow {
    #[sqlx(rename = "_id")]
    pub id: Uuid,
    pub length: i64,
    #[sqlx(rename = "chunkSize")]
    pub chunk_size: i64,
    #[sqlx(rename = "uploadDate")]
    pub upload_date: DateTime<Utc>,
    pub md5: String,
    pub filename: String,
    pub metadata: Option<String>,
}

impl TryFrom<FileRow> for FileDescriptor {
    type Error = GridFsError;

    fn try_from(row: FileRow) -> GridFsResult<Self> {
        let key = FileKey::Id(row.id);
        let length = u64::try_from(row.length).map_err(|_| GridFsError::Corrupt {
            key: key.clone(),
            reason: format!("negative length {}", row.length),
        })?;
        let chunk_size = u32::try_from(row.chunk_size)
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| GridFsError::Corrupt {
                key: key.clone(),
                reason: format!("invalid chunk size {}", row.chunk_size),
            })?;
        let metadata = match row.metadata.as_deref() {
            None => Metadata::new(),
            Some(raw) => serde_json::from_str(raw).map_err(|err| GridFsError::Corrupt {
                key,
                reason: format!("metadata is not a JSON object: {}", err),
            })?,
        };

        Ok(Self {
            id: row.id,
            length,
            chunk_size,
            upload_date: row.upload_date,
            md5: row.md5,
            filename: row.filename,
            metadata,
        })
    }
}

/// Encode metadata for the `metadata` column; an empty map is stored as NULL.
pub(crate) fn encode_metadata(metadata: &Metadata) -> GridFsResult<Option<String>> {
    if metadata.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(metadata)?))
}
