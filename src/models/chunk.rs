//! Represents one chunk of a stored blob (the `<bucket>.chunks` record).

use crate::models::file::FileKey;
use crate::services::error::{GridFsError, GridFsResult};
use sqlx::FromRow;
use uuid::Uuid;

/// A contiguous piece of a file's payload, addressed by `(file_id, index)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Owning file. Not enforced as a foreign key by the store.
    pub file_id: Uuid,

    /// Zero-based chunk number.
    pub index: u64,

    /// Raw bytes; `chunk_size` long except for the file's last chunk.
    pub data: Vec<u8>,
}

impl ChunkRecord {
    pub fn new(file_id: Uuid, index: u64, data: Vec<u8>) -> Self {
        Self {
            file_id,
            index,
            data,
        }
    }
}

/// Row shape of the chunks collection.
#[derive(FromRow, Debug)]
pub(crate) struct ChunkRow {
    pub files_id: Uuid,
    pub n: i64,
    pub data: Vec<u8>,
}

impl TryFrom<ChunkRow> for ChunkRecord {
    type Error = GridFsError;

    fn try_from(row: ChunkRow) -> GridFsResult<Self> {
        let index = u64::try_from(row.n).map_err(|_| GridFsError::Corrupt {
            key: FileKey::Id(row.files_id),
            reason: format!("negative chunk index {}", row.n),
        })?;
        Ok(Self::new(row.files_id, index, row.data))
    }
}

/// Chunk indices are stored as SQLite integers. Indices never exceed
/// `length / chunk_size` and lengths fit in an `i64`, so only open-ended scan
/// bounds are clamped here.
pub(crate) fn sql_index(index: u64) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}
