//! Bucket: the operation surface over one pair of files/chunks collections.
//!
//! A `Bucket` holds no state beyond its repositories and configuration, and
//! never caches descriptors or chunks between calls. Lookups (`get`) report a
//! missing file as `None`; data-moving operations fail with `NotFound`.

use crate::models::file::{FileDescriptor, FileKey, NewFile};
use crate::services::{
    error::{GridFsError, GridFsResult},
    modify, read,
    repository::{
        ChunkRepository, Collections, FileRepository, SqliteChunkRepository,
        SqliteFileRepository,
    },
    write,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;
use uuid::Uuid;

/// 255 KiB, which keeps a chunk record comfortably below common document limits.
pub const DEFAULT_CHUNK_SIZE: u32 = 255 * 1024;

/// Largest result the buffering reads will materialize.
pub const DEFAULT_MAX_BUFFERED_LEN: u64 = i32::MAX as u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketOptions {
    /// Chunk size for files created through this bucket. Existing files keep
    /// the chunk size they were written with.
    pub chunk_size: u32,

    /// `TooLarge` threshold for `read` and `read_range`.
    pub max_buffered_len: u64,
}

impl Default for BucketOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_buffered_len: DEFAULT_MAX_BUFFERED_LEN,
        }
    }
}

#[derive(Clone)]
pub struct Bucket {
    files: Arc<dyn FileRepository>,
    chunks: Arc<dyn ChunkRepository>,
    options: BucketOptions,
}

impl Bucket {
    pub fn new(
        files: Arc<dyn FileRepository>,
        chunks: Arc<dyn ChunkRepository>,
        options: BucketOptions,
    ) -> GridFsResult<Self> {
        if options.chunk_size == 0 {
            return Err(GridFsError::InvalidChunkSize(options.chunk_size));
        }
        Ok(Self {
            files,
            chunks,
            options,
        })
    }

    /// Open bucket `name` on SQLite, creating its collections if needed.
    pub async fn open_sqlite(
        db: Arc<SqlitePool>,
        name: &str,
        options: BucketOptions,
    ) -> GridFsResult<Self> {
        let collections = Collections::new(name)?;
        collections.ensure(&db).await?;
        debug!(
            "opened bucket `{}` ({} / {})",
            name, collections.files, collections.chunks
        );

        Self::new(
            Arc::new(SqliteFileRepository::new(db.clone(), &collections)),
            Arc::new(SqliteChunkRepository::new(db, &collections)),
            options,
        )
    }

    pub(crate) fn chunk_repository(&self) -> &dyn ChunkRepository {
        &*self.chunks
    }

    /// Fetch a descriptor, `None` when no file matches.
    pub async fn get(&self, key: impl Into<FileKey>) -> GridFsResult<Option<FileDescriptor>> {
        self.files.find(&key.into()).await
    }

    /// Remove a descriptor and its chunks; returns whether a descriptor existed.
    ///
    /// By id the chunk sweep runs even without a descriptor, which also clears
    /// chunks left by an interrupted write. By checksum nothing happens when no
    /// descriptor matches.
    pub async fn delete(&self, key: impl Into<FileKey>) -> GridFsResult<bool> {
        let key = key.into();
        let removed = self.files.delete(&key).await?;
        let file_id = match (&key, removed) {
            (_, Some(id)) => id,
            (FileKey::Id(id), None) => *id,
            (FileKey::Checksum(_), None) => return Ok(false),
        };

        let swept = self.chunks.delete_all(file_id).await?;
        debug!("deleted file {} and {} chunks", file_id, swept);
        Ok(removed.is_some())
    }

    /// Read a whole file into memory.
    pub async fn read(&self, key: impl Into<FileKey>) -> GridFsResult<Vec<u8>> {
        let key = key.into();
        let file = self.require(&key).await?;
        self.check_bufferable(&key, file.length)?;

        let mut buf = Vec::with_capacity(file.length as usize);
        read::read_file(&*self.chunks, &file, &mut buf).await?;
        Ok(buf)
    }

    /// Stream a whole file into `sink`, flushing after every chunk.
    pub async fn read_to<W>(&self, key: impl Into<FileKey>, sink: &mut W) -> GridFsResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let file = self.require(&key.into()).await?;
        read::read_file(&*self.chunks, &file, sink).await
    }

    /// Read `[offset, offset + size)` into memory. An empty range returns
    /// without touching the store.
    pub async fn read_range(
        &self,
        key: impl Into<FileKey>,
        offset: u64,
        size: u64,
    ) -> GridFsResult<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let key = key.into();
        let file = self.require(&key).await?;
        read::check_range(&file, &key, offset, size)?;
        self.check_bufferable(&key, size)?;

        let mut buf = Vec::with_capacity(size as usize);
        read::read_range(&*self.chunks, &file, offset, size, &mut buf).await?;
        Ok(buf)
    }

    /// Stream `[offset, offset + size)` into `sink`.
    pub async fn read_range_to<W>(
        &self,
        key: impl Into<FileKey>,
        offset: u64,
        size: u64,
        sink: &mut W,
    ) -> GridFsResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if size == 0 {
            return Ok(0);
        }
        let key = key.into();
        let file = self.require(&key).await?;
        read::check_range(&file, &key, offset, size)?;
        read::read_range(&*self.chunks, &file, offset, size, sink).await
    }

    /// Confirm every chunk of the file is stored at its expected size without
    /// moving any payload. Returns the descriptor so a caller can commit to
    /// streaming it.
    pub async fn verify(&self, key: impl Into<FileKey>) -> GridFsResult<FileDescriptor> {
        let file = self.require(&key.into()).await?;
        read::verify_file(&*self.chunks, &file).await?;
        Ok(file)
    }

    /// Like [`Bucket::verify`], restricted to the chunks `[offset, offset + size)` touches.
    pub async fn verify_range(
        &self,
        key: impl Into<FileKey>,
        offset: u64,
        size: u64,
    ) -> GridFsResult<FileDescriptor> {
        let key = key.into();
        let file = self.require(&key).await?;
        read::check_range(&file, &key, offset, size)?;
        read::verify_range(&*self.chunks, &file, offset, size).await?;
        Ok(file)
    }

    /// Create a file from an in-memory buffer.
    pub async fn write(&self, file: NewFile, data: &[u8]) -> GridFsResult<Uuid> {
        if data.len() as u64 > file.length {
            return Err(GridFsError::Overflow {
                filename: file.filename,
                length: file.length,
                read: data.len() as u64,
            });
        }
        let mut source = data;
        self.write_from(file, &mut source).await
    }

    /// Create a file from a byte stream.
    pub async fn write_from<R>(&self, file: NewFile, source: &mut R) -> GridFsResult<Uuid>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        write::write_file(
            &*self.files,
            &*self.chunks,
            self.options.chunk_size,
            file,
            source,
        )
        .await
    }

    /// Overwrite `data.len()` bytes at `offset`. Nothing is written unless the
    /// whole range fits in the file.
    pub async fn write_range(&self, id: Uuid, offset: u64, data: &[u8]) -> GridFsResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let key = FileKey::Id(id);
        let file = self.require(&key).await?;
        read::check_range(&file, &key, offset, data.len() as u64)?;

        let mut source = data;
        modify::write_range(&*self.chunks, &file, offset, &mut source).await?;
        Ok(())
    }

    /// Overwrite bytes at `offset` with everything `source` yields.
    pub async fn write_range_from<R>(
        &self,
        id: Uuid,
        offset: u64,
        source: &mut R,
    ) -> GridFsResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let file = self.require(&FileKey::Id(id)).await?;
        modify::write_range(&*self.chunks, &file, offset, source).await
    }

    async fn require(&self, key: &FileKey) -> GridFsResult<FileDescriptor> {
        self.files
            .find(key)
            .await?
            .ok_or_else(|| GridFsError::NotFound(key.clone()))
    }

    fn check_bufferable(&self, key: &FileKey, size: u64) -> GridFsResult<()> {
        if size > self.options.max_buffered_len {
            return Err(GridFsError::TooLarge {
                key: key.clone(),
                size,
                limit: self.options.max_buffered_len,
            });
        }
        Ok(())
    }
}
