//! Persistence seam for a bucket's two collections.
//!
//! The algorithms only need a handful of document-store primitives (insert,
//! find one, ordered range scan, upsert, delete). They are expressed as the
//! [`FileRepository`] and [`ChunkRepository`] traits and implemented here on
//! SQLite, one table per collection named `<bucket>.files` / `<bucket>.chunks`.

use crate::models::{
    chunk::{ChunkRecord, ChunkRow, sql_index},
    file::{FileDescriptor, FileKey, FileRow, encode_metadata},
};
use crate::services::error::{GridFsError, GridFsResult};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::{ops::RangeInclusive, sync::Arc};
use tracing::debug;
use uuid::Uuid;

const BUCKET_NAME_MAX_LEN: usize = 64;

/// Descriptor storage.
#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn insert(&self, file: &FileDescriptor) -> GridFsResult<()>;

    async fn find(&self, key: &FileKey) -> GridFsResult<Option<FileDescriptor>>;

    /// Remove at most one descriptor matching `key`, returning its id.
    async fn delete(&self, key: &FileKey) -> GridFsResult<Option<Uuid>>;
}

/// Chunk storage keyed by `(file_id, index)`.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    async fn insert(&self, chunk: &ChunkRecord) -> GridFsResult<()>;

    async fn find(&self, file_id: Uuid, index: u64) -> GridFsResult<Option<ChunkRecord>>;

    /// Up to `limit` chunks of `file_id` whose index falls in `indices`,
    /// ascending by index. The page is fully fetched before it is returned.
    async fn scan(
        &self,
        file_id: Uuid,
        indices: RangeInclusive<u64>,
        limit: u64,
    ) -> GridFsResult<Vec<ChunkRecord>>;

    /// `(index, stored byte count)` of every chunk in `indices`, ascending,
    /// without loading any payload.
    async fn lengths(
        &self,
        file_id: Uuid,
        indices: RangeInclusive<u64>,
    ) -> GridFsResult<Vec<(u64, usize)>>;

    /// Replace the chunk at `(file_id, index)`, inserting it if absent.
    async fn upsert(&self, chunk: &ChunkRecord) -> GridFsResult<()>;

    /// Remove every chunk of `file_id`, returning how many were removed.
    async fn delete_all(&self, file_id: Uuid) -> GridFsResult<u64>;
}

/// Table names of one bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collections {
    pub files: String,
    pub chunks: String,
}

impl Collections {
    /// Validate `bucket` and derive its collection names.
    ///
    /// Names are spliced into SQL as quoted identifiers, so only ASCII
    /// letters, digits, `_` and `-` are accepted.
    pub fn new(bucket: &str) -> GridFsResult<Self> {
        if bucket.is_empty() || bucket.len() > BUCKET_NAME_MAX_LEN {
            return Err(GridFsError::InvalidBucketName {
                name: bucket.to_string(),
                reason: format!("must be between 1 and {} characters", BUCKET_NAME_MAX_LEN),
            });
        }
        if !bucket
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        {
            return Err(GridFsError::InvalidBucketName {
                name: bucket.to_string(),
                reason: "allowed characters are letters, digits, underscores, and hyphens".into(),
            });
        }
        Ok(Self {
            files: format!("{}.files", bucket),
            chunks: format!("{}.chunks", bucket),
        })
    }

    /// Create both tables and the checksum index if they do not exist yet.
    pub async fn ensure(&self, db: &SqlitePool) -> GridFsResult<()> {
        let statements = [
            format!(
                r#"CREATE TABLE IF NOT EXISTS "{files}" (
                    _id BLOB PRIMARY KEY NOT NULL,
                    length INTEGER NOT NULL,
                    chunkSize INTEGER NOT NULL,
                    uploadDate TEXT NOT NULL,
                    md5 TEXT NOT NULL,
                    filename TEXT NOT NULL,
                    metadata TEXT
                )"#,
                files = self.files
            ),
            format!(
                r#"CREATE INDEX IF NOT EXISTS "{files}_md5" ON "{files}" (md5)"#,
                files = self.files
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS "{chunks}" (
                    files_id BLOB NOT NULL,
                    n INTEGER NOT NULL,
                    data BLOB NOT NULL,
                    PRIMARY KEY (files_id, n)
                )"#,
                chunks = self.chunks
            ),
        ];

        for stmt in statements {
            debug!("Executing schema SQL: {}", stmt);
            sqlx::query(&stmt).execute(db).await?;
        }
        Ok(())
    }
}

/// `<bucket>.files` on SQLite. Statements are rendered once per bucket.
pub struct SqliteFileRepository {
    db: Arc<SqlitePool>,
    insert_sql: String,
    find_by_id_sql: String,
    find_by_md5_sql: String,
    delete_by_id_sql: String,
    delete_by_md5_sql: String,
}

impl SqliteFileRepository {
    pub fn new(db: Arc<SqlitePool>, collections: &Collections) -> Self {
        let table = &collections.files;
        let columns = "_id, length, chunkSize, uploadDate, md5, filename, metadata";
        Self {
            db,
            insert_sql: format!(
                r#"INSERT INTO "{table}" ({columns}) VALUES (?, ?, ?, ?, ?, ?, ?)"#
            ),
            find_by_id_sql: format!(r#"SELECT {columns} FROM "{table}" WHERE _id = ?"#),
            find_by_md5_sql: format!(
                r#"SELECT {columns} FROM "{table}" WHERE md5 = ? ORDER BY rowid LIMIT 1"#
            ),
            delete_by_id_sql: format!(r#"DELETE FROM "{table}" WHERE _id = ? RETURNING _id"#),
            delete_by_md5_sql: format!(
                r#"DELETE FROM "{table}"
                   WHERE _id = (SELECT _id FROM "{table}" WHERE md5 = ? ORDER BY rowid LIMIT 1)
                   RETURNING _id"#
            ),
        }
    }
}

#[async_trait]
impl FileRepository for SqliteFileRepository {
    async fn insert(&self, file: &FileDescriptor) -> GridFsResult<()> {
        let length = i64::try_from(file.length).map_err(|_| GridFsError::TooLarge {
            key: FileKey::Id(file.id),
            size: file.length,
            limit: i64::MAX as u64,
        })?;

        sqlx::query(&self.insert_sql)
            .bind(file.id)
            .bind(length)
            .bind(i64::from(file.chunk_size))
            .bind(file.upload_date)
            .bind(&file.md5)
            .bind(&file.filename)
            .bind(encode_metadata(&file.metadata)?)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn find(&self, key: &FileKey) -> GridFsResult<Option<FileDescriptor>> {
        let query = match key {
            FileKey::Id(id) => sqlx::query_as::<_, FileRow>(&self.find_by_id_sql).bind(*id),
            FileKey::Checksum(md5) => {
                sqlx::query_as::<_, FileRow>(&self.find_by_md5_sql).bind(md5.as_str())
            }
        };

        query
            .fetch_optional(&*self.db)
            .await?
            .map(FileDescriptor::try_from)
            .transpose()
    }

    async fn delete(&self, key: &FileKey) -> GridFsResult<Option<Uuid>> {
        let query = match key {
            FileKey::Id(id) => sqlx::query_scalar::<_, Uuid>(&self.delete_by_id_sql).bind(*id),
            FileKey::Checksum(md5) => {
                sqlx::query_scalar::<_, Uuid>(&self.delete_by_md5_sql).bind(md5.as_str())
            }
        };
        Ok(query.fetch_optional(&*self.db).await?)
    }
}

/// `<bucket>.chunks` on SQLite.
pub struct SqliteChunkRepository {
    db: Arc<SqlitePool>,
    insert_sql: String,
    find_sql: String,
    scan_sql: String,
    lengths_sql: String,
    upsert_sql: String,
    delete_all_sql: String,
}

impl SqliteChunkRepository {
    pub fn new(db: Arc<SqlitePool>, collections: &Collections) -> Self {
        let table = &collections.chunks;
        Self {
            db,
            insert_sql: format!(r#"INSERT INTO "{table}" (files_id, n, data) VALUES (?, ?, ?)"#),
            find_sql: format!(
                r#"SELECT files_id, n, data FROM "{table}" WHERE files_id = ? AND n = ?"#
            ),
            scan_sql: format!(
                r#"SELECT files_id, n, data FROM "{table}"
                   WHERE files_id = ? AND n BETWEEN ? AND ?
                   ORDER BY n ASC
                   LIMIT ?"#
            ),
            lengths_sql: format!(
                r#"SELECT n, length(data) FROM "{table}"
                   WHERE files_id = ? AND n BETWEEN ? AND ?
                   ORDER BY n ASC"#
            ),
            upsert_sql: format!(
                r#"INSERT INTO "{table}" (files_id, n, data) VALUES (?, ?, ?)
                   ON CONFLICT(files_id, n) DO UPDATE SET data = excluded.data"#
            ),
            delete_all_sql: format!(r#"DELETE FROM "{table}" WHERE files_id = ?"#),
        }
    }
}

#[async_trait]
impl ChunkRepository for SqliteChunkRepository {
    async fn insert(&self, chunk: &ChunkRecord) -> GridFsResult<()> {
        sqlx::query(&self.insert_sql)
            .bind(chunk.file_id)
            .bind(sql_index(chunk.index))
            .bind(chunk.data.as_slice())
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn find(&self, file_id: Uuid, index: u64) -> GridFsResult<Option<ChunkRecord>> {
        sqlx::query_as::<_, ChunkRow>(&self.find_sql)
            .bind(file_id)
            .bind(sql_index(index))
            .fetch_optional(&*self.db)
            .await?
            .map(ChunkRecord::try_from)
            .transpose()
    }

    async fn scan(
        &self,
        file_id: Uuid,
        indices: RangeInclusive<u64>,
        limit: u64,
    ) -> GridFsResult<Vec<ChunkRecord>> {
        sqlx::query_as::<_, ChunkRow>(&self.scan_sql)
            .bind(file_id)
            .bind(sql_index(*indices.start()))
            .bind(sql_index(*indices.end()))
            .bind(sql_index(limit))
            .fetch_all(&*self.db)
            .await?
            .into_iter()
            .map(ChunkRecord::try_from)
            .collect()
    }

    async fn lengths(
        &self,
        file_id: Uuid,
        indices: RangeInclusive<u64>,
    ) -> GridFsResult<Vec<(u64, usize)>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(&self.lengths_sql)
            .bind(file_id)
            .bind(sql_index(*indices.start()))
            .bind(sql_index(*indices.end()))
            .fetch_all(&*self.db)
            .await?;

        rows.into_iter()
            .map(|(n, len)| {
                let index = u64::try_from(n).map_err(|_| GridFsError::Corrupt {
                    key: FileKey::Id(file_id),
                    reason: format!("negative chunk index {}", n),
                })?;
                Ok((index, usize::try_from(len).unwrap_or(0)))
            })
            .collect()
    }

    async fn upsert(&self, chunk: &ChunkRecord) -> GridFsResult<()> {
        sqlx::query(&self.upsert_sql)
            .bind(chunk.file_id)
            .bind(sql_index(chunk.index))
            .bind(chunk.data.as_slice())
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn delete_all(&self, file_id: Uuid) -> GridFsResult<u64> {
        let result = sqlx::query(&self.delete_all_sql)
            .bind(file_id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::memory_pool;
    use chrono::Utc;

    async fn repos() -> (SqliteFileRepository, SqliteChunkRepository) {
        let db = memory_pool().await;
        let collections = Collections::new("fs").unwrap();
        collections.ensure(&db).await.unwrap();
        (
            SqliteFileRepository::new(db.clone(), &collections),
            SqliteChunkRepository::new(db, &collections),
        )
    }

    fn descriptor(md5: &str) -> FileDescriptor {
        FileDescriptor {
            id: Uuid::new_v4(),
            length: 3,
            chunk_size: 2,
            upload_date: Utc::now(),
            md5: md5.into(),
            filename: "a.txt".into(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_bucket_name_validation() {
        let collections = Collections::new("photos").unwrap();
        assert_eq!(collections.files, "photos.files");
        assert_eq!(collections.chunks, "photos.chunks");
        assert!(Collections::new("").is_err());
        assert!(Collections::new("a\"b").is_err());
        assert!(Collections::new(&"x".repeat(65)).is_err());
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let db = memory_pool().await;
        let collections = Collections::new("fs").unwrap();
        collections.ensure(&db).await.unwrap();
        collections.ensure(&db).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_insert_find_delete() {
        let (files, _) = repos().await;
        let desc = descriptor("aa");
        files.insert(&desc).await.unwrap();

        let by_id = files.find(&FileKey::Id(desc.id)).await.unwrap().unwrap();
        assert_eq!(by_id.filename, "a.txt");
        let by_md5 = files.find(&FileKey::checksum("aa")).await.unwrap().unwrap();
        assert_eq!(by_md5.id, desc.id);

        assert_eq!(files.delete(&FileKey::checksum("aa")).await.unwrap(), Some(desc.id));
        assert_eq!(files.delete(&FileKey::Id(desc.id)).await.unwrap(), None);
        assert!(files.find(&FileKey::Id(desc.id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chunk_scan_is_ordered_and_bounded() {
        let (_, chunks) = repos().await;
        let id = Uuid::new_v4();
        for index in [3u64, 0, 2, 1] {
            chunks
                .insert(&ChunkRecord::new(id, index, vec![index as u8]))
                .await
                .unwrap();
        }
        chunks
            .insert(&ChunkRecord::new(Uuid::new_v4(), 1, vec![9]))
            .await
            .unwrap();

        let scanned = chunks.scan(id, 1..=2, 10).await.unwrap();
        assert_eq!(
            scanned.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let all = chunks.scan(id, 0..=u64::MAX, 10).await.unwrap();
        assert_eq!(all.len(), 4);

        let page = chunks.scan(id, 1..=u64::MAX, 2).await.unwrap();
        assert_eq!(
            page.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn test_chunk_lengths_skip_payload() {
        let (_, chunks) = repos().await;
        let id = Uuid::new_v4();
        chunks.insert(&ChunkRecord::new(id, 0, vec![0; 4])).await.unwrap();
        chunks.insert(&ChunkRecord::new(id, 2, vec![0; 1])).await.unwrap();

        assert_eq!(
            chunks.lengths(id, 0..=u64::MAX).await.unwrap(),
            vec![(0u64, 4usize), (2, 1)]
        );
        assert!(chunks.lengths(id, 1..=1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chunk_upsert_replaces_payload() {
        let (_, chunks) = repos().await;
        let id = Uuid::new_v4();
        chunks.upsert(&ChunkRecord::new(id, 0, vec![1, 2])).await.unwrap();
        chunks.upsert(&ChunkRecord::new(id, 0, vec![3, 4])).await.unwrap();

        let chunk = chunks.find(id, 0).await.unwrap().unwrap();
        assert_eq!(chunk.data, vec![3, 4]);
        assert_eq!(chunks.delete_all(id).await.unwrap(), 1);
        assert!(chunks.find(id, 0).await.unwrap().is_none());
    }
}
