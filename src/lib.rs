//! Chunked blob storage on top of SQLite.
//!
//! Large payloads are split into fixed-size chunk records and reassembled on
//! read. On top of whole-file reads and writes the bucket offers reads and
//! in-place writes at arbitrary byte offsets.
//!
//! ```no_run
//! # async fn demo(db: std::sync::Arc<sqlx::SqlitePool>) -> gridfs_store::GridFsResult<()> {
//! use gridfs_store::{Bucket, BucketOptions, NewFile};
//!
//! let bucket = Bucket::open_sqlite(db, "fs", BucketOptions::default()).await?;
//! let id = bucket.write(NewFile::new("hello.txt", "", 5), b"hello").await?;
//! bucket.write_range(id, 0, b"J").await?;
//! assert_eq!(bucket.read_range(id, 0, 2).await?, b"Je");
//! # Ok(())
//! # }
//! ```

pub mod models;
pub mod services;

pub use models::file::{FileDescriptor, FileKey, Metadata, NewFile};
pub use services::{
    bucket::{Bucket, BucketOptions, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_BUFFERED_LEN},
    client::{DEFAULT_MAX_WORKERS, GridFsClient, Pending},
    error::{GridFsError, GridFsResult},
};
