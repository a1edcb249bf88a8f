//! Shared state handed to every handler.

use gridfs_store::GridFsClient;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Pooled client over the configured bucket.
    pub client: GridFsClient,

    /// The same pool the bucket uses; readiness probes query it directly.
    pub db: Arc<SqlitePool>,
}

/// In-memory state for handler tests: bucket `fs` with 8-byte chunks.
#[cfg(test)]
pub(crate) async fn memory_state() -> AppState {
    use gridfs_store::{Bucket, BucketOptions};
    use sqlx::sqlite::SqlitePoolOptions;

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("open in-memory sqlite"),
    );
    let options = BucketOptions {
        chunk_size: 8,
        ..BucketOptions::default()
    };
    let bucket = Bucket::open_sqlite(db.clone(), "fs", options)
        .await
        .expect("open bucket");
    AppState {
        client: GridFsClient::new(bucket, 4),
        db,
    }
}
