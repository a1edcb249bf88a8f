//! Shared fixtures for the service tests.

use crate::services::bucket::{Bucket, BucketOptions};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::sync::Arc;

/// A private in-memory database. A single connection keeps every query on
/// the same database.
pub(crate) async fn memory_pool() -> Arc<SqlitePool> {
    Arc::new(
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("open in-memory sqlite"),
    )
}

pub(crate) async fn memory_bucket(chunk_size: u32) -> Bucket {
    let options = BucketOptions {
        chunk_size,
        ..BucketOptions::default()
    };
    Bucket::open_sqlite(memory_pool().await, "fs", options)
        .await
        .expect("open bucket")
}

/// Deterministic, non-repeating-per-chunk content.
pub(crate) fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
