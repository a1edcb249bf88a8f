//! Records stored in a bucket.
//!
//! A bucket keeps two collections: `<bucket>.files` holds one
//! [`file::FileDescriptor`] per stored blob and `<bucket>.chunks` holds the
//! blob's payload split into [`chunk::ChunkRecord`]s. Both map to SQLite rows
//! via `sqlx::FromRow` and the descriptor serializes as JSON via `serde`.

pub mod chunk;
pub mod file;
