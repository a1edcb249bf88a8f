//! Chunked storage core: addressing, repositories, the four data-movement
//! algorithms, the `Bucket` facade and the pooled async client.

pub mod bucket;
pub mod client;
pub mod error;
pub mod layout;
pub mod modify;
pub mod read;
pub mod repository;
pub mod write;

#[cfg(test)]
pub(crate) mod testing;
