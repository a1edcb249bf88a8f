//! Async client that runs bucket operations on a bounded pool of tokio tasks.
//!
//! Every call is spawned right away and returns a [`Pending`] future for its
//! result. At most `max_workers` operations touch the store at once; the
//! rest wait for a permit. The bucket itself needs none of this and can be
//! called directly.

use crate::models::file::{FileDescriptor, FileKey, NewFile};
use crate::services::{
    bucket::Bucket,
    error::{GridFsError, GridFsResult},
};
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Semaphore,
    task::JoinHandle,
};
use uuid::Uuid;

pub const DEFAULT_MAX_WORKERS: usize = 50;

#[derive(Clone)]
pub struct GridFsClient {
    bucket: Bucket,
    permits: Arc<Semaphore>,
}

impl GridFsClient {
    pub fn new(bucket: Bucket, max_workers: usize) -> Self {
        Self {
            bucket,
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    pub fn get(&self, key: impl Into<FileKey>) -> Pending<Option<FileDescriptor>> {
        let key = key.into();
        self.dispatch(move |bucket| async move { bucket.get(key).await })
    }

    pub fn delete(&self, key: impl Into<FileKey>) -> Pending<bool> {
        let key = key.into();
        self.dispatch(move |bucket| async move { bucket.delete(key).await })
    }

    pub fn read(&self, key: impl Into<FileKey>) -> Pending<Vec<u8>> {
        let key = key.into();
        self.dispatch(move |bucket| async move { bucket.read(key).await })
    }

    /// Stream the whole file into `sink`; the sink is handed back once done.
    pub fn read_to<W>(&self, key: impl Into<FileKey>, mut sink: W) -> Pending<W>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let key = key.into();
        self.dispatch(move |bucket| async move {
            bucket.read_to(key, &mut sink).await?;
            Ok(sink)
        })
    }

    pub fn read_range(&self, key: impl Into<FileKey>, offset: u64, size: u64) -> Pending<Vec<u8>> {
        let key = key.into();
        self.dispatch(move |bucket| async move { bucket.read_range(key, offset, size).await })
    }

    pub fn read_range_to<W>(
        &self,
        key: impl Into<FileKey>,
        offset: u64,
        size: u64,
        mut sink: W,
    ) -> Pending<W>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let key = key.into();
        self.dispatch(move |bucket| async move {
            bucket.read_range_to(key, offset, size, &mut sink).await?;
            Ok(sink)
        })
    }

    pub fn verify(&self, key: impl Into<FileKey>) -> Pending<FileDescriptor> {
        let key = key.into();
        self.dispatch(move |bucket| async move { bucket.verify(key).await })
    }

    pub fn verify_range(
        &self,
        key: impl Into<FileKey>,
        offset: u64,
        size: u64,
    ) -> Pending<FileDescriptor> {
        let key = key.into();
        self.dispatch(move |bucket| async move { bucket.verify_range(key, offset, size).await })
    }

    pub fn write(&self, file: NewFile, data: Vec<u8>) -> Pending<Uuid> {
        self.dispatch(move |bucket| async move { bucket.write(file, &data).await })
    }

    pub fn write_from<R>(&self, file: NewFile, mut source: R) -> Pending<Uuid>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.dispatch(move |bucket| async move { bucket.write_from(file, &mut source).await })
    }

    pub fn write_range(&self, id: Uuid, offset: u64, data: Vec<u8>) -> Pending<()> {
        self.dispatch(move |bucket| async move { bucket.write_range(id, offset, &data).await })
    }

    pub fn write_range_from<R>(&self, id: Uuid, offset: u64, mut source: R) -> Pending<u64>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.dispatch(move |bucket| async move {
            bucket.write_range_from(id, offset, &mut source).await
        })
    }

    /// Stop accepting work. Operations already holding a permit finish;
    /// everything else fails with `Worker`.
    pub fn close(&self) {
        self.permits.close();
    }

    fn dispatch<T, F, Fut>(&self, job: F) -> Pending<T>
    where
        F: FnOnce(Bucket) -> Fut + Send + 'static,
        Fut: Future<Output = GridFsResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let bucket = self.bucket.clone();
        let permits = self.permits.clone();
        let handle = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| GridFsError::Worker("client is closed".into()))?;
            job(bucket).await
        });
        Pending { handle }
    }
}

/// The eventual result of a client call.
#[must_use = "dropping a Pending detaches the operation and discards its result"]
pub struct Pending<T> {
    handle: JoinHandle<GridFsResult<T>>,
}

impl<T> Future for Pending<T> {
    type Output = GridFsResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(err) => Err(GridFsError::Worker(err.to_string())),
        })
    }
}
