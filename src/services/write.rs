//! Sequential writer: stores a new file chunk by chunk.
//!
//! Chunks are inserted first and the descriptor last, so a descriptor only
//! becomes visible once every chunk the source supplied is stored. When the
//! write fails before the descriptor is inserted, the chunks written so far
//! are removed again and no descriptor exists.

use crate::models::{
    chunk::ChunkRecord,
    file::{FileDescriptor, FileKey, NewFile},
};
use crate::services::{
    error::{GridFsError, GridFsResult},
    repository::{ChunkRepository, FileRepository},
};
use chrono::Utc;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};
use uuid::Uuid;

/// Fill `buf` from `source`, stopping early only at end of stream.
pub(crate) async fn read_full<R>(source: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Store `source` as a new file of `chunk_size`-byte chunks and return its id.
///
/// Fails with `Overflow` as soon as the source yields more than
/// `file.length` bytes. A source shorter than the declared length is
/// accepted; the missing chunks can be filled in later with ranged writes.
pub async fn write_file<R>(
    files: &dyn FileRepository,
    chunks: &dyn ChunkRepository,
    chunk_size: u32,
    file: NewFile,
    source: &mut R,
) -> GridFsResult<Uuid>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let id = Uuid::new_v4();
    if i64::try_from(file.length).is_err() {
        return Err(GridFsError::TooLarge {
            key: FileKey::Id(id),
            size: file.length,
            limit: i64::MAX as u64,
        });
    }

    let (count, read) = match write_chunks(chunks, id, chunk_size, &file, source).await {
        Ok(written) => written,
        Err(err) => {
            discard_chunks(chunks, id).await;
            return Err(err);
        }
    };
    if read < file.length {
        debug!(
            "file {} stored {} of {} declared bytes, remaining chunks left sparse",
            id, read, file.length
        );
    }

    let descriptor = FileDescriptor {
        id,
        length: file.length,
        chunk_size,
        upload_date: Utc::now(),
        md5: file.md5,
        filename: file.filename,
        metadata: file.metadata,
    };
    if let Err(err) = files.insert(&descriptor).await {
        discard_chunks(chunks, id).await;
        return Err(err);
    }

    debug!("stored file {} ({} bytes in {} chunks)", id, read, count);
    Ok(id)
}

/// Returns the number of chunks inserted and the bytes they hold.
async fn write_chunks<R>(
    chunks: &dyn ChunkRepository,
    id: Uuid,
    chunk_size: u32,
    file: &NewFile,
    source: &mut R,
) -> GridFsResult<(u64, u64)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; chunk_size as usize];
    let mut index = 0u64;
    let mut read = 0u64;

    loop {
        let n = read_full(source, &mut buf).await?;
        if n == 0 {
            break;
        }
        read += n as u64;
        if read > file.length {
            return Err(GridFsError::Overflow {
                filename: file.filename.clone(),
                length: file.length,
                read,
            });
        }

        chunks
            .insert(&ChunkRecord::new(id, index, buf[..n].to_vec()))
            .await?;
        index += 1;

        if n < buf.len() {
            break;
        }
    }

    Ok((index, read))
}

async fn discard_chunks(chunks: &dyn ChunkRepository, id: Uuid) {
    match chunks.delete_all(id).await {
        Ok(removed) => warn!("discarded {} chunks of unfinished file {}", removed, id),
        Err(err) => warn!("failed to discard chunks of unfinished file {}: {}", id, err),
    }
}
