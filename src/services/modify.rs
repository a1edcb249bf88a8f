//! Random writer: overwrites a byte range of an existing file in place.
//!
//! The file's length and chunk size never change. Each chunk the range
//! touches is handled in one of two ways:
//!
//! - covered entirely: the new bytes replace the chunk outright, no fetch;
//! - covered partly (the first and/or last chunk of the range): the stored
//!   chunk is fetched, or a zero-filled buffer of the chunk's expected length
//!   is allocated when it was never written, the new bytes are merged in and
//!   the result is upserted.
//!
//! Read-modify-write is not atomic against another writer of the same chunk.
//! Callers that need non-conflicting semantics must serialize writers per file.

use crate::models::{
    chunk::ChunkRecord,
    file::{FileDescriptor, FileKey},
};
use crate::services::{
    error::{GridFsError, GridFsResult},
    layout::{ChunkLayout, ChunkSpan},
    repository::ChunkRepository,
    write::read_full,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;
use uuid::Uuid;

/// Write everything `source` yields at `offset` and return the byte count.
///
/// The source is consumed one chunk span at a time. If it still has data once
/// the declared length is reached the call fails with `OutOfRange`; chunks
/// upserted before that point stay written.
pub async fn write_range<R>(
    chunks: &dyn ChunkRepository,
    file: &FileDescriptor,
    offset: u64,
    source: &mut R,
) -> GridFsResult<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let layout = file.layout();
    let room = file.length.saturating_sub(offset);
    let mut buf = vec![0u8; layout.chunk_size() as usize];
    let mut written = 0u64;
    let mut exhausted = false;

    if let Some(range) = layout.range(offset, room) {
        for span in range.spans() {
            let n = read_full(source, &mut buf[..span.len]).await?;
            if n > 0 {
                let patch = ChunkSpan { len: n, ..span };
                patch_chunk(chunks, &layout, file.id, patch, &buf[..n]).await?;
                written += n as u64;
            }
            if n < span.len {
                exhausted = true;
                break;
            }
        }
    }

    if !exhausted {
        let mut probe = [0u8; 1];
        if source.read(&mut probe).await? > 0 {
            return Err(GridFsError::OutOfRange {
                key: FileKey::Id(file.id),
                offset,
                size: written + 1,
                length: file.length,
            });
        }
    }

    debug!(
        "wrote {} bytes at offset {} of file {}",
        written, offset, file.id
    );
    Ok(written)
}

async fn patch_chunk(
    chunks: &dyn ChunkRepository,
    layout: &ChunkLayout,
    file_id: Uuid,
    span: ChunkSpan,
    bytes: &[u8],
) -> GridFsResult<()> {
    let chunk_len = layout.chunk_len(span.index);

    let data = if span.covers(chunk_len) {
        bytes.to_vec()
    } else {
        let mut data = chunks
            .find(file_id, span.index)
            .await?
            .map(|chunk| chunk.data)
            .unwrap_or_default();
        data.resize(chunk_len, 0);
        data[span.offset..span.end()].copy_from_slice(bytes);
        data
    };

    chunks
        .upsert(&ChunkRecord::new(file_id, span.index, data))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::file::NewFile;
    use crate::services::testing::{memory_bucket, pattern};

    #[tokio::test]
    async fn test_merge_inside_one_chunk_keeps_neighbours() {
        let bucket = memory_bucket(8).await;
        let original = pattern(20);
        let id = bucket
            .write(NewFile::new("a", "m", 20), &original)
            .await
            .unwrap();
        let file = bucket.get(id).await.unwrap().unwrap();

        let written = write_range(bucket.chunk_repository(), &file, 10, &mut &[0xEEu8; 3][..])
            .await
            .unwrap();
        assert_eq!(written, 3);

        let mut expected = original.clone();
        expected[10..13].copy_from_slice(&[0xEEu8; 3]);
        assert_eq!(bucket.read(id).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_fills_sparse_chunks_with_expected_sizes() {
        let bucket = memory_bucket(8).await;
        let id = bucket
            .write(NewFile::new("a", "m", 19), &[])
            .await
            .unwrap();
        let file = bucket.get(id).await.unwrap().unwrap();

        // touches the tail of chunk 0 and the head of the short last chunk
        write_range(bucket.chunk_repository(), &file, 6, &mut &[1u8; 2][..])
            .await
            .unwrap();
        write_range(bucket.chunk_repository(), &file, 16, &mut &[2u8; 1][..])
            .await
            .unwrap();
        write_range(bucket.chunk_repository(), &file, 8, &mut &[3u8; 8][..])
            .await
            .unwrap();

        let content = bucket.read(id).await.unwrap();
        assert_eq!(content.len(), 19);
        assert_eq!(&content[..6], &[0u8; 6]);
        assert_eq!(&content[6..8], &[1u8, 1]);
        assert_eq!(&content[8..16], &[3u8; 8]);
        assert_eq!(&content[16..], &[2u8, 0, 0]);
    }

    #[tokio::test]
    async fn test_stream_longer_than_file_is_out_of_range() {
        let bucket = memory_bucket(4).await;
        let id = bucket
            .write(NewFile::new("a", "m", 6), &pattern(6))
            .await
            .unwrap();
        let file = bucket.get(id).await.unwrap().unwrap();

        let err = write_range(bucket.chunk_repository(), &file, 5, &mut &[9u8; 2][..])
            .await
            .unwrap_err();
        assert!(matches!(err, GridFsError::OutOfRange { offset: 5, .. }));
    }

    #[tokio::test]
    async fn test_empty_stream_past_end_is_noop() {
        let bucket = memory_bucket(4).await;
        let id = bucket
            .write(NewFile::new("a", "m", 6), &pattern(6))
            .await
            .unwrap();
        let file = bucket.get(id).await.unwrap().unwrap();

        let written = write_range(bucket.chunk_repository(), &file, 6, &mut &b""[..])
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(bucket.read(id).await.unwrap(), pattern(6));
    }

    #[tokio::test]
    async fn test_stream_ending_inside_middle_chunk_merges() {
        const C: usize = 8;
        let bucket = memory_bucket(C as u32).await;
        let original = pattern(3 * C);
        let id = bucket
            .write(NewFile::new("a", "m", original.len() as u64), &original)
            .await
            .unwrap();

        // chunk 0 is replaced whole, the stream runs dry 3 bytes into chunk 1
        let patch = vec![0xABu8; C + 3];
        let mut source = std::io::Cursor::new(patch.clone());
        let written = bucket.write_range_from(id, 0, &mut source).await.unwrap();
        assert_eq!(written, (C + 3) as u64);

        let content = bucket.read(id).await.unwrap();
        assert_eq!(&content[..C + 3], &patch[..]);
        assert_eq!(&content[C + 3..2 * C], &original[C + 3..2 * C]);
        assert_eq!(&content[2 * C..], &original[2 * C..]);
    }
}
