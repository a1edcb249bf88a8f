//! Readers: whole-file and ranged reads into any `AsyncWrite` sink.
//!
//! Both walk the chunk scan in pages and check that indices arrive in
//! sequence and that each chunk holds exactly the bytes its position implies.
//! A gap, a stray index or a mis-sized chunk means the file is still being
//! written (or a write died half way) and surfaces as `Incomplete` rather
//! than as short or padded output.
//!
//! No store statement stays open while a page is written to the sink, so a
//! slow sink never holds up other operations on the bucket.

use crate::models::file::{FileDescriptor, FileKey};
use crate::services::{
    error::{GridFsError, GridFsResult},
    layout::{ChunkLayout, ChunkRange, ChunkSpan},
    repository::ChunkRepository,
};
use std::ops::RangeInclusive;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Chunks fetched per page of a read.
pub const SCAN_BATCH: u64 = 16;

/// Reject `[offset, offset + size)` when it reaches past the declared length.
pub(crate) fn check_range(
    file: &FileDescriptor,
    key: &FileKey,
    offset: u64,
    size: u64,
) -> GridFsResult<()> {
    if file.layout().contains(offset, size) {
        return Ok(());
    }
    Err(GridFsError::OutOfRange {
        key: key.clone(),
        offset,
        size,
        length: file.length,
    })
}

/// Copy the whole file to `sink`. Every chunk stored for the file takes part
/// in the scan, so a chunk past the declared length is reported too.
pub async fn read_file<W>(
    chunks: &dyn ChunkRepository,
    file: &FileDescriptor,
    sink: &mut W,
) -> GridFsResult<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let range = file.layout().range(0, file.length);
    copy_chunks(chunks, file, range, 0..=u64::MAX, sink).await
}

/// Copy `[offset, offset + size)` of the file to `sink`, scanning only the
/// chunks that range touches.
pub async fn read_range<W>(
    chunks: &dyn ChunkRepository,
    file: &FileDescriptor,
    offset: u64,
    size: u64,
    sink: &mut W,
) -> GridFsResult<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    check_range(file, &FileKey::Id(file.id), offset, size)?;
    let Some(range) = file.layout().range(offset, size) else {
        return Ok(0);
    };
    copy_chunks(chunks, file, Some(range), range.indices(), sink).await
}

/// Check that the whole file is readable by listing chunk sizes only.
pub async fn verify_file(chunks: &dyn ChunkRepository, file: &FileDescriptor) -> GridFsResult<()> {
    let range = file.layout().range(0, file.length);
    verify_chunks(chunks, file, range, 0..=u64::MAX).await
}

/// Check that `[offset, offset + size)` is readable by listing chunk sizes only.
pub async fn verify_range(
    chunks: &dyn ChunkRepository,
    file: &FileDescriptor,
    offset: u64,
    size: u64,
) -> GridFsResult<()> {
    check_range(file, &FileKey::Id(file.id), offset, size)?;
    let Some(range) = file.layout().range(offset, size) else {
        return Ok(());
    };
    verify_chunks(chunks, file, Some(range), range.indices()).await
}

async fn copy_chunks<W>(
    chunks: &dyn ChunkRepository,
    file: &FileDescriptor,
    range: Option<ChunkRange>,
    scan: RangeInclusive<u64>,
    sink: &mut W,
) -> GridFsResult<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let layout = file.layout();
    let last = *scan.end();
    let mut next = *scan.start();
    let mut copied = 0u64;

    loop {
        let page = chunks.scan(file.id, next..=last, SCAN_BATCH).await?;
        let full = page.len() as u64 == SCAN_BATCH;

        for chunk in page {
            let span = expect_chunk(file, &layout, range, next, chunk.index, chunk.data.len())?;
            sink.write_all(&chunk.data[span.offset..span.end()]).await?;
            sink.flush().await?;
            copied += span.len as u64;
            next += 1;
        }
        if !full {
            break;
        }
    }

    expect_end(file, range, next)?;
    Ok(copied)
}

async fn verify_chunks(
    chunks: &dyn ChunkRepository,
    file: &FileDescriptor,
    range: Option<ChunkRange>,
    scan: RangeInclusive<u64>,
) -> GridFsResult<()> {
    let layout = file.layout();
    let mut next = *scan.start();
    for (index, len) in chunks.lengths(file.id, scan).await? {
        expect_chunk(file, &layout, range, next, index, len)?;
        next += 1;
    }
    expect_end(file, range, next)
}

/// Check chunk `index` holding `len` bytes against the expected sequence and
/// return the part of it inside `range`.
fn expect_chunk(
    file: &FileDescriptor,
    layout: &ChunkLayout,
    range: Option<ChunkRange>,
    next: u64,
    index: u64,
    len: usize,
) -> GridFsResult<ChunkSpan> {
    if index != next {
        return Err(GridFsError::incomplete(
            file.id,
            format!("expected chunk {} but found chunk {}", next, index),
        ));
    }
    let Some(span) = range.and_then(|r| r.span(index)) else {
        return Err(GridFsError::incomplete(
            file.id,
            format!("chunk {} lies past length {}", index, file.length),
        ));
    };
    let chunk_len = layout.chunk_len(index);
    if len != chunk_len {
        return Err(GridFsError::incomplete(
            file.id,
            format!("chunk {} holds {} bytes, expected {}", index, len, chunk_len),
        ));
    }
    Ok(span)
}

/// `next` is one past the last chunk seen; it must be one past the range.
fn expect_end(file: &FileDescriptor, range: Option<ChunkRange>, next: u64) -> GridFsResult<()> {
    let end = range.map_or(0, |r| r.last_index() + 1);
    if next != end {
        return Err(GridFsError::incomplete(
            file.id,
            format!("found chunks up to {} of {}", next, end),
        ));
    }
    Ok(())
}
