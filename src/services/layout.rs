//! Chunk addressing: splits a file byte range into per-chunk spans.
//!
//! Every reader and writer goes through [`ChunkRange`], so the first/last
//! partial chunk arithmetic lives in exactly one place.

use std::ops::RangeInclusive;

/// Chunk geometry of one file: its chunk size and declared length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    chunk_size: u32,
    length: u64,
}

impl ChunkLayout {
    pub fn new(chunk_size: u32, length: u64) -> Self {
        debug_assert!(chunk_size > 0, "chunk size must be positive");
        Self { chunk_size, length }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Number of chunk records a fully written file has: `ceil(length / chunk_size)`.
    pub fn chunk_count(&self) -> u64 {
        self.length.div_ceil(u64::from(self.chunk_size))
    }

    /// Size of the file's final chunk; a full chunk when the length divides
    /// evenly, 0 for an empty file.
    pub fn last_chunk_len(&self) -> usize {
        if self.length == 0 {
            return 0;
        }
        match self.length % u64::from(self.chunk_size) {
            0 => self.chunk_size as usize,
            rem => rem as usize,
        }
    }

    /// Expected stored size of chunk `index`; 0 past the end of the file.
    pub fn chunk_len(&self, index: u64) -> usize {
        match self.chunk_count().checked_sub(1) {
            Some(last) if index < last => self.chunk_size as usize,
            Some(last) if index == last => self.last_chunk_len(),
            _ => 0,
        }
    }

    /// Whether `[offset, offset + size)` lies within the declared length.
    pub fn contains(&self, offset: u64, size: u64) -> bool {
        offset
            .checked_add(size)
            .is_some_and(|end| end <= self.length)
    }

    pub fn range(&self, offset: u64, size: u64) -> Option<ChunkRange> {
        ChunkRange::new(self.chunk_size, offset, size)
    }
}

/// The bytes of a single chunk touched by a range, in chunk-relative terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: u64,
    pub offset: usize,
    pub len: usize,
}

impl ChunkSpan {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// True when the span covers a chunk of `chunk_len` bytes entirely.
    pub fn covers(&self, chunk_len: usize) -> bool {
        self.offset == 0 && self.len == chunk_len
    }
}

/// A non-empty byte range `[offset, offset + size)` in chunk coordinates.
///
/// The first chunk is entered at `first_offset` and contributes `first_len`
/// bytes; the last chunk contributes `last_len` bytes from its start. Chunks
/// strictly between the two are covered whole. When the range ends exactly on
/// a chunk boundary the last chunk is the one before that boundary, so there
/// is never an empty tail span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    chunk_size: u64,
    first_index: u64,
    first_offset: usize,
    first_len: usize,
    last_index: u64,
    last_len: usize,
}

impl ChunkRange {
    /// Returns `None` for an empty range, a zero chunk size, or a range whose
    /// end overflows `u64`.
    pub fn new(chunk_size: u32, offset: u64, size: u64) -> Option<Self> {
        if size == 0 || chunk_size == 0 {
            return None;
        }
        let end = offset.checked_add(size)?;
        let chunk_size = u64::from(chunk_size);

        let first_index = offset / chunk_size;
        let first_offset = offset % chunk_size;
        let first_len = (chunk_size - first_offset).min(size);
        let last_index = (end - 1) / chunk_size;
        let last_len = end - last_index * chunk_size;

        Some(Self {
            chunk_size,
            first_index,
            first_offset: first_offset as usize,
            first_len: first_len as usize,
            last_index,
            last_len: last_len as usize,
        })
    }

    pub fn first_index(&self) -> u64 {
        self.first_index
    }

    pub fn last_index(&self) -> u64 {
        self.last_index
    }

    pub fn indices(&self) -> RangeInclusive<u64> {
        self.first_index..=self.last_index
    }

    /// The part of chunk `index` inside the range, if any.
    pub fn span(&self, index: u64) -> Option<ChunkSpan> {
        if !self.indices().contains(&index) {
            return None;
        }
        let (offset, len) = if index == self.first_index {
            (self.first_offset, self.first_len)
        } else if index == self.last_index {
            (0, self.last_len)
        } else {
            (0, self.chunk_size as usize)
        };
        Some(ChunkSpan { index, offset, len })
    }

    pub fn spans(&self) -> impl Iterator<Item = ChunkSpan> + '_ {
        self.indices().filter_map(|index| self.span(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(range: &ChunkRange) -> usize {
        range.spans().map(|span| span.len).sum()
    }

    #[test]
    fn test_empty_range_has_no_chunks() {
        assert!(ChunkRange::new(16, 5, 0).is_none());
        assert!(ChunkRange::new(0, 5, 1).is_none());
        assert!(ChunkRange::new(16, u64::MAX, 2).is_none());
    }

    #[test]
    fn test_range_within_single_chunk() {
        let range = ChunkRange::new(16, 3, 5).unwrap();
        assert_eq!(range.indices(), 0..=0);
        let spans: Vec<_> = range.spans().collect();
        assert_eq!(
            spans,
            vec![ChunkSpan {
                index: 0,
                offset: 3,
                len: 5
            }]
        );
    }

    #[test]
    fn test_range_across_chunks() {
        let range = ChunkRange::new(16, 10, 40).unwrap();
        let spans: Vec<_> = range.spans().collect();
        assert_eq!(spans.len(), 4);
        assert_eq!(
            spans[0],
            ChunkSpan {
                index: 0,
                offset: 10,
                len: 6
            }
        );
        assert_eq!(
            spans[1],
            ChunkSpan {
                index: 1,
                offset: 0,
                len: 16
            }
        );
        assert_eq!(spans[2].len, 16);
        assert_eq!(
            spans[3],
            ChunkSpan {
                index: 3,
                offset: 0,
                len: 2
            }
        );
        assert_eq!(total(&range), 40);
    }

    #[test]
    fn test_range_ending_on_boundary_has_no_empty_tail() {
        let range = ChunkRange::new(16, 0, 32).unwrap();
        assert_eq!(range.indices(), 0..=1);
        assert_eq!(range.span(1).unwrap().len, 16);
        assert!(range.span(2).is_none());

        let range = ChunkRange::new(16, 4, 12).unwrap();
        assert_eq!(range.indices(), 0..=0);
        assert_eq!(range.span(0).unwrap().end(), 16);
    }

    #[test]
    fn test_range_starting_on_boundary() {
        let range = ChunkRange::new(16, 16, 17).unwrap();
        assert_eq!(range.indices(), 1..=2);
        assert!(range.span(1).unwrap().covers(16));
        assert_eq!(range.span(2).unwrap().len, 1);
    }

    #[test]
    fn test_spans_always_sum_to_size() {
        for offset in 0..40u64 {
            for size in 1..60u64 {
                let range = ChunkRange::new(7, offset, size).unwrap();
                assert_eq!(total(&range) as u64, size, "offset={offset} size={size}");
                assert!(range.spans().all(|span| span.end() <= 7 && span.len > 0));
            }
        }
    }

    #[test]
    fn test_layout_chunk_lengths() {
        let layout = ChunkLayout::new(255 * 1024, 461_218);
        assert_eq!(layout.chunk_count(), 2);
        assert_eq!(layout.last_chunk_len(), 461_218 - 255 * 1024);
        assert_eq!(layout.chunk_len(0), 255 * 1024);
        assert_eq!(layout.chunk_len(1), 461_218 - 255 * 1024);
        assert_eq!(layout.chunk_len(2), 0);

        let even = ChunkLayout::new(8, 16);
        assert_eq!(even.chunk_count(), 2);
        assert_eq!(even.last_chunk_len(), 8);

        let empty = ChunkLayout::new(8, 0);
        assert_eq!(empty.chunk_count(), 0);
        assert_eq!(empty.last_chunk_len(), 0);
        assert_eq!(empty.chunk_len(0), 0);
    }

    #[test]
    fn test_layout_contains() {
        let layout = ChunkLayout::new(8, 10);
        assert!(layout.contains(0, 10));
        assert!(layout.contains(10, 0));
        assert!(!layout.contains(9, 2));
        assert!(!layout.contains(u64::MAX, 1));
    }
}
