//! The sub-block directory: one entry per tile, in on-disk order.
//!
//! "DV" entries are variable-length (their size depends on their own
//! dimension count), so entry `i` can only be reached by consuming entries
//! `0..i` first. [`DirectoryEntries`] is the forward-only walk over a loaded
//! directory payload; [`SubBlockDirectory`] collects it into memory for
//! index-based lookups.

use std::fmt;

use snafu::ensure;
use tracing::debug;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, little_endian::I32,
};

pub use self::entry::{CompressionMode, DV_PREFIX_SIZE, DirectoryEntry, PixelType, Rect, Size};
pub(crate) use self::entry::{DvEntryPrefixRaw, RawEntry, SCHEMA_DV};

use self::entry::{DIMENSION_COUNT_OFFSET, SCHEMA_DE};
use crate::dimension::{DIMENSION_ENTRY_SIZE, DimensionEntryRaw, MAX_DIMENSIONS};
use crate::segment::{SEGMENT_HEADER_SIZE, SegmentHeader, SegmentHeaderRaw, SegmentKind};
use crate::stream::{Stream, read_exact_at, read_vec_at};
use crate::{
    DirectoryTooSmallSnafu, InvalidEntryCountSnafu, InvalidMagicSnafu, InvalidSchemaSnafu,
    InvalidSegmentSizeSnafu, Result, TooManyDimensionsSnafu, UnsupportedSchemaSnafu,
};

mod entry;

/// Checks applied to every directory entry while parsing.
///
/// Every flag is independent. A violation is reported as its own
/// [`Error`](crate::Error) variant carrying the offset of the entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DirectoryParseOptions(u32);

bitflags::bitflags! {
    impl DirectoryParseOptions: u32 {
        /// Every entry must have an X and a Y dimension.
        const XY_MUST_BE_PRESENT = 0x01;
        /// Logical axes (everything but X, Y and M) must have size 1.
        const SIZE_OTHER_THAN_M_MUST_BE_ONE = 0x02;
        /// Logical axes must have stored size 1.
        const STORED_SIZE_OTHER_THAN_M_MUST_BE_ONE = 0x04;
        /// The M dimension must have size 1.
        const M_SIZE_MUST_BE_ONE = 0x08;
        /// The M dimension must have size 1, unless the tile is a pyramid tile.
        const M_SIZE_MUST_BE_ONE_EXCEPT_PYRAMID = 0x10;
    }
}

impl DirectoryParseOptions {
    /// No checks at all. This is the default.
    #[must_use]
    pub const fn lax() -> Self {
        Self::empty()
    }

    /// Every check, with the pyramid-tolerant M rule.
    #[must_use]
    pub const fn strict() -> Self {
        Self::XY_MUST_BE_PRESENT
            .union(Self::SIZE_OTHER_THAN_M_MUST_BE_ONE)
            .union(Self::STORED_SIZE_OTHER_THAN_M_MUST_BE_ONE)
            .union(Self::M_SIZE_MUST_BE_ONE_EXCEPT_PYRAMID)
    }
}

/// Size of the directory segment data preceding the entries.
pub const DIRECTORY_DATA_SIZE: u64 = 128;

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub(crate) struct DirectorySegmentRaw {
    pub header: SegmentHeaderRaw, // 0x00
    pub entry_count: I32,         // 0x20
    pub spare: [u8; 124],         // 0x24
}

const _: () = assert!(
    size_of::<DirectorySegmentRaw>() as u64 == SEGMENT_HEADER_SIZE + DIRECTORY_DATA_SIZE
);

/// Where the entries of a directory segment live.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DirectoryGeometry {
    pub entry_count: usize,
    /// File offset of the first entry.
    pub entries_offset: u64,
    /// Number of bytes available for the entries.
    pub entries_len: u64,
}

impl DirectoryGeometry {
    pub fn entries_end(&self) -> u64 {
        self.entries_offset.saturating_add(self.entries_len)
    }
}

/// Reads the directory segment header at `offset` and computes where its
/// entries are.
pub(crate) fn read_directory_geometry<S: Stream + ?Sized>(stream: &S, offset: u64) -> Result<DirectoryGeometry> {
    let mut buf = [0u8; size_of::<DirectorySegmentRaw>()];
    read_exact_at(stream, offset, &mut buf)?;

    let raw = DirectorySegmentRaw::read_from_bytes(&buf).expect("header buffer is correctly sized");
    let header = SegmentHeader::from_raw(&raw.header);

    ensure!(
        header.kind() == Some(SegmentKind::SubBlockDirectory),
        InvalidMagicSnafu {
            offset,
            kind: SegmentKind::SubBlockDirectory
        }
    );

    let size = header.effective_size();

    ensure!(
        size >= DIRECTORY_DATA_SIZE,
        InvalidSegmentSizeSnafu {
            offset,
            size,
            minimum: DIRECTORY_DATA_SIZE
        }
    );

    let count = raw.entry_count.get();

    ensure!(
        count >= 0,
        InvalidEntryCountSnafu {
            offset: offset + SEGMENT_HEADER_SIZE,
            count
        }
    );

    Ok(DirectoryGeometry {
        entry_count: count as usize,
        entries_offset: offset + SEGMENT_HEADER_SIZE + DIRECTORY_DATA_SIZE,
        entries_len: size - DIRECTORY_DATA_SIZE,
    })
}

/// Something entries can be read from, addressed by file offset.
pub(crate) trait EntrySource {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

/// A loaded copy of the bytes starting at `base`.
pub(crate) struct BufferSource {
    pub base: u64,
    pub data: Vec<u8>,
}

impl EntrySource for BufferSource {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset.saturating_sub(self.base) as usize;
        let src = self
            .data
            .get(start..start.saturating_add(buf.len()))
            .ok_or_else(|| DirectoryTooSmallSnafu { offset }.build())?;

        buf.copy_from_slice(src);

        Ok(())
    }
}

/// Direct positioned reads against a live stream, bounded by `end`.
pub(crate) struct StreamSource<'a, S: ?Sized> {
    pub stream: &'a S,
    pub end: u64,
}

impl<S: Stream + ?Sized> EntrySource for StreamSource<'_, S> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        ensure!(
            offset.saturating_add(buf.len() as u64) <= self.end,
            DirectoryTooSmallSnafu { offset }
        );

        read_exact_at(self.stream, offset, buf)
    }
}

/// Reads the "DV" entry starting at `offset`, without applying any policy.
pub(crate) fn read_raw_entry<E: EntrySource + ?Sized>(source: &E, offset: u64) -> Result<RawEntry> {
    let mut schema = [0u8; 2];
    source.read(offset, &mut schema)?;

    match schema {
        SCHEMA_DV => {}
        SCHEMA_DE => return UnsupportedSchemaSnafu { offset, schema }.fail(),
        _ => return InvalidSchemaSnafu { offset, schema }.fail(),
    }

    let mut buf = [0u8; DV_PREFIX_SIZE as usize];
    source.read(offset, &mut buf)?;

    let prefix = DvEntryPrefixRaw::read_from_bytes(&buf).expect("prefix buffer is correctly sized");
    let count = prefix.dimension_count.get();

    ensure!(
        (0..=MAX_DIMENSIONS as i32).contains(&count),
        TooManyDimensionsSnafu {
            offset: offset + DIMENSION_COUNT_OFFSET,
            count,
            maximum: MAX_DIMENSIONS
        }
    );

    let mut buf = vec![0u8; count as usize * DIMENSION_ENTRY_SIZE as usize];
    source.read(offset + DV_PREFIX_SIZE, &mut buf)?;

    let dimensions = buf
        .chunks_exact(DIMENSION_ENTRY_SIZE as usize)
        .map(|c| DimensionEntryRaw::read_from_bytes(c).expect("chunk is correctly sized"))
        .collect();

    Ok(RawEntry {
        offset,
        prefix,
        dimensions,
    })
}

/// Returns a forward-only walk over the directory segment at `offset`.
///
/// The segment header is validated and its payload loaded immediately; the
/// entries are decoded as the iterator advances. The first error ends the
/// walk.
///
/// # Errors
///
/// Returns [`Error::InvalidMagic`](crate::Error::InvalidMagic) or
/// [`Error::InvalidSegmentSize`](crate::Error::InvalidSegmentSize) for a bad
/// segment header, and [`Error::NotEnoughData`](crate::Error::NotEnoughData)
/// if the declared payload runs past the end of the stream.
pub fn read_subblock_directory<S: Stream + ?Sized>(
    stream: &S,
    offset: u64,
    options: DirectoryParseOptions,
) -> Result<DirectoryEntries> {
    let geometry = read_directory_geometry(stream, offset)?;
    let data = read_vec_at(stream, geometry.entries_offset, geometry.entries_len)?;

    debug!(
        offset,
        entries = geometry.entry_count,
        bytes = geometry.entries_len,
        "loaded sub-block directory"
    );

    Ok(DirectoryEntries {
        source: BufferSource {
            base: geometry.entries_offset,
            data,
        },
        next: geometry.entries_offset,
        index: 0,
        count: geometry.entry_count,
        options,
        failed: false,
    })
}

/// Forward-only iterator over directory entries, created by
/// [`read_subblock_directory()`].
///
/// Yields `(tile_index, entry)`.
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct DirectoryEntries {
    source: BufferSource,
    next: u64,
    index: usize,
    count: usize,
    options: DirectoryParseOptions,
    failed: bool,
}

impl DirectoryEntries {
    /// Walks from the current position to the entry with the given tile
    /// index and returns it, consuming the iterator.
    ///
    /// Every entry before it is decoded (and validated) on the way. Returns
    /// `Ok(None)` if the directory has fewer entries.
    pub fn find_entry(self, index: usize) -> Result<Option<DirectoryEntry>> {
        for item in self {
            let (i, entry) = item?;

            if i == index {
                return Ok(Some(entry));
            }
        }

        Ok(None)
    }

    /// Returns the number of entries the directory header declares.
    #[must_use]
    pub fn declared_len(&self) -> usize {
        self.count
    }
}

impl fmt::Debug for DirectoryEntries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryEntries")
            .field("next", &self.next)
            .field("index", &self.index)
            .field("count", &self.count)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Iterator for DirectoryEntries {
    type Item = Result<(usize, DirectoryEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.index >= self.count {
            return None;
        }

        let result = read_raw_entry(&self.source, self.next).and_then(|raw| {
            let entry = DirectoryEntry::from_raw(&raw, self.options)?;
            self.next = raw.end();
            Ok(entry)
        });

        match result {
            Ok(entry) => {
                let index = self.index;
                self.index += 1;
                Some(Ok((index, entry)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            (0, Some(self.count - self.index))
        }
    }
}

/// Every entry of a sub-block directory, in tile-index order.
#[derive(Debug, Clone)]
pub struct SubBlockDirectory {
    offset: u64,
    entries: Vec<DirectoryEntry>,
}

impl SubBlockDirectory {
    /// Reads and validates the whole directory segment at `offset`.
    pub fn read<S: Stream + ?Sized>(stream: &S, offset: u64, options: DirectoryParseOptions) -> Result<Self> {
        let entries = read_subblock_directory(stream, offset, options)?
            .map(|r| r.map(|(_, entry)| entry))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { offset, entries })
    }

    /// Returns the offset of the directory segment.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entry of the given tile.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&DirectoryEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DirectoryEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<DirectoryEntry> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a SubBlockDirectory {
    type Item = &'a DirectoryEntry;
    type IntoIter = std::slice::Iter<'a, DirectoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Encodes a directory segment holding `entries`.
pub(crate) fn encode_directory(entries: &[DirectoryEntry]) -> Vec<u8> {
    let mut payload = Vec::new();

    for entry in entries {
        entry.encode(&mut payload);
    }

    let size = DIRECTORY_DATA_SIZE + payload.len() as u64;
    let raw = DirectorySegmentRaw {
        header: SegmentHeader::new(SegmentKind::SubBlockDirectory, size, size).to_raw(),
        entry_count: I32::new(entries.len() as i32),
        spare: [0; 124],
    };

    let mut out = raw.as_bytes().to_vec();
    out.extend(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Axis, DimensionEntry, Error, LogicalAxis, MemoryStream};

    fn entry(file_position: u64, w: i32, h: i32) -> DirectoryEntry {
        DirectoryEntry::new(
            PixelType::Bgr24,
            CompressionMode::JpgXr,
            file_position,
            vec![
                DimensionEntry::new(Axis::X, 0, w),
                DimensionEntry::new(Axis::Y, 0, h),
                DimensionEntry::new(Axis::Logical(LogicalAxis::C), 0, 1),
            ],
        )
    }

    fn stream_of(entries: &[DirectoryEntry]) -> MemoryStream<Vec<u8>> {
        MemoryStream::new(encode_directory(entries))
    }

    #[test]
    fn entries_are_yielded_in_order_with_offsets() {
        let stream = stream_of(&[entry(1000, 64, 32), entry(2000, 128, 16)]);

        let entries: Vec<_> = read_subblock_directory(&stream, 0, DirectoryParseOptions::strict())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, 0);
        assert_eq!(entries[0].1.offset(), 160);
        assert_eq!(entries[0].1.file_position(), 1000);
        assert_eq!(entries[1].0, 1);
        assert_eq!(entries[1].1.offset(), 160 + 32 + 3 * 20);
        assert_eq!(entries[1].1.physical_size(), Size::new(128, 16));
    }

    #[test]
    fn geometry_covers_exactly_the_entries() {
        let stream = stream_of(&[entry(1000, 64, 32), entry(2000, 128, 16)]);

        let geometry = read_directory_geometry(&stream, 0).unwrap();

        assert_eq!(geometry.entry_count, 2);
        assert_eq!(geometry.entries_offset, 160);
        assert_eq!(geometry.entries_len, 2 * (32 + 3 * 20));
        assert_eq!(geometry.entries_end(), stream.len());
    }

    #[test]
    fn empty_directory_is_valid() {
        let stream = stream_of(&[]);

        let directory = SubBlockDirectory::read(&stream, 0, DirectoryParseOptions::strict()).unwrap();

        assert!(directory.is_empty());
        assert!(directory.get(0).is_none());
    }

    #[test]
    fn find_entry_walks_from_the_start() {
        let stream = stream_of(&[entry(1, 1, 1), entry(2, 2, 2), entry(3, 3, 3)]);

        let walk = read_subblock_directory(&stream, 0, DirectoryParseOptions::lax()).unwrap();
        assert_eq!(walk.declared_len(), 3);

        let found = walk.find_entry(2).unwrap().unwrap();
        assert_eq!(found.file_position(), 3);

        let walk = read_subblock_directory(&stream, 0, DirectoryParseOptions::lax()).unwrap();
        assert!(walk.find_entry(3).unwrap().is_none());
    }

    #[test]
    fn maximum_dimension_count_is_accepted() {
        let dims = (0..MAX_DIMENSIONS as i32)
            .map(|i| DimensionEntry::new(Axis::Logical(LogicalAxis::Z), i, 1))
            .collect();
        let e = DirectoryEntry::new(PixelType::Gray8, CompressionMode::Uncompressed, 0, dims);

        let directory = SubBlockDirectory::read(&stream_of(&[e]), 0, DirectoryParseOptions::lax()).unwrap();

        assert_eq!(directory.get(0).unwrap().dimensions().len(), MAX_DIMENSIONS);
    }

    #[test]
    fn one_dimension_too_many_is_reported_at_the_count_field() {
        let dims = (0..=MAX_DIMENSIONS as i32)
            .map(|i| DimensionEntry::new(Axis::Logical(LogicalAxis::T), i, 1))
            .collect();
        let e = DirectoryEntry::new(PixelType::Gray8, CompressionMode::Uncompressed, 0, dims);

        let err = SubBlockDirectory::read(&stream_of(&[e]), 0, DirectoryParseOptions::lax()).unwrap_err();

        assert!(matches!(
            err,
            Error::TooManyDimensions {
                offset: 188,
                count: 41,
                maximum: 40
            }
        ));
        assert!(err.is_format());
        assert!(!err.is_validation());
    }

    #[test]
    fn legacy_schema_is_not_supported() {
        let mut data = encode_directory(&[entry(0, 8, 8)]);
        data[160..162].copy_from_slice(b"DE");

        let err = SubBlockDirectory::read(&MemoryStream::new(data), 0, DirectoryParseOptions::lax()).unwrap_err();

        assert!(matches!(err, Error::UnsupportedSchema { offset: 160, .. }));
    }

    #[test]
    fn directory_smaller_than_its_header_is_rejected() {
        let mut data = encode_directory(&[]);
        data[16..24].copy_from_slice(&64i64.to_le_bytes());
        data[24..32].copy_from_slice(&64i64.to_le_bytes());

        let err = SubBlockDirectory::read(&MemoryStream::new(data), 0, DirectoryParseOptions::lax()).unwrap_err();

        assert!(matches!(
            err,
            Error::InvalidSegmentSize {
                offset: 0,
                size: 64,
                minimum: 128
            }
        ));
    }

    #[test]
    fn truncated_payload_is_an_io_error() {
        let mut data = encode_directory(&[entry(0, 8, 8)]);
        let len = data.len();
        data.truncate(len - 10);

        let err = SubBlockDirectory::read(&MemoryStream::new(data), 0, DirectoryParseOptions::lax()).unwrap_err();

        assert!(err.is_io());
        assert!(matches!(
            err,
            Error::NotEnoughData {
                offset: 160,
                requested: 92,
                actual: 82
            }
        ));
    }

    #[test]
    fn entry_count_beyond_payload_is_a_format_error() {
        let mut data = encode_directory(&[entry(0, 8, 8)]);
        data[32..36].copy_from_slice(&2i32.to_le_bytes());

        let mut walk = read_subblock_directory(&MemoryStream::new(data), 0, DirectoryParseOptions::lax()).unwrap();

        assert!(walk.next().unwrap().is_ok());
        assert!(matches!(
            walk.next().unwrap().unwrap_err(),
            Error::DirectoryTooSmall { offset: 252 }
        ));
        assert!(walk.next().is_none());
    }
}
