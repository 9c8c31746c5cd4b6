use std::cmp::max;

use snafu::ensure;
use tracing::trace;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    little_endian::{I32, I64},
};

use crate::dimension::{DIMENSION_ENTRY_SIZE, MAX_DIMENSIONS};
use crate::directory::{
    BufferSource, DV_PREFIX_SIZE, DirectoryEntry, DirectoryParseOptions, DvEntryPrefixRaw, SCHEMA_DV,
    read_raw_entry,
};
use crate::segment::{SEGMENT_HEADER_SIZE, SegmentHeader, SegmentHeaderRaw, SegmentKind};
use crate::stream::{Stream, read_exact_at, read_into_vec};
use crate::{InvalidMagicSnafu, Result};

/// Minimum size of the sub-block segment data before the payloads.
pub const SUBBLOCK_MIN_DATA_SIZE: u64 = 256;

/// Fixed fields at the start of a sub-block segment.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub(crate) struct SubBlockFixedRaw {
    pub header: SegmentHeaderRaw, // 0x00
    pub metadata_size: I32,       // 0x20
    pub attachment_size: I32,     // 0x24
    pub data_size: I64,           // 0x28
}

/// Size of the fixed sub-block fields following the segment header.
pub(crate) const SUBBLOCK_FIXED_SIZE: u64 = size_of::<SubBlockFixedRaw>() as u64 - SEGMENT_HEADER_SIZE;

/// Offset of the embedded directory entry within the segment.
pub const SUBBLOCK_ENTRY_OFFSET: u64 = SEGMENT_HEADER_SIZE + SUBBLOCK_FIXED_SIZE;

/// Decoded header of a sub-block segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SubBlockHeader {
    offset: u64,
    segment: SegmentHeader,
    metadata_size: u64,
    attachment_size: u64,
    data_size: u64,
    entry: DirectoryEntry,
}

impl SubBlockHeader {
    /// Returns the offset of the sub-block segment.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub const fn segment(&self) -> &SegmentHeader {
        &self.segment
    }

    #[must_use]
    pub const fn metadata_size(&self) -> u64 {
        self.metadata_size
    }

    #[must_use]
    pub const fn attachment_size(&self) -> u64 {
        self.attachment_size
    }

    /// Returns the size of the compressed bitmap.
    #[must_use]
    pub const fn data_size(&self) -> u64 {
        self.data_size
    }

    /// Returns the tile's own copy of its directory entry.
    #[must_use]
    pub const fn entry(&self) -> &DirectoryEntry {
        &self.entry
    }

    /// Returns the file offset of the first payload (the metadata).
    ///
    /// The segment data is at least [`SUBBLOCK_MIN_DATA_SIZE`] bytes, padded
    /// if the entry is shorter.
    #[must_use]
    pub fn payload_offset(&self) -> u64 {
        let used = SUBBLOCK_FIXED_SIZE + self.entry.encoded_len();
        self.offset + SEGMENT_HEADER_SIZE + max(used, SUBBLOCK_MIN_DATA_SIZE)
    }

    /// Returns the file offset of the compressed bitmap.
    #[must_use]
    pub fn data_offset(&self) -> u64 {
        self.payload_offset() + self.metadata_size
    }

    /// Returns the file offset of the attachment payload.
    #[must_use]
    pub fn attachment_offset(&self) -> u64 {
        self.data_offset() + self.data_size
    }
}

/// Reads the header of the sub-block segment at `offset`.
///
/// A fixed minimum is read first; the rest of the embedded entry is only read
/// when its dimension count calls for it.
pub fn read_subblock_header<S: Stream + ?Sized>(stream: &S, offset: u64) -> Result<SubBlockHeader> {
    let min_len = (SEGMENT_HEADER_SIZE + SUBBLOCK_MIN_DATA_SIZE) as usize;
    let mut data = vec![0u8; min_len];
    read_exact_at(stream, offset, &mut data)?;

    let (fixed, rest) = SubBlockFixedRaw::read_from_prefix(&data).expect("header buffer is correctly sized");
    let (prefix, _) = DvEntryPrefixRaw::read_from_prefix(rest).expect("header buffer is correctly sized");
    let segment = SegmentHeader::from_raw(&fixed.header);

    ensure!(
        segment.kind() == Some(SegmentKind::SubBlock),
        InvalidMagicSnafu {
            offset,
            kind: SegmentKind::SubBlock
        }
    );

    let metadata_size = fixed.metadata_size.get() as u32 as u64;
    let attachment_size = fixed.attachment_size.get() as u32 as u64;
    let data_size = fixed.data_size.get() as u64;

    // An oversized count is left for the entry reader to report.
    let count = if prefix.schema == SCHEMA_DV {
        prefix.dimension_count.get().clamp(0, MAX_DIMENSIONS as i32) as u64
    } else {
        0
    };

    let needed = SUBBLOCK_ENTRY_OFFSET + DV_PREFIX_SIZE + count * DIMENSION_ENTRY_SIZE;

    if needed > min_len as u64 {
        trace!(offset, needed, "reading remainder of sub-block header");

        let mut rest = vec![0u8; needed as usize - min_len];
        read_exact_at(stream, offset + min_len as u64, &mut rest)?;
        data.extend(rest);
    }

    let source = BufferSource { base: offset, data };
    let raw = read_raw_entry(&source, offset + SUBBLOCK_ENTRY_OFFSET)?;

    let entry = DirectoryEntry::from_raw(&raw, DirectoryParseOptions::lax())?;

    Ok(SubBlockHeader {
        offset,
        segment,
        metadata_size,
        attachment_size,
        data_size,
        entry,
    })
}

/// Reusable buffers for the payloads of a sub-block.
///
/// Passing the same value to successive [`read_subblock()`] calls keeps the
/// allocations across tiles.
#[derive(Debug, Clone, Default)]
pub struct SubBlockPayload {
    pub metadata: Vec<u8>,
    pub data: Vec<u8>,
    pub attachment: Vec<u8>,
}

/// Reads the sub-block segment at `offset`, loading its metadata, bitmap and
/// attachment into `payload`.
///
/// # Errors
///
/// Returns [`Error::InvalidMagic`](crate::Error::InvalidMagic) if there is no
/// sub-block at `offset`,
/// [`Error::TooManyDimensions`](crate::Error::TooManyDimensions) for a corrupt
/// embedded entry, and an I/O error if a payload runs past the end of the
/// stream.
pub fn read_subblock<S: Stream + ?Sized>(
    stream: &S,
    offset: u64,
    payload: &mut SubBlockPayload,
) -> Result<SubBlockHeader> {
    let header = read_subblock_header(stream, offset)?;

    read_into_vec(stream, header.payload_offset(), header.metadata_size, &mut payload.metadata)?;
    read_into_vec(stream, header.data_offset(), header.data_size, &mut payload.data)?;
    read_into_vec(
        stream,
        header.attachment_offset(),
        header.attachment_size,
        &mut payload.attachment,
    )?;

    Ok(header)
}

/// A sub-block with its payloads loaded.
#[derive(Debug, Clone)]
pub struct SubBlock {
    pub header: SubBlockHeader,
    pub payload: SubBlockPayload,
}

impl SubBlock {
    pub fn read<S: Stream + ?Sized>(stream: &S, offset: u64) -> Result<Self> {
        let mut payload = SubBlockPayload::default();
        let header = read_subblock(stream, offset, &mut payload)?;

        Ok(Self { header, payload })
    }

    /// Returns the compressed bitmap.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.payload.data
    }
}

/// Encodes a whole sub-block segment.
pub(crate) fn encode_subblock(entry: &DirectoryEntry, metadata: &[u8], data: &[u8], attachment: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    entry.encode(&mut body);

    let used = max(SUBBLOCK_FIXED_SIZE + body.len() as u64, SUBBLOCK_MIN_DATA_SIZE);
    body.resize((used - SUBBLOCK_FIXED_SIZE) as usize, 0);

    let size = used + (metadata.len() + data.len() + attachment.len()) as u64;
    let fixed = SubBlockFixedRaw {
        header: SegmentHeader::new(SegmentKind::SubBlock, size, size).to_raw(),
        metadata_size: I32::new(metadata.len() as i32),
        attachment_size: I32::new(attachment.len() as i32),
        data_size: I64::new(data.len() as i64),
    };

    let mut out = fixed.as_bytes().to_vec();
    out.extend(body);
    out.extend_from_slice(metadata);
    out.extend_from_slice(data);
    out.extend_from_slice(attachment);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{CompressionMode, PixelType};
    use crate::{Axis, DimensionEntry, Error, LogicalAxis, MemoryStream};

    fn entry(extra: usize) -> DirectoryEntry {
        let mut dims = vec![
            DimensionEntry::new(Axis::X, 10, 100).with_stored_size(50),
            DimensionEntry::new(Axis::Y, 20, 80).with_stored_size(40),
        ];
        dims.extend((0..extra).map(|i| DimensionEntry::new(Axis::Logical(LogicalAxis::Z), i as i32, 1)));

        DirectoryEntry::new(PixelType::Gray16, CompressionMode::JpgXr, 0, dims)
    }

    #[test]
    fn short_entry_is_padded_to_the_minimum() {
        let segment = encode_subblock(&entry(0), b"<m/>", b"bitmap", b"att");
        // 32 + 256 + payloads
        assert_eq!(segment.len(), 288 + 4 + 6 + 3);

        let mut stream_data = vec![0xAA; 64];
        stream_data.extend(segment);
        let stream = MemoryStream::new(stream_data);

        let block = SubBlock::read(&stream, 64).unwrap();

        assert_eq!(block.header.offset(), 64);
        assert_eq!(block.header.payload_offset(), 64 + 288);
        assert_eq!(block.payload.metadata, b"<m/>");
        assert_eq!(block.data(), b"bitmap");
        assert_eq!(block.payload.attachment, b"att");
        assert_eq!(block.header.entry().physical_size().width, 50);
        assert_eq!(block.header.entry().logical_rect().h, 80);
    }

    #[test]
    fn long_entry_needs_a_second_read() {
        // 16 + 32 + 20 * 12 = 288 > 256
        let e = entry(10);
        let segment = encode_subblock(&e, &[], &[1, 2, 3, 4], &[]);
        assert_eq!(segment.len(), 32 + 288 + 4);

        let stream = MemoryStream::new(segment);
        let mut payload = SubBlockPayload::default();
        let header = read_subblock(&stream, 0, &mut payload).unwrap();

        assert_eq!(header.entry().dimensions(), e.dimensions());
        assert_eq!(header.payload_offset(), 32 + 288);
        assert_eq!(payload.data, [1, 2, 3, 4]);
    }

    #[test]
    fn payload_buffers_are_reused() {
        let stream = MemoryStream::new(encode_subblock(&entry(0), &[], &[7; 32], &[]));
        let mut payload = SubBlockPayload {
            data: Vec::with_capacity(1024),
            ..Default::default()
        };

        read_subblock(&stream, 0, &mut payload).unwrap();

        assert_eq!(payload.data.len(), 32);
        assert!(payload.data.capacity() >= 1024);
    }

    #[test]
    fn oversized_dimension_count_is_rejected() {
        let mut segment = encode_subblock(&entry(0), &[], &[], &[]);
        segment[48 + 28..48 + 32].copy_from_slice(&41i32.to_le_bytes());

        let err = read_subblock_header(&MemoryStream::new(segment), 0).unwrap_err();

        assert!(matches!(err, Error::TooManyDimensions { offset: 76, count: 41, .. }));
    }

    #[test]
    fn segment_shorter_than_the_minimum_is_an_io_error() {
        let mut segment = encode_subblock(&entry(0), &[], &[], &[]);
        segment.truncate(200);

        let err = read_subblock_header(&MemoryStream::new(segment), 0).unwrap_err();

        assert!(matches!(
            err,
            Error::NotEnoughData {
                offset: 0,
                requested: 288,
                actual: 200
            }
        ));
    }

    #[test]
    fn truncated_bitmap_is_an_io_error() {
        let mut segment = encode_subblock(&entry(0), &[], &[0; 100], &[]);
        segment.truncate(288 + 50);

        let err = SubBlock::read(&MemoryStream::new(segment), 0).unwrap_err();

        assert!(err.is_io());
        assert_eq!(err.offset(), 288);
    }
}
