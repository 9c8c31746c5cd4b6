use std::fmt::{Display, Formatter};

use snafu::ensure;
use tracing::warn;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, little_endian::I64,
};

use crate::stream::{Stream, read_exact_at};
use crate::{InvalidMagicSnafu, Result, UnknownSegmentSnafu};

/// Size of the header that starts every segment.
pub const SEGMENT_HEADER_SIZE: u64 = size_of::<SegmentHeaderRaw>() as u64;

/// Raw segment header (32 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub(crate) struct SegmentHeaderRaw {
    /// 0x00: NUL-padded ASCII identifier.
    pub id: [u8; 16],
    /// 0x10: Bytes reserved for the segment data.
    pub allocated_size: I64,
    /// 0x18: Bytes actually used, 0 in some early files.
    pub used_size: I64,
}

/// The kinds of segments a container may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    FileHeader,
    SubBlockDirectory,
    SubBlock,
    Metadata,
    AttachmentDirectory,
    Attachment,
    /// A dropped segment that readers skip.
    Deleted,
}

impl SegmentKind {
    pub const ALL: [Self; 7] = [
        Self::FileHeader,
        Self::SubBlockDirectory,
        Self::SubBlock,
        Self::Metadata,
        Self::AttachmentDirectory,
        Self::Attachment,
        Self::Deleted,
    ];

    /// Returns the 16-byte magic identifying this kind of segment.
    #[must_use]
    pub const fn magic(self) -> &'static [u8; 16] {
        match self {
            Self::FileHeader => b"ZISRAWFILE\0\0\0\0\0\0",
            Self::SubBlockDirectory => b"ZISRAWDIRECTORY\0",
            Self::SubBlock => b"ZISRAWSUBBLOCK\0\0",
            Self::Metadata => b"ZISRAWMETADATA\0\0",
            Self::AttachmentDirectory => b"ZISRAWATTDIR\0\0\0\0",
            Self::Attachment => b"ZISRAWATTACH\0\0\0\0",
            Self::Deleted => b"DELETED\0\0\0\0\0\0\0\0\0",
        }
    }

    /// Identifies a segment by its magic.
    #[must_use]
    pub fn from_magic(id: &[u8; 16]) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.magic() == id)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::FileHeader => "file header",
            Self::SubBlockDirectory => "sub-block directory",
            Self::SubBlock => "sub-block",
            Self::Metadata => "metadata",
            Self::AttachmentDirectory => "attachment directory",
            Self::Attachment => "attachment",
            Self::Deleted => "deleted",
        }
    }
}

impl Display for SegmentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    kind: Option<SegmentKind>,
    allocated_size: u64,
    used_size: u64,
}

impl SegmentHeader {
    pub const fn new(kind: SegmentKind, allocated_size: u64, used_size: u64) -> Self {
        Self {
            kind: Some(kind),
            allocated_size,
            used_size,
        }
    }

    pub(crate) fn from_raw(raw: &SegmentHeaderRaw) -> Self {
        Self {
            kind: SegmentKind::from_magic(&raw.id),
            allocated_size: raw.allocated_size.get() as u64,
            used_size: raw.used_size.get() as u64,
        }
    }

    pub(crate) fn to_raw(self) -> SegmentHeaderRaw {
        SegmentHeaderRaw {
            id: self.kind.map(|k| *k.magic()).unwrap_or_default(),
            allocated_size: I64::new(self.allocated_size as i64),
            used_size: I64::new(self.used_size as i64),
        }
    }

    /// Returns the segment kind, or `None` if the magic is not known.
    #[must_use]
    pub const fn kind(&self) -> Option<SegmentKind> {
        self.kind
    }

    #[must_use]
    pub const fn allocated_size(&self) -> u64 {
        self.allocated_size
    }

    #[must_use]
    pub const fn used_size(&self) -> u64 {
        self.used_size
    }

    /// Returns the number of meaningful data bytes in the segment.
    ///
    /// Early writers left the used size at 0; the allocated size is used in
    /// that case.
    #[must_use]
    pub const fn effective_size(&self) -> u64 {
        if self.used_size == 0 {
            self.allocated_size
        } else {
            self.used_size
        }
    }

    /// Returns the offset of the segment following one that starts at `offset`.
    #[must_use]
    pub const fn next_offset(&self, offset: u64) -> u64 {
        offset
            .saturating_add(SEGMENT_HEADER_SIZE)
            .saturating_add(self.allocated_size)
    }
}

/// Reads the segment header at `offset` and checks that it is of `kind`.
pub fn read_segment_header<S: Stream + ?Sized>(
    stream: &S,
    offset: u64,
    kind: SegmentKind,
) -> Result<SegmentHeader> {
    let header = read_segment_header_any(stream, offset)?;

    ensure!(
        header.kind() == Some(kind),
        InvalidMagicSnafu { offset, kind }
    );

    Ok(header)
}

/// Reads the segment header at `offset` without checking its magic.
pub fn read_segment_header_any<S: Stream + ?Sized>(stream: &S, offset: u64) -> Result<SegmentHeader> {
    let mut buf = [0u8; SEGMENT_HEADER_SIZE as usize];
    read_exact_at(stream, offset, &mut buf)?;

    let raw = SegmentHeaderRaw::read_from_bytes(&buf).expect("header buffer is correctly sized");
    let header = SegmentHeader::from_raw(&raw);

    if header.used_size > header.allocated_size {
        warn!(
            offset,
            used = header.used_size,
            allocated = header.allocated_size,
            "segment used size exceeds its allocated size"
        );
    }

    Ok(header)
}

/// Returns an iterator over every segment, starting with the file header.
///
/// The walk follows the allocated sizes from one segment to the next and
/// stops cleanly at the end of the stream.
pub fn segments<S: Stream + ?Sized>(stream: &S) -> Segments<'_, S> {
    Segments {
        stream,
        offset: 0,
        done: false,
    }
}

/// Iterator over the segments of a container, created by [`segments()`].
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Segments<'a, S: ?Sized> {
    stream: &'a S,
    offset: u64,
    done: bool,
}

impl<S: ?Sized> std::fmt::Debug for Segments<'_, S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segments")
            .field("offset", &self.offset)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<S: Stream + ?Sized> Iterator for Segments<'_, S> {
    type Item = Result<(u64, SegmentKind, SegmentHeader)>;

    fn next(&mut self) -> Option<Self::Item> {
        // A trailing fragment shorter than a header is not a segment.
        if self.done || self.stream.len().saturating_sub(self.offset) < SEGMENT_HEADER_SIZE {
            return None;
        }

        let offset = self.offset;
        let header = match read_segment_header_any(self.stream, offset) {
            Ok(v) => v,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let Some(kind) = header.kind() else {
            self.done = true;
            return Some(UnknownSegmentSnafu { offset }.fail());
        };

        self.offset = header.next_offset(offset);

        Some(Ok((offset, kind, header)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStream;

    fn raw_header(kind: SegmentKind, allocated: i64, used: i64) -> Vec<u8> {
        SegmentHeader::new(kind, allocated as u64, used as u64)
            .to_raw()
            .as_bytes()
            .to_vec()
    }

    #[test]
    fn magics_are_sixteen_bytes_and_distinct() {
        for kind in SegmentKind::ALL {
            assert_eq!(SegmentKind::from_magic(kind.magic()), Some(kind));
        }
    }

    #[test]
    fn wrong_magic_is_a_format_error() {
        let stream = MemoryStream::new(raw_header(SegmentKind::Metadata, 0, 0));

        let err = read_segment_header(&stream, 0, SegmentKind::SubBlock).unwrap_err();

        assert!(err.is_format());
        assert!(matches!(
            err,
            crate::Error::InvalidMagic {
                offset: 0,
                kind: SegmentKind::SubBlock
            }
        ));
    }

    #[test]
    fn zero_used_size_falls_back_to_allocated() {
        let stream = MemoryStream::new(raw_header(SegmentKind::SubBlockDirectory, 512, 0));

        let header = read_segment_header(&stream, 0, SegmentKind::SubBlockDirectory).unwrap();

        assert_eq!(header.effective_size(), 512);
    }

    #[test]
    fn segments_follow_allocated_sizes() {
        let mut data = raw_header(SegmentKind::FileHeader, 8, 8);
        data.extend_from_slice(&[0; 8]);
        data.extend(raw_header(SegmentKind::Deleted, 0, 0));
        data.extend(raw_header(SegmentKind::Metadata, 4, 2));
        data.extend_from_slice(&[0; 4]);

        let stream = MemoryStream::new(data);
        let found: Vec<_> = segments(&stream)
            .map(|r| r.map(|(offset, kind, _)| (offset, kind)))
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(
            found,
            [
                (0, SegmentKind::FileHeader),
                (40, SegmentKind::Deleted),
                (72, SegmentKind::Metadata),
            ]
        );
    }
}
