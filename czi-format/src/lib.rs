//! A library for reading and patching CZI (ZISRAW) microscopy image containers.
//!
//! A CZI file is a sequence of typed, length-prefixed segments: a file header,
//! a sub-block directory, one segment per image tile ("sub-block"), a metadata
//! segment and an attachments directory. This crate decodes those segments,
//! models the sub-block directory and provides the primitives needed to
//! rewrite individual 4-byte fields in place, without resizing or moving any
//! segment.
//!
//! # Features
//!
//! - Parse the file header, segment headers and the sub-block directory
//!   (current "DV" schema) with optional strict validation
//! - Read sub-blocks with a minimum-then-remainder header read
//! - Read the metadata segment, attachments directory and attachments
//! - Patch the stored size of X/Y dimension entries in the directory and in
//!   the sub-block segments, touching nothing else
//! - Assemble well-formed files with [`writer::FileBuilder`]
//!
//! # Example
//!
//! ```no_run
//! use czi_format::{DirectoryParseOptions, MemoryStream, SubBlockDirectory};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = MemoryStream::new(std::fs::read("image.czi")?);
//! let header = czi_format::read_file_header(&stream)?;
//! let directory = SubBlockDirectory::read(
//!     &stream,
//!     header.directory_position(),
//!     DirectoryParseOptions::lax(),
//! )?;
//!
//! for (index, entry) in directory.iter().enumerate() {
//!     println!("tile {index}: {:?} {}", entry.compression(), entry.physical_size());
//! }
//! # Ok(())
//! # }
//! ```

use snafu::Snafu;
use std::io;

pub mod attachment;
pub mod dimension;
pub mod directory;
pub mod header;
pub mod metadata;
pub mod patch;
pub mod segment;
pub mod stream;
pub mod subblock;
pub mod writer;

pub use self::attachment::{Attachment, AttachmentEntry, read_attachment, read_attachments_directory};
pub use self::dimension::{Axis, DimensionEntry, LogicalAxis};
pub use self::directory::{
    CompressionMode, DirectoryEntries, DirectoryEntry, DirectoryParseOptions, PixelType, Rect, Size,
    SubBlockDirectory, read_subblock_directory,
};
pub use self::header::{FileHeader, read_file_header};
pub use self::metadata::{MetadataSegment, read_metadata_segment};
pub use self::patch::{patch_subblock, patch_subblock_directory};
pub use self::segment::{SegmentHeader, SegmentKind, read_segment_header, read_segment_header_any, segments};
pub use self::stream::{MemoryStream, Stream, StreamMut};
pub use self::subblock::{SubBlock, SubBlockHeader, SubBlockPayload, read_subblock, read_subblock_header};

/// Errors raised while decoding or patching a container.
///
/// Every variant carries the byte offset it refers to. Errors fall into three
/// disjoint classes: [`Error::is_io()`] for truncated or unreadable input,
/// [`Error::is_format()`] for corrupt content and [`Error::is_validation()`]
/// for entries rejected by an enabled [`DirectoryParseOptions`] check.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("cannot read {length} bytes at offset {offset}"))]
    ReadFailed {
        offset: u64,
        length: u64,
        source: io::Error,
    },

    #[snafu(display(
        "not enough data at offset {offset}: requested {requested} bytes, got {actual}"
    ))]
    NotEnoughData {
        offset: u64,
        requested: u64,
        actual: u64,
    },

    #[snafu(display("cannot write {length} bytes at offset {offset}"))]
    WriteFailed {
        offset: u64,
        length: u64,
        source: io::Error,
    },

    #[snafu(display("invalid {kind} magic at offset {offset}"))]
    InvalidMagic { offset: u64, kind: SegmentKind },

    #[snafu(display("unknown segment magic at offset {offset}"))]
    UnknownSegment { offset: u64 },

    #[snafu(display(
        "invalid segment size at offset {offset}: {size} is smaller than {minimum}"
    ))]
    InvalidSegmentSize { offset: u64, size: u64, minimum: u64 },

    #[snafu(display("sub-block directory data too small at offset {offset}"))]
    DirectoryTooSmall { offset: u64 },

    #[snafu(display("invalid entry count {count} at offset {offset}"))]
    InvalidEntryCount { offset: u64, count: i32 },

    #[snafu(display(
        "dimension count {count} at offset {offset} exceeds the maximum of {maximum}"
    ))]
    TooManyDimensions { offset: u64, count: i32, maximum: usize },

    #[snafu(display("unknown dimension {code:?} at offset {offset}"))]
    UnknownDimension { offset: u64, code: [u8; 4] },

    #[snafu(display(
        "unsupported entry schema {:?} at offset {offset}",
        String::from_utf8_lossy(schema)
    ))]
    UnsupportedSchema { offset: u64, schema: [u8; 2] },

    #[snafu(display("invalid entry schema {schema:?} at offset {offset}"))]
    InvalidSchema { offset: u64, schema: [u8; 2] },

    #[snafu(display("no coordinate/size given for {missing} (entry at offset {offset})"))]
    MissingXy { offset: u64, missing: &'static str },

    #[snafu(display(
        "size for dimension '{axis}' is expected to be 1, but found {size} (entry at offset {offset})"
    ))]
    SizeNotOne {
        offset: u64,
        axis: LogicalAxis,
        size: i32,
    },

    #[snafu(display(
        "stored size for dimension '{axis}' is expected to be 1, but found {size} (entry at offset {offset})"
    ))]
    StoredSizeNotOne {
        offset: u64,
        axis: LogicalAxis,
        size: i32,
    },

    #[snafu(display(
        "size for dimension 'M' is expected to be 1, but found {size} (entry at offset {offset})"
    ))]
    MSizeNotOne { offset: u64, size: i32 },

    #[snafu(display(
        "size for dimension 'M' of non-pyramid sub-block is expected to be 1, but found {size} (entry at offset {offset})"
    ))]
    PyramidMSizeNotOne { offset: u64, size: i32 },
}

impl Error {
    /// Returns `true` for read/write failures, including short reads.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(
            self,
            Self::ReadFailed { .. } | Self::NotEnoughData { .. } | Self::WriteFailed { .. }
        )
    }

    /// Returns `true` if the content of the container is malformed.
    ///
    /// Policy violations are not format errors; see [`Error::is_validation()`].
    #[must_use]
    pub const fn is_format(&self) -> bool {
        !self.is_io() && !self.is_validation()
    }

    /// Returns `true` for directory-entry policy violations, which are only
    /// raised when the matching [`DirectoryParseOptions`] flag is set.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingXy { .. }
                | Self::SizeNotOne { .. }
                | Self::StoredSizeNotOne { .. }
                | Self::MSizeNotOne { .. }
                | Self::PyramidMSizeNotOne { .. }
        )
    }

    /// Returns the byte offset the error refers to.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        match self {
            Self::ReadFailed { offset, .. }
            | Self::NotEnoughData { offset, .. }
            | Self::WriteFailed { offset, .. }
            | Self::InvalidMagic { offset, .. }
            | Self::UnknownSegment { offset }
            | Self::InvalidSegmentSize { offset, .. }
            | Self::DirectoryTooSmall { offset }
            | Self::InvalidEntryCount { offset, .. }
            | Self::TooManyDimensions { offset, .. }
            | Self::UnknownDimension { offset, .. }
            | Self::UnsupportedSchema { offset, .. }
            | Self::InvalidSchema { offset, .. }
            | Self::MissingXy { offset, .. }
            | Self::SizeNotOne { offset, .. }
            | Self::StoredSizeNotOne { offset, .. }
            | Self::MSizeNotOne { offset, .. }
            | Self::PyramidMSizeNotOne { offset, .. } => *offset,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
