use uuid::Uuid;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    little_endian::{I32, I64},
};

use crate::segment::{SEGMENT_HEADER_SIZE, SegmentHeader, SegmentHeaderRaw, SegmentKind};
use crate::stream::{Stream, read_exact_at};
use crate::{InvalidMagicSnafu, Result};

/// Size of the file header segment data.
pub(crate) const FILE_HEADER_DATA_SIZE: usize = 512;

/// Raw file header segment (32-byte segment header + 512 bytes of data).
///
/// The segment always starts at offset 0.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub(crate) struct FileHeaderSegmentRaw {
    header: SegmentHeaderRaw,           // 0x000
    major: I32,                         // 0x020
    minor: I32,                         // 0x024
    reserved1: I32,                     // 0x028
    reserved2: I32,                     // 0x02C
    primary_file_guid: [u8; 16],        // 0x030
    file_guid: [u8; 16],                // 0x040
    file_part: I32,                     // 0x050
    directory_position: I64,            // 0x054
    metadata_position: I64,             // 0x05C
    update_pending: I32,                // 0x064
    attachment_directory_position: I64, // 0x068
    spare: [u8; 432],                   // 0x070
}

const _: () = assert!(
    size_of::<FileHeaderSegmentRaw>() == SEGMENT_HEADER_SIZE as usize + FILE_HEADER_DATA_SIZE
);

/// Parsed file header.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct FileHeader {
    major: i32,
    minor: i32,
    primary_file_guid: Uuid,
    file_guid: Uuid,
    file_part: i32,
    directory_position: u64,
    metadata_position: u64,
    update_pending: bool,
    attachment_directory_position: u64,
}

impl FileHeader {
    /// Creates a version 1.0 header with the given segment positions.
    pub fn new(directory_position: u64, metadata_position: u64, attachment_directory_position: u64) -> Self {
        Self {
            major: 1,
            minor: 0,
            primary_file_guid: Uuid::nil(),
            file_guid: Uuid::nil(),
            file_part: 0,
            directory_position,
            metadata_position,
            update_pending: false,
            attachment_directory_position,
        }
    }

    /// Sets the file GUIDs.
    pub fn with_guids(mut self, primary: Uuid, file: Uuid) -> Self {
        self.primary_file_guid = primary;
        self.file_guid = file;
        self
    }

    fn from_raw(raw: &FileHeaderSegmentRaw) -> Self {
        Self {
            major: raw.major.get(),
            minor: raw.minor.get(),
            // GUIDs are stored in the Windows mixed-endian layout.
            primary_file_guid: Uuid::from_bytes_le(raw.primary_file_guid),
            file_guid: Uuid::from_bytes_le(raw.file_guid),
            file_part: raw.file_part.get(),
            directory_position: raw.directory_position.get() as u64,
            metadata_position: raw.metadata_position.get() as u64,
            update_pending: raw.update_pending.get() != 0,
            attachment_directory_position: raw.attachment_directory_position.get() as u64,
        }
    }

    /// Encodes the whole file header segment.
    pub fn to_bytes(&self) -> Vec<u8> {
        let raw = FileHeaderSegmentRaw {
            header: SegmentHeader::new(
                SegmentKind::FileHeader,
                FILE_HEADER_DATA_SIZE as u64,
                FILE_HEADER_DATA_SIZE as u64,
            )
            .to_raw(),
            major: I32::new(self.major),
            minor: I32::new(self.minor),
            reserved1: I32::ZERO,
            reserved2: I32::ZERO,
            primary_file_guid: self.primary_file_guid.to_bytes_le(),
            file_guid: self.file_guid.to_bytes_le(),
            file_part: I32::new(self.file_part),
            directory_position: I64::new(self.directory_position as i64),
            metadata_position: I64::new(self.metadata_position as i64),
            update_pending: I32::new(self.update_pending as i32),
            attachment_directory_position: I64::new(self.attachment_directory_position as i64),
            spare: [0; 432],
        };

        raw.as_bytes().to_vec()
    }

    /// Returns the format version as `(major, minor)`.
    #[must_use]
    pub const fn version(&self) -> (i32, i32) {
        (self.major, self.minor)
    }

    #[must_use]
    pub const fn primary_file_guid(&self) -> &Uuid {
        &self.primary_file_guid
    }

    #[must_use]
    pub const fn file_guid(&self) -> &Uuid {
        &self.file_guid
    }

    #[must_use]
    pub const fn file_part(&self) -> i32 {
        self.file_part
    }

    /// Returns the offset of the sub-block directory segment.
    #[must_use]
    pub const fn directory_position(&self) -> u64 {
        self.directory_position
    }

    /// Returns the offset of the metadata segment, 0 if there is none.
    #[must_use]
    pub const fn metadata_position(&self) -> u64 {
        self.metadata_position
    }

    /// Returns the offset of the attachments directory segment, 0 if there is none.
    #[must_use]
    pub const fn attachment_directory_position(&self) -> u64 {
        self.attachment_directory_position
    }

    #[must_use]
    pub const fn update_pending(&self) -> bool {
        self.update_pending
    }
}

/// Reads and validates the file header segment at offset 0.
///
/// # Errors
///
/// Returns [`Error::NotEnoughData`](crate::Error::NotEnoughData) if the stream
/// is shorter than the header and [`Error::InvalidMagic`](crate::Error::InvalidMagic)
/// if the segment is not a file header.
pub fn read_file_header<S: Stream + ?Sized>(stream: &S) -> Result<FileHeader> {
    let mut buf = [0u8; size_of::<FileHeaderSegmentRaw>()];
    read_exact_at(stream, 0, &mut buf)?;

    let raw = FileHeaderSegmentRaw::read_from_bytes(&buf).expect("header buffer is correctly sized");

    snafu::ensure!(
        &raw.header.id == SegmentKind::FileHeader.magic(),
        InvalidMagicSnafu {
            offset: 0u64,
            kind: SegmentKind::FileHeader
        }
    );

    Ok(FileHeader::from_raw(&raw))
}
