use tracing::warn;
use uuid::Uuid;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    little_endian::{I32, I64},
};

use crate::segment::{SEGMENT_HEADER_SIZE, SegmentHeader, SegmentHeaderRaw, SegmentKind};
use crate::stream::{Stream, read_exact_at, read_vec_at};
use crate::{InvalidEntryCountSnafu, InvalidMagicSnafu, Result};

/// Size of the attachments directory data preceding the entries.
pub const ATTACHMENT_DIRECTORY_DATA_SIZE: u64 = 256;

/// Size of the attachment segment data preceding the payload.
pub const ATTACHMENT_DATA_SIZE: u64 = 256;

const SCHEMA_A1: [u8; 2] = *b"A1";

/// Raw "A1" attachment entry (128 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct AttachmentEntryRaw {
    schema: [u8; 2],            // 0x00
    spare: [u8; 10],            // 0x02
    file_position: I64,         // 0x0C
    file_part: I32,             // 0x14
    content_guid: [u8; 16],     // 0x18
    content_file_type: [u8; 8], // 0x28
    name: [u8; 80],             // 0x30
}

const ATTACHMENT_ENTRY_SIZE: usize = size_of::<AttachmentEntryRaw>();

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct AttachmentDirectoryRaw {
    header: SegmentHeaderRaw, // 0x00
    entry_count: I32,         // 0x20
    spare: [u8; 252],         // 0x24
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct AttachmentSegmentRaw {
    header: SegmentHeaderRaw,  // 0x000
    data_size: I64,            // 0x020
    spare1: [u8; 8],           // 0x028
    entry: AttachmentEntryRaw, // 0x030
    spare2: [u8; 112],         // 0x0B0
}

const _: () = {
    assert!(ATTACHMENT_ENTRY_SIZE == 128);
    assert!(size_of::<AttachmentDirectoryRaw>() as u64 == SEGMENT_HEADER_SIZE + ATTACHMENT_DIRECTORY_DATA_SIZE);
    assert!(size_of::<AttachmentSegmentRaw>() as u64 == SEGMENT_HEADER_SIZE + ATTACHMENT_DATA_SIZE);
};

/// An entry of the attachments directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentEntry {
    pub file_position: u64,
    pub file_part: i32,
    pub content_guid: Uuid,
    /// Short type tag such as `JPG` or `CZTIMS`.
    pub content_file_type: String,
    /// Name such as `Thumbnail` or `Label`.
    pub name: String,
}

impl AttachmentEntry {
    fn from_raw(raw: &AttachmentEntryRaw) -> Self {
        Self {
            file_position: raw.file_position.get() as u64,
            file_part: raw.file_part.get(),
            content_guid: Uuid::from_bytes_le(raw.content_guid),
            content_file_type: c_str(&raw.content_file_type),
            name: c_str(&raw.name),
        }
    }

    fn to_raw(&self) -> AttachmentEntryRaw {
        let mut raw = AttachmentEntryRaw {
            schema: SCHEMA_A1,
            spare: [0; 10],
            file_position: I64::new(self.file_position as i64),
            file_part: I32::new(self.file_part),
            content_guid: self.content_guid.to_bytes_le(),
            content_file_type: [0; 8],
            name: [0; 80],
        };

        copy_c_str(&mut raw.content_file_type, &self.content_file_type);
        copy_c_str(&mut raw.name, &self.name);
        raw
    }
}

fn c_str(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

// Truncates to leave room for at least one NUL.
fn copy_c_str(dst: &mut [u8], src: &str) {
    let n = src.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&src.as_bytes()[..n]);
}

/// Reads the attachments directory segment at `offset`.
///
/// Entries with a schema other than "A1" are skipped.
pub fn read_attachments_directory<S: Stream + ?Sized>(stream: &S, offset: u64) -> Result<Vec<AttachmentEntry>> {
    let mut buf = [0u8; size_of::<AttachmentDirectoryRaw>()];
    read_exact_at(stream, offset, &mut buf)?;

    let raw = AttachmentDirectoryRaw::read_from_bytes(&buf).expect("header buffer is correctly sized");

    snafu::ensure!(
        SegmentHeader::from_raw(&raw.header).kind() == Some(SegmentKind::AttachmentDirectory),
        InvalidMagicSnafu {
            offset,
            kind: SegmentKind::AttachmentDirectory
        }
    );

    let count = raw.entry_count.get();

    snafu::ensure!(
        count >= 0,
        InvalidEntryCountSnafu {
            offset: offset + SEGMENT_HEADER_SIZE,
            count
        }
    );

    let entries_offset = offset + buf.len() as u64;
    let data = read_vec_at(stream, entries_offset, count as u64 * ATTACHMENT_ENTRY_SIZE as u64)?;
    let mut entries = Vec::with_capacity(count as usize);

    for (i, chunk) in data.chunks_exact(ATTACHMENT_ENTRY_SIZE).enumerate() {
        let raw = AttachmentEntryRaw::read_from_bytes(chunk).expect("chunk is correctly sized");

        if raw.schema != SCHEMA_A1 {
            warn!(
                offset = entries_offset + (i * ATTACHMENT_ENTRY_SIZE) as u64,
                schema = ?raw.schema,
                "skipping attachment entry with unknown schema"
            );
            continue;
        }

        entries.push(AttachmentEntry::from_raw(&raw));
    }

    Ok(entries)
}

/// An attachment segment with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub entry: AttachmentEntry,
    pub data: Vec<u8>,
}

/// Reads the attachment segment at `offset`.
pub fn read_attachment<S: Stream + ?Sized>(stream: &S, offset: u64) -> Result<Attachment> {
    let mut buf = [0u8; size_of::<AttachmentSegmentRaw>()];
    read_exact_at(stream, offset, &mut buf)?;

    let raw = AttachmentSegmentRaw::read_from_bytes(&buf).expect("header buffer is correctly sized");

    snafu::ensure!(
        SegmentHeader::from_raw(&raw.header).kind() == Some(SegmentKind::Attachment),
        InvalidMagicSnafu {
            offset,
            kind: SegmentKind::Attachment
        }
    );

    let data = read_vec_at(stream, offset + buf.len() as u64, raw.data_size.get() as u64)?;

    Ok(Attachment {
        entry: AttachmentEntry::from_raw(&raw.entry),
        data,
    })
}

pub(crate) fn encode_attachment(entry: &AttachmentEntry, data: &[u8]) -> Vec<u8> {
    let size = ATTACHMENT_DATA_SIZE + data.len() as u64;
    let raw = AttachmentSegmentRaw {
        header: SegmentHeader::new(SegmentKind::Attachment, size, size).to_raw(),
        data_size: I64::new(data.len() as i64),
        spare1: [0; 8],
        entry: entry.to_raw(),
        spare2: [0; 112],
    };

    let mut out = raw.as_bytes().to_vec();
    out.extend_from_slice(data);
    out
}

pub(crate) fn encode_attachments_directory(entries: &[AttachmentEntry]) -> Vec<u8> {
    let size = ATTACHMENT_DIRECTORY_DATA_SIZE + (entries.len() * ATTACHMENT_ENTRY_SIZE) as u64;
    let raw = AttachmentDirectoryRaw {
        header: SegmentHeader::new(SegmentKind::AttachmentDirectory, size, size).to_raw(),
        entry_count: I32::new(entries.len() as i32),
        spare: [0; 252],
    };

    let mut out = raw.as_bytes().to_vec();

    for entry in entries {
        out.extend_from_slice(entry.to_raw().as_bytes());
    }

    out
}
