use std::borrow::Cow;

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, little_endian::I32,
};

use crate::segment::{SEGMENT_HEADER_SIZE, SegmentHeader, SegmentHeaderRaw, SegmentKind};
use crate::stream::{Stream, read_exact_at, read_vec_at};
use crate::{InvalidMagicSnafu, Result};

/// Size of the metadata segment data preceding the XML.
pub const METADATA_DATA_SIZE: u64 = 256;

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct MetadataSegmentRaw {
    header: SegmentHeaderRaw, // 0x00
    xml_size: I32,            // 0x20
    attachment_size: I32,     // 0x24
    spare: [u8; 248],         // 0x28
}

const _: () = assert!(size_of::<MetadataSegmentRaw>() as u64 == SEGMENT_HEADER_SIZE + METADATA_DATA_SIZE);

/// The XML document describing the acquisition, plus an optional binary
/// attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataSegment {
    xml: Vec<u8>,
    attachment: Vec<u8>,
}

impl MetadataSegment {
    #[must_use]
    pub fn xml(&self) -> &[u8] {
        &self.xml
    }

    /// Returns the XML as text, replacing invalid UTF-8.
    #[must_use]
    pub fn xml_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.xml)
    }

    #[must_use]
    pub fn attachment(&self) -> &[u8] {
        &self.attachment
    }
}

/// Reads the metadata segment at `offset`.
pub fn read_metadata_segment<S: Stream + ?Sized>(stream: &S, offset: u64) -> Result<MetadataSegment> {
    let mut buf = [0u8; size_of::<MetadataSegmentRaw>()];
    read_exact_at(stream, offset, &mut buf)?;

    let raw = MetadataSegmentRaw::read_from_bytes(&buf).expect("header buffer is correctly sized");

    snafu::ensure!(
        SegmentHeader::from_raw(&raw.header).kind() == Some(SegmentKind::Metadata),
        InvalidMagicSnafu {
            offset,
            kind: SegmentKind::Metadata
        }
    );

    let xml_offset = offset + buf.len() as u64;
    let xml_size = raw.xml_size.get() as u32 as u64;
    let xml = read_vec_at(stream, xml_offset, xml_size)?;
    let attachment = read_vec_at(stream, xml_offset + xml_size, raw.attachment_size.get() as u32 as u64)?;

    Ok(MetadataSegment { xml, attachment })
}

pub(crate) fn encode_metadata(xml: &[u8], attachment: &[u8]) -> Vec<u8> {
    let size = METADATA_DATA_SIZE + (xml.len() + attachment.len()) as u64;
    let raw = MetadataSegmentRaw {
        header: SegmentHeader::new(SegmentKind::Metadata, size, size).to_raw(),
        xml_size: I32::new(xml.len() as i32),
        attachment_size: I32::new(attachment.len() as i32),
        spare: [0; 248],
    };

    let mut out = raw.as_bytes().to_vec();
    out.extend_from_slice(xml);
    out.extend_from_slice(attachment);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStream;

    #[test]
    fn xml_and_attachment_are_split() {
        let mut data = vec![0u8; 8];
        data.extend(encode_metadata(b"<ImageDocument/>", &[1, 2]));

        let segment = read_metadata_segment(&MemoryStream::new(data), 8).unwrap();

        assert_eq!(segment.xml_str(), "<ImageDocument/>");
        assert_eq!(segment.attachment(), [1, 2]);
    }

    #[test]
    fn xml_running_past_the_end_is_an_io_error() {
        let mut data = encode_metadata(b"<ImageDocument/>", &[]);
        data.truncate(data.len() - 1);

        let err = read_metadata_segment(&MemoryStream::new(data), 0).unwrap_err();

        assert!(err.is_io());
        assert_eq!(err.offset(), 288);
    }
}
