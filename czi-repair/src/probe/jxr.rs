use snafu::{OptionExt, ensure};
use zerocopy::{
    FromBytes, Immutable, KnownLayout, Unaligned,
    little_endian::{U16, U32},
};

use super::{
    BitmapSize, BitmapSizeProbe, EmptySizeSnafu, InvalidFieldTypeSnafu, MissingSizeSnafu, ProbeError,
    TruncatedSnafu, UnknownSignatureSnafu,
};

const CONTAINER_SIGNATURE: [u8; 4] = [b'I', b'I', 0xBC, 0x01];
const CODESTREAM_SIGNATURE: [u8; 8] = *b"WMPHOTO\0";

const TAG_IMAGE_WIDTH: u16 = 0xBC80;
const TAG_IMAGE_HEIGHT: u16 = 0xBC81;
const TAG_IMAGE_OFFSET: u16 = 0xBCC0;

const TYPE_BYTE: u16 = 1;
const TYPE_USHORT: u16 = 3;
const TYPE_ULONG: u16 = 4;

// SHORT_HEADER_FLAG in the third byte after the codestream signature.
const SHORT_HEADER_FLAG: u8 = 0x80;

/// IFD entry of the container (12 bytes).
#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct IfdEntryRaw {
    tag: U16,        // 0x00
    field_type: U16, // 0x02
    count: U32,      // 0x04
    value: [u8; 4],  // 0x08 - inline for values of up to 4 bytes
}

impl IfdEntryRaw {
    fn value(&self) -> Result<u32, ProbeError> {
        let v = self.value;

        match self.field_type.get() {
            TYPE_BYTE => Ok(u32::from(v[0])),
            TYPE_USHORT => Ok(u32::from(u16::from_le_bytes([v[0], v[1]]))),
            TYPE_ULONG => Ok(u32::from_le_bytes(v)),
            field_type => InvalidFieldTypeSnafu {
                tag: self.tag.get(),
                field_type,
            }
            .fail(),
        }
    }
}

/// Size probe for JPEG-XR bitmaps.
///
/// Understands both the container form (`II BC 01`, where the size is read
/// from the first IFD) and a bare codestream (`WMPHOTO`).
#[derive(Debug, Clone, Copy, Default)]
pub struct JxrSizeProbe;

impl BitmapSizeProbe for JxrSizeProbe {
    fn decode_header(&self, data: &[u8]) -> Result<BitmapSize, ProbeError> {
        if data.starts_with(&CODESTREAM_SIGNATURE) {
            codestream_size(data, 0)
        } else if data.starts_with(&CONTAINER_SIGNATURE) {
            container_size(data)
        } else {
            UnknownSignatureSnafu.fail()
        }
    }
}

fn get(data: &[u8], offset: usize, needed: usize) -> Result<&[u8], ProbeError> {
    offset
        .checked_add(needed)
        .and_then(|end| data.get(offset..end))
        .context(TruncatedSnafu {
            offset,
            needed,
            len: data.len(),
        })
}

fn container_size(data: &[u8]) -> Result<BitmapSize, ProbeError> {
    let ifd = u32::from_le_bytes(get(data, 4, 4)?.try_into().expect("slice is 4 bytes")) as usize;
    let count = u16::from_le_bytes(get(data, ifd, 2)?.try_into().expect("slice is 2 bytes")) as usize;
    let entries = get(data, ifd + 2, count * size_of::<IfdEntryRaw>())?;

    let mut width = None;
    let mut height = None;
    let mut image_offset = None;

    for chunk in entries.chunks_exact(size_of::<IfdEntryRaw>()) {
        let entry = IfdEntryRaw::ref_from_bytes(chunk).expect("chunk is correctly sized");

        match entry.tag.get() {
            TAG_IMAGE_WIDTH => width = Some(entry.value()?),
            TAG_IMAGE_HEIGHT => height = Some(entry.value()?),
            TAG_IMAGE_OFFSET => image_offset = Some(entry.value()?),
            _ => {}
        }
    }

    match (width, height, image_offset) {
        (Some(width), Some(height), _) => checked(width, height),
        (_, _, Some(offset)) => codestream_size(data, offset as usize),
        _ => MissingSizeSnafu.fail(),
    }
}

fn codestream_size(data: &[u8], offset: usize) -> Result<BitmapSize, ProbeError> {
    let header = get(data, offset, CODESTREAM_SIGNATURE.len() + 4)?;

    ensure!(header[..8] == CODESTREAM_SIGNATURE, UnknownSignatureSnafu);

    let sizes = offset + header.len();

    // The codestream stores WIDTH_MINUS1 and HEIGHT_MINUS1, big-endian.
    let (width, height) = if header[10] & SHORT_HEADER_FLAG != 0 {
        let b = get(data, sizes, 4)?;
        (
            u32::from(u16::from_be_bytes([b[0], b[1]])) + 1,
            u32::from(u16::from_be_bytes([b[2], b[3]])) + 1,
        )
    } else {
        let b = get(data, sizes, 8)?;
        (
            u32::from_be_bytes([b[0], b[1], b[2], b[3]]).wrapping_add(1),
            u32::from_be_bytes([b[4], b[5], b[6], b[7]]).wrapping_add(1),
        )
    };

    checked(width, height)
}

fn checked(width: u32, height: u32) -> Result<BitmapSize, ProbeError> {
    ensure!(width != 0 && height != 0, EmptySizeSnafu { width, height });

    Ok(BitmapSize::new(width, height))
}
