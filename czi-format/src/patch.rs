//! In-place rewriting of the stored size of X/Y dimension entries.
//!
//! Both the directory and every sub-block carry a copy of a tile's dimension
//! entries. The functions here rewrite one copy each; they never change the
//! length or position of anything, only the 4-byte stored-size fields the
//! callback asks for.
//!
//! The walks use positioned reads against the live stream and recompute every
//! offset from the segment headers, so no offset from an earlier read needs to
//! be trusted.

use tracing::debug;

use crate::dimension::{Axis, STORED_SIZE_OFFSET};
use crate::directory::{RawEntry, StreamSource, read_directory_geometry, read_raw_entry};
use crate::segment::{SegmentKind, read_segment_header};
use crate::stream::{StreamMut, write_all_at};
use crate::subblock::SUBBLOCK_ENTRY_OFFSET;
use crate::Result;

/// Walks the directory segment at `offset` and offers the stored size of
/// every X and Y dimension entry to `patch`.
///
/// `patch` receives the tile index, the axis and the current stored size.
/// When it returns a value, that value is written over the stored-size field.
/// Returns the number of fields written.
///
/// # Errors
///
/// Fails on the same malformed input as
/// [`read_subblock_directory()`](crate::read_subblock_directory), and with
/// [`Error::WriteFailed`](crate::Error::WriteFailed) if a write is rejected.
/// Fields written before the failure stay written.
pub fn patch_subblock_directory<S, F>(stream: &mut S, offset: u64, mut patch: F) -> Result<usize>
where
    S: StreamMut + ?Sized,
    F: FnMut(usize, Axis, i32) -> Option<u32>,
{
    let geometry = read_directory_geometry(&*stream, offset)?;
    let end = geometry.entries_end();
    let mut next = geometry.entries_offset;
    let mut written = 0;

    for index in 0..geometry.entry_count {
        let raw = read_raw_entry(
            &StreamSource {
                stream: &*stream,
                end,
            },
            next,
        )?;

        written += patch_entry(stream, &raw, |axis, size| patch(index, axis, size))?;
        next = raw.end();
    }

    Ok(written)
}

/// Offers the stored size of every X and Y dimension entry embedded in the
/// sub-block segment at `offset` to `patch`.
///
/// Works like [`patch_subblock_directory()`] for the tile's own copy of its
/// entry. Returns the number of fields written.
pub fn patch_subblock<S, F>(stream: &mut S, offset: u64, patch: F) -> Result<usize>
where
    S: StreamMut + ?Sized,
    F: FnMut(Axis, i32) -> Option<u32>,
{
    read_segment_header(&*stream, offset, SegmentKind::SubBlock)?;

    // The embedded entry is bounded by the stream only; a truncated segment
    // surfaces as a short read.
    let raw = read_raw_entry(
        &StreamSource {
            stream: &*stream,
            end: u64::MAX,
        },
        offset + SUBBLOCK_ENTRY_OFFSET,
    )?;

    patch_entry(stream, &raw, patch)
}

fn patch_entry<S, F>(stream: &mut S, raw: &RawEntry, mut patch: F) -> Result<usize>
where
    S: StreamMut + ?Sized,
    F: FnMut(Axis, i32) -> Option<u32>,
{
    let mut written = 0;

    for (i, dimension) in raw.dimensions.iter().enumerate() {
        let position = raw.dimension_offset(i);
        let axis = Axis::classify(dimension.dimension, position)?;

        if !axis.is_spatial() {
            continue;
        }

        let current = dimension.stored_size.get();

        if let Some(value) = patch(axis, current) {
            let field = position + STORED_SIZE_OFFSET;

            write_all_at(stream, field, &value.to_le_bytes())?;

            debug!(entry = raw.offset, field, %axis, current, value, "patched stored size");
            written += 1;
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{CompressionMode, DirectoryEntry, PixelType, encode_directory};
    use crate::subblock::{encode_subblock, read_subblock_header};
    use crate::{DimensionEntry, DirectoryParseOptions, Error, LogicalAxis, MemoryStream, SubBlockDirectory};

    fn entry(w: i32, h: i32) -> DirectoryEntry {
        DirectoryEntry::new(
            PixelType::Gray8,
            CompressionMode::JpgXr,
            0,
            vec![
                DimensionEntry::new(Axis::Logical(LogicalAxis::C), 0, 1),
                DimensionEntry::new(Axis::X, 0, w),
                DimensionEntry::new(Axis::Y, 0, h),
            ],
        )
    }

    #[test]
    fn only_requested_fields_change() {
        let original = encode_directory(&[entry(10, 20), entry(30, 40)]);
        let mut stream = MemoryStream::new(original.clone());

        let written = patch_subblock_directory(&mut stream, 0, |index, axis, size| {
            (index == 1 && axis == Axis::Y).then(|| size as u32 + 1)
        })
        .unwrap();

        assert_eq!(written, 1);

        // Second entry starts at 160 + 92; its Y dimension is the third one.
        let field = 160 + 92 + 32 + 2 * 20 + 16;
        let patched = stream.get_ref();

        assert_eq!(&patched[field..field + 4], &41i32.to_le_bytes());
        assert_eq!(&patched[..field], &original[..field]);
        assert_eq!(&patched[field + 4..], &original[field + 4..]);

        let directory = SubBlockDirectory::read(&stream, 0, DirectoryParseOptions::lax()).unwrap();
        let e = directory.get(1).unwrap();
        assert_eq!(e.physical_size().height, 41);
        // The logical size is untouched.
        assert_eq!(e.logical_rect().h, 40);
    }

    #[test]
    fn callback_only_sees_spatial_axes() {
        let mut stream = MemoryStream::new(encode_directory(&[entry(1, 2)]));
        let mut seen = Vec::new();

        let written = patch_subblock_directory(&mut stream, 0, |index, axis, size| {
            seen.push((index, axis, size));
            None
        })
        .unwrap();

        assert_eq!(written, 0);
        assert_eq!(seen, [(0, Axis::X, 1), (0, Axis::Y, 2)]);
    }

    #[test]
    fn subblock_copy_is_patched_in_place() {
        let mut data = vec![0u8; 100];
        data.extend(encode_subblock(&entry(64, 64), &[], &[9; 8], &[]));
        let original = data.clone();
        let mut stream = MemoryStream::new(data);

        let written = patch_subblock(&mut stream, 100, |axis, _| (axis == Axis::X).then_some(60)).unwrap();
        assert_eq!(written, 1);

        let header = read_subblock_header(&stream, 100).unwrap();
        assert_eq!(header.entry().physical_size().width, 60);
        assert_eq!(header.entry().physical_size().height, 64);

        let field = 100 + 48 + 32 + 20 + 16;
        let patched = stream.get_ref();
        assert_eq!(&patched[..field], &original[..field]);
        assert_eq!(&patched[field + 4..], &original[field + 4..]);
    }

    #[test]
    fn patching_a_non_subblock_fails_without_writing() {
        let data = encode_directory(&[entry(1, 1)]);
        let mut stream = MemoryStream::new(data.clone());

        let err = patch_subblock(&mut stream, 0, |_, _| Some(5)).unwrap_err();

        assert!(matches!(
            err,
            Error::InvalidMagic {
                offset: 0,
                kind: SegmentKind::SubBlock
            }
        ));
        assert_eq!(stream.get_ref(), &data);
    }
}
