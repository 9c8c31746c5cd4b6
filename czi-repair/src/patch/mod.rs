mod error;

pub use self::error::{FieldLocation, PatchError};

use self::error::{
    DuplicateTileSnafu, MissingFieldSnafu, PatchDirectoryFailedSnafu, PatchSubBlockFailedSnafu,
    ReadDirectoryFailedSnafu, ReadHeaderFailedSnafu, ReadSubBlockFailedSnafu, UnknownTileSnafu,
};
use crate::detect::RepairInstruction;
use crate::progress::{RepairProgress, SilentProgress};
use czi_format::{
    Axis, DimensionEntry, DirectoryParseOptions, StreamMut, SubBlockDirectory, patch_subblock,
    patch_subblock_directory, read_file_header, read_subblock_header,
};
use snafu::{ResultExt, ensure};
use std::collections::BTreeMap;
use tracing::info;

/// Number of 4-byte fields written by [`Patcher::apply()`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// Fields written in the sub-block directory.
    pub directory_fields: usize,
    /// Fields written in the sub-block segments.
    pub subblock_fields: usize,
}

impl PatchReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.directory_fields + self.subblock_fields
    }
}

/// Writes corrected stored sizes into a container.
///
/// A tile's size is stored twice: in the sub-block directory and in the
/// tile's own sub-block segment. [`apply()`](Self::apply) always updates both.
pub struct Patcher<G> {
    progress: G,
}

impl<G: RepairProgress> Patcher<G> {
    pub fn new(progress: G) -> Self {
        Self { progress }
    }

    /// Applies `repairs` in place.
    ///
    /// The directory is patched first, then every sub-block. Before anything
    /// is written, every repair is checked against the directory and the
    /// tile's own header: each corrected axis must have a field in both
    /// copies. An empty list reads and writes nothing. Only the stored sizes
    /// are written, the logical sizes are left as they are.
    pub fn apply<S>(&self, stream: &mut S, repairs: &[RepairInstruction]) -> Result<PatchReport, PatchError>
    where
        S: StreamMut + ?Sized,
    {
        if repairs.is_empty() {
            return Ok(PatchReport::default());
        }

        let header = read_file_header(&*stream).context(ReadHeaderFailedSnafu)?;
        let directory_position = header.directory_position();
        let directory = SubBlockDirectory::read(&*stream, directory_position, DirectoryParseOptions::lax())
            .context(ReadDirectoryFailedSnafu)?;

        let mut by_tile = BTreeMap::new();

        for repair in repairs {
            ensure!(
                repair.tile_index < directory.len(),
                UnknownTileSnafu {
                    tile_index: repair.tile_index,
                    count: directory.len()
                }
            );
            ensure!(
                by_tile.insert(repair.tile_index, repair).is_none(),
                DuplicateTileSnafu {
                    tile_index: repair.tile_index
                }
            );
        }

        // Offsets of the sub-blocks, taken from the directory read above.
        let mut targets = Vec::with_capacity(by_tile.len());

        for (&tile_index, &repair) in &by_tile {
            // Validated above.
            let Some(entry) = directory.get(tile_index) else {
                continue;
            };
            let offset = entry.file_position();

            ensure_fields(repair, entry.dimensions(), FieldLocation::Directory)?;

            let subblock = read_subblock_header(&*stream, offset)
                .context(ReadSubBlockFailedSnafu { tile_index, offset })?;

            ensure_fields(repair, subblock.entry().dimensions(), FieldLocation::SubBlock)?;

            targets.push((repair, offset));
        }

        let directory_fields = patch_subblock_directory(stream, directory_position, |index, axis, _| {
            by_tile.get(&index).and_then(|r| r.corrected(axis))
        })
        .context(PatchDirectoryFailedSnafu)?;

        self.progress.directory_patched(directory_fields);
        info!(fields = directory_fields, "patched sub-block directory");

        let mut subblock_fields = 0;

        for &(repair, offset) in &targets {
            let fields = patch_subblock(stream, offset, |axis, _| repair.corrected(axis)).context(
                PatchSubBlockFailedSnafu {
                    tile_index: repair.tile_index,
                    offset,
                },
            )?;

            self.progress.subblock_patched(repair.tile_index, fields);
            subblock_fields += fields;
        }

        info!(fields = subblock_fields, tiles = targets.len(), "patched sub-blocks");

        Ok(PatchReport {
            directory_fields,
            subblock_fields,
        })
    }
}

fn ensure_fields(
    repair: &RepairInstruction,
    dimensions: &[DimensionEntry],
    location: FieldLocation,
) -> Result<(), PatchError> {
    for axis in [Axis::X, Axis::Y] {
        if repair.corrected(axis).is_some() {
            ensure!(
                dimensions.iter().any(|d| d.axis == axis),
                MissingFieldSnafu {
                    tile_index: repair.tile_index,
                    axis,
                    location
                }
            );
        }
    }

    Ok(())
}

/// Applies `repairs` to `stream` without progress reporting.
pub fn apply_repairs<S>(stream: &mut S, repairs: &[RepairInstruction]) -> Result<PatchReport, PatchError>
where
    S: StreamMut + ?Sized,
{
    Patcher::new(SilentProgress).apply(stream, repairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use czi_format::writer::FileBuilder;
    use czi_format::{CompressionMode, DirectoryEntry, MemoryStream, PixelType};

    fn file(tiles: usize) -> Vec<u8> {
        (0..tiles)
            .fold(FileBuilder::new(), |b, _| {
                b.subblock(
                    DirectoryEntry::new(
                        PixelType::Gray8,
                        CompressionMode::JpgXr,
                        0,
                        vec![
                            DimensionEntry::new(Axis::X, 0, 16),
                            DimensionEntry::new(Axis::Y, 0, 16),
                        ],
                    ),
                    vec![0; 4],
                )
            })
            .build()
    }

    fn repair(tile_index: usize, width: Option<u32>, height: Option<u32>) -> RepairInstruction {
        RepairInstruction {
            tile_index,
            width,
            height,
        }
    }

    #[test]
    fn both_copies_are_counted() {
        let mut stream = MemoryStream::new(file(3));

        let report = apply_repairs(
            &mut stream,
            &[repair(0, Some(15), None), repair(2, Some(14), Some(13))],
        )
        .unwrap();

        assert_eq!(
            report,
            PatchReport {
                directory_fields: 3,
                subblock_fields: 3
            }
        );
        assert_eq!(report.total(), 6);
    }

    #[test]
    fn unknown_tile_is_rejected_before_writing() {
        let original = file(2);
        let mut stream = MemoryStream::new(original.clone());

        let err = apply_repairs(&mut stream, &[repair(0, Some(1), None), repair(2, Some(1), None)]).unwrap_err();

        assert!(matches!(err, PatchError::UnknownTile { tile_index: 2, count: 2 }));
        assert_eq!(stream.get_ref(), &original);
    }

    #[test]
    fn duplicate_tile_is_rejected_before_writing() {
        let original = file(2);
        let mut stream = MemoryStream::new(original.clone());

        let err = apply_repairs(&mut stream, &[repair(1, Some(1), None), repair(1, None, Some(2))]).unwrap_err();

        assert!(matches!(err, PatchError::DuplicateTile { tile_index: 1 }));
        assert_eq!(stream.get_ref(), &original);
    }

    #[test]
    fn instruction_without_corrections_writes_nothing() {
        let original = file(1);
        let mut stream = MemoryStream::new(original.clone());

        let report = apply_repairs(&mut stream, &[repair(0, None, None)]).unwrap();

        assert_eq!(report.total(), 0);
        assert_eq!(stream.get_ref(), &original);
    }

    #[test]
    fn axis_missing_from_the_directory_is_rejected_before_writing() {
        let only_y = DirectoryEntry::new(
            PixelType::Gray8,
            CompressionMode::JpgXr,
            0,
            vec![DimensionEntry::new(Axis::Y, 0, 512)],
        );
        let original = FileBuilder::new().subblock(only_y, vec![0; 4]).build();
        let mut stream = MemoryStream::new(original.clone());

        let err = apply_repairs(&mut stream, &[repair(0, Some(500), None)]).unwrap_err();

        assert!(matches!(
            err,
            PatchError::MissingField {
                tile_index: 0,
                axis: Axis::X,
                location: FieldLocation::Directory
            }
        ));
        assert_eq!(stream.get_ref(), &original);
    }

    #[test]
    fn axis_missing_from_the_embedded_entry_is_rejected_before_writing() {
        let mut original = file(2);

        // Turn the X entry embedded in the second sub-block into a Z entry.
        let position = {
            let stream = MemoryStream::new(&original);
            let header = read_file_header(&stream).unwrap();
            let directory =
                SubBlockDirectory::read(&stream, header.directory_position(), DirectoryParseOptions::lax()).unwrap();
            directory.get(1).unwrap().file_position()
        };
        let code = (position + 48 + 32) as usize;
        assert_eq!(original[code], b'X');
        original[code] = b'Z';

        let mut stream = MemoryStream::new(original.clone());

        let err = apply_repairs(&mut stream, &[repair(0, Some(15), None), repair(1, Some(15), None)]).unwrap_err();

        assert!(matches!(
            err,
            PatchError::MissingField {
                tile_index: 1,
                axis: Axis::X,
                location: FieldLocation::SubBlock
            }
        ));
        assert_eq!(stream.get_ref(), &original);
    }

    #[test]
    fn height_only_repair_needs_only_y() {
        let only_y = DirectoryEntry::new(
            PixelType::Gray8,
            CompressionMode::JpgXr,
            0,
            vec![DimensionEntry::new(Axis::Y, 0, 512)],
        );
        let mut stream = MemoryStream::new(FileBuilder::new().subblock(only_y, vec![0; 4]).build());

        let report = apply_repairs(&mut stream, &[repair(0, None, Some(500))]).unwrap();

        assert_eq!(report.total(), 2);
    }
}
