use czi_format::Axis;
use snafu::Snafu;
use std::fmt::{self, Display, Formatter};

/// Which copy of a tile's dimension entries a field was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLocation {
    /// The tile's entry in the sub-block directory.
    Directory,
    /// The entry embedded in the tile's sub-block segment.
    SubBlock,
}

impl Display for FieldLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Directory => "sub-block directory",
            Self::SubBlock => "sub-block segment",
        })
    }
}

/// Errors that can occur while applying repairs.
///
/// Errors raised after the directory has been patched leave the file with
/// corrected directory sizes and some sub-blocks still uncorrected.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum PatchError {
    #[snafu(display("cannot read file header: {source}"))]
    ReadHeaderFailed { source: czi_format::Error },

    #[snafu(display("cannot read sub-block directory: {source}"))]
    ReadDirectoryFailed { source: czi_format::Error },

    #[snafu(display("repair refers to sub-block #{tile_index}, but the directory has {count} entries"))]
    UnknownTile { tile_index: usize, count: usize },

    #[snafu(display("sub-block #{tile_index} is repaired more than once"))]
    DuplicateTile { tile_index: usize },

    #[snafu(display("cannot read sub-block #{tile_index} at offset {offset}: {source}"))]
    ReadSubBlockFailed {
        tile_index: usize,
        offset: u64,
        source: czi_format::Error,
    },

    #[snafu(display("sub-block #{tile_index} has no {axis} dimension in its {location} entry"))]
    MissingField {
        tile_index: usize,
        axis: Axis,
        location: FieldLocation,
    },

    #[snafu(display("cannot patch sub-block directory: {source}"))]
    PatchDirectoryFailed { source: czi_format::Error },

    #[snafu(display("cannot patch sub-block #{tile_index} at offset {offset}: {source}"))]
    PatchSubBlockFailed {
        tile_index: usize,
        offset: u64,
        source: czi_format::Error,
    },
}
