use snafu::Snafu;

use crate::probe::ProbeError;

/// Errors that can occur while looking for tiles to repair.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum DetectError {
    #[snafu(display("cannot read file header: {source}"))]
    ReadHeaderFailed { source: czi_format::Error },

    #[snafu(display("cannot read sub-block directory: {source}"))]
    ReadDirectoryFailed { source: czi_format::Error },

    #[snafu(display("cannot read sub-block #{tile_index} at offset {offset}: {source}"))]
    ReadSubBlockFailed {
        tile_index: usize,
        offset: u64,
        source: czi_format::Error,
    },

    #[snafu(display("cannot determine the bitmap size of sub-block #{tile_index}: {source}"))]
    SizeUnavailable {
        tile_index: usize,
        source: ProbeError,
    },
}
