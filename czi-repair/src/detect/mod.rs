mod error;

pub use self::error::DetectError;

use self::error::{
    ReadDirectoryFailedSnafu, ReadHeaderFailedSnafu, ReadSubBlockFailedSnafu, SizeUnavailableSnafu,
};
use crate::probe::BitmapSizeProbe;
use crate::progress::{RepairProgress, SilentProgress};
use czi_format::{
    Axis, DirectoryEntry, DirectoryParseOptions, Size, Stream, SubBlockPayload, read_file_header, read_subblock,
    read_subblock_directory,
};
use snafu::ResultExt;
use tracing::{debug, info, trace};

/// Correct stored size for one tile.
///
/// An axis is `None` when its declared size already matches the bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairInstruction {
    pub tile_index: usize,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl RepairInstruction {
    /// Returns the corrected stored size for `axis`, if it needs one.
    #[must_use]
    pub fn corrected(&self, axis: Axis) -> Option<u32> {
        match axis {
            Axis::X => self.width,
            Axis::Y => self.height,
            _ => None,
        }
    }

    /// Returns `declared` with the corrected axes replaced.
    #[must_use]
    pub fn apply_to(&self, declared: Size) -> Size {
        Size::new(
            self.width.unwrap_or(declared.width),
            self.height.unwrap_or(declared.height),
        )
    }

    /// Returns `true` if neither axis needs a correction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none()
    }
}

/// Finds the JPEG-XR tiles whose declared stored size disagrees with the
/// size of their bitmap.
pub struct RepairDetector<'a, S: ?Sized, P, G> {
    stream: &'a S,
    probe: P,
    progress: G,
    options: DirectoryParseOptions,
}

impl<'a, S, P, G> RepairDetector<'a, S, P, G>
where
    S: Stream + ?Sized,
    P: BitmapSizeProbe,
    G: RepairProgress,
{
    /// Creates a detector that parses the directory without policy checks.
    pub fn new(stream: &'a S, probe: P, progress: G) -> Self {
        Self {
            stream,
            probe,
            progress,
            options: DirectoryParseOptions::lax(),
        }
    }

    /// Sets the checks applied to the directory entries.
    pub fn with_options(mut self, options: DirectoryParseOptions) -> Self {
        self.options = options;
        self
    }

    /// Scans every directory entry and returns the tiles needing a repair,
    /// in tile-index order.
    ///
    /// Tiles compressed with anything but JPEG-XR are never reported. A tile
    /// whose bitmap size cannot be determined fails the whole scan.
    pub fn detect(&self) -> Result<Vec<RepairInstruction>, DetectError> {
        let header = read_file_header(self.stream).context(ReadHeaderFailedSnafu)?;
        let entries = read_subblock_directory(self.stream, header.directory_position(), self.options)
            .context(ReadDirectoryFailedSnafu)?;

        let total = entries.declared_len();
        let mut payload = SubBlockPayload::default();
        let mut repairs = Vec::new();

        self.progress.scan_start(total);

        for item in entries {
            let (index, entry) = item.context(ReadDirectoryFailedSnafu)?;

            if entry.compression().is_jpgxr() {
                if let Some(repair) = self.examine(index, &entry, &mut payload)? {
                    repairs.push(repair);
                }
            }

            self.progress.tile_examined(index, total);
        }

        self.progress.scan_completed(repairs.len());

        info!(tiles = total, repairs = repairs.len(), "sub-block directory scanned");

        Ok(repairs)
    }

    fn examine(
        &self,
        index: usize,
        entry: &DirectoryEntry,
        payload: &mut SubBlockPayload,
    ) -> Result<Option<RepairInstruction>, DetectError> {
        let offset = entry.file_position();

        read_subblock(self.stream, offset, payload).context(ReadSubBlockFailedSnafu {
            tile_index: index,
            offset,
        })?;

        let actual = self
            .probe
            .decode_header(&payload.data)
            .context(SizeUnavailableSnafu { tile_index: index })?;
        let declared = entry.physical_size();

        let repair = RepairInstruction {
            tile_index: index,
            width: (declared.width != actual.width).then_some(actual.width),
            height: (declared.height != actual.height).then_some(actual.height),
        };

        if repair.is_empty() {
            trace!(tile = index, %declared, "sub-block size is consistent");
            return Ok(None);
        }

        debug!(tile = index, %declared, %actual, "sub-block size mismatch");

        Ok(Some(repair))
    }
}

/// Scans `stream` with a lax directory parse and no progress reporting.
pub fn detect_repairs<S, P>(stream: &S, probe: P) -> Result<Vec<RepairInstruction>, DetectError>
where
    S: Stream + ?Sized,
    P: BitmapSizeProbe,
{
    RepairDetector::new(stream, probe, SilentProgress).detect()
}
