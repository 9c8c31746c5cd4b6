//! Library for repairing the dimension info of JPEG-XR tiles in CZI files.
//!
//! Some writers store a size for JPEG-XR compressed tiles that differs from
//! the size of the bitmap actually encoded. This crate finds those tiles and
//! rewrites the stored sizes in place, in both places the format keeps them:
//! the sub-block directory and the tile's own sub-block segment.
//!
//! # Overview
//!
//! [`RepairDetector`] reads a container through any [`czi_format::Stream`]
//! and produces a list of [`RepairInstruction`]s. [`Patcher`] writes them back
//! through a [`czi_format::StreamMut`]. Nothing is resized or moved; only the
//! 4-byte stored-size fields that are wrong are overwritten.
//!
//! # Example
//!
//! ```no_run
//! use czi_repair::{JxrSizeProbe, apply_repairs, detect_repairs, open_file, open_file_mut};
//!
//! let path = std::path::Path::new("image.czi");
//! let repairs = {
//!     let stream = unsafe { open_file(path) }.expect("failed to open file");
//!     detect_repairs(&stream, JxrSizeProbe).expect("scan failed")
//! };
//!
//! let mut stream = unsafe { open_file_mut(path) }.expect("failed to open file");
//! apply_repairs(&mut stream, &repairs).expect("patch failed");
//! stream.get_ref().flush().expect("flush failed");
//! ```
//!
//! # Custom progress reporting
//!
//! Implement the [`RepairProgress`] trait to receive updates while tiles are
//! scanned and patched.

pub mod detect;
pub mod patch;
pub mod probe;
pub mod progress;

pub use self::detect::{DetectError, RepairDetector, RepairInstruction, detect_repairs};
pub use self::patch::{FieldLocation, PatchError, PatchReport, Patcher, apply_repairs};
pub use self::probe::{BitmapSize, BitmapSizeProbe, JxrSizeProbe, ProbeError};
pub use self::progress::{RepairProgress, SilentProgress};

#[cfg(feature = "cli")]
pub use self::progress::ConsoleProgress;

use czi_format::MemoryStream;
use snafu::{ResultExt, Snafu};
use std::fs::OpenOptions;
use std::path::Path;

/// Errors that can occur when opening a CZI file from disk.
#[derive(Debug, Snafu)]
pub enum OpenFileError {
    #[snafu(display("failed to open file"))]
    OpenFile { source: std::io::Error },

    #[snafu(display("failed to memory map file"))]
    MmapFile { source: std::io::Error },
}

/// Opens a CZI file from disk for reading, using a memory map.
///
/// # Safety
///
/// This function uses `unsafe` internally to create a memory map. The caller
/// must ensure the file is not modified or truncated while the returned
/// stream is in use.
pub unsafe fn open_file(path: &Path) -> Result<MemoryStream<memmap2::Mmap>, OpenFileError> {
    let file = std::fs::File::open(path).context(OpenFileSnafu)?;
    let raw = unsafe { memmap2::Mmap::map(&file).context(MmapFileSnafu)? };

    Ok(MemoryStream::new(raw))
}

/// Opens a CZI file from disk for in-place patching, using a writable memory
/// map.
///
/// Writes go to the mapping; call `flush()` on the map (via
/// [`MemoryStream::get_ref()`]) to make sure they reach the disk.
///
/// # Safety
///
/// Same requirements as [`open_file()`]. In addition no other mapping of the
/// file may be alive.
pub unsafe fn open_file_mut(path: &Path) -> Result<MemoryStream<memmap2::MmapMut>, OpenFileError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .context(OpenFileSnafu)?;
    let raw = unsafe { memmap2::MmapMut::map_mut(&file).context(MmapFileSnafu)? };

    Ok(MemoryStream::new(raw))
}
