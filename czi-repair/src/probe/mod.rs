//! Determining the true size of a compressed tile.

mod jxr;

pub use self::jxr::JxrSizeProbe;

use snafu::Snafu;

/// Width and height of a decoded bitmap.
pub use czi_format::Size as BitmapSize;

/// Reads the size of a compressed bitmap from its header.
///
/// Only the header needs to be inspected; implementations are not expected
/// to decode any pixels. Any `Fn(&[u8]) -> Result<BitmapSize, ProbeError>` is
/// a probe as well, which is convenient for tests.
pub trait BitmapSizeProbe {
    fn decode_header(&self, data: &[u8]) -> Result<BitmapSize, ProbeError>;
}

impl<F> BitmapSizeProbe for F
where
    F: Fn(&[u8]) -> Result<BitmapSize, ProbeError>,
{
    fn decode_header(&self, data: &[u8]) -> Result<BitmapSize, ProbeError> {
        self(data)
    }
}

/// Errors returned when a bitmap size cannot be determined.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum ProbeError {
    #[snafu(display("bitmap is truncated: {needed} bytes needed at offset {offset}, {len} available"))]
    Truncated { offset: usize, needed: usize, len: usize },

    #[snafu(display("bitmap has no recognizable signature"))]
    UnknownSignature,

    #[snafu(display("unexpected type {field_type} for tag {tag:#06x}"))]
    InvalidFieldType { tag: u16, field_type: u16 },

    #[snafu(display("bitmap header does not declare a size"))]
    MissingSize,

    #[snafu(display("bitmap declares an empty size {width}x{height}"))]
    EmptySize { width: u32, height: u32 },
}
