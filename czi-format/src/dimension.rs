use std::fmt::{Display, Formatter};

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    little_endian::{F32, I32},
};

use crate::{Result, UnknownDimensionSnafu};

/// Maximum number of dimension entries a directory entry may carry.
pub const MAX_DIMENSIONS: usize = 40;

/// Raw dimension entry (20 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub(crate) struct DimensionEntryRaw {
    /// 0x00: Axis code, first byte significant.
    pub dimension: [u8; 4],
    /// 0x04: Start index or pixel coordinate.
    pub start: I32,
    /// 0x08: Logical size.
    pub size: I32,
    /// 0x0C: Start coordinate in units of the axis.
    pub start_coordinate: F32,
    /// 0x10: Stored (physical) size, only meaningful for X and Y.
    pub stored_size: I32,
}

/// Size of one dimension entry on disk.
pub const DIMENSION_ENTRY_SIZE: u64 = size_of::<DimensionEntryRaw>() as u64;

/// Byte offset of the stored-size field within a dimension entry.
pub const STORED_SIZE_OFFSET: u64 = std::mem::offset_of!(DimensionEntryRaw, stored_size) as u64;

/// Non-spatial axes of a tile's coordinate.
///
/// The discriminants are the upper-case axis letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogicalAxis {
    /// Block (acquisition block index).
    B = b'B',
    /// Channel.
    C = b'C',
    /// Phase.
    H = b'H',
    /// Illumination.
    I = b'I',
    /// Rotation.
    R = b'R',
    /// Scene.
    S = b'S',
    /// Time.
    T = b'T',
    /// View.
    V = b'V',
    /// Z plane.
    Z = b'Z',
}

// Must stay sorted by letter for the binary search in `LogicalAxis::from_code`.
const LOGICAL_AXES: [(u8, LogicalAxis); 9] = [
    (b'B', LogicalAxis::B),
    (b'C', LogicalAxis::C),
    (b'H', LogicalAxis::H),
    (b'I', LogicalAxis::I),
    (b'R', LogicalAxis::R),
    (b'S', LogicalAxis::S),
    (b'T', LogicalAxis::T),
    (b'V', LogicalAxis::V),
    (b'Z', LogicalAxis::Z),
];

impl LogicalAxis {
    /// Looks up an axis letter, case-insensitively.
    #[must_use]
    pub fn from_code(c: u8) -> Option<Self> {
        let c = c.to_ascii_uppercase();

        LOGICAL_AXES
            .binary_search_by_key(&c, |&(letter, _)| letter)
            .ok()
            .map(|i| LOGICAL_AXES[i].1)
    }

    #[must_use]
    pub const fn as_char(self) -> char {
        self as u8 as char
    }
}

impl Display for LogicalAxis {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Classification of a dimension entry's axis code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Physical X (pixels).
    X,
    /// Physical Y (pixels).
    Y,
    /// Mosaic/pyramid tile index.
    M,
    Logical(LogicalAxis),
}

impl Axis {
    /// Classifies a 4-byte axis code. Only the first byte is significant.
    ///
    /// `offset` is the position of the entry and is only used for the error.
    pub fn classify(code: [u8; 4], offset: u64) -> Result<Self> {
        let axis = match code[0].to_ascii_uppercase() {
            b'X' => Self::X,
            b'Y' => Self::Y,
            b'M' => Self::M,
            c => match LogicalAxis::from_code(c) {
                Some(v) => Self::Logical(v),
                None => return UnknownDimensionSnafu { offset, code }.fail(),
            },
        };

        Ok(axis)
    }

    /// Returns `true` for the axes whose stored size describes the bitmap.
    #[must_use]
    pub const fn is_spatial(self) -> bool {
        matches!(self, Self::X | Self::Y)
    }

    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::X => 'X',
            Self::Y => 'Y',
            Self::M => 'M',
            Self::Logical(v) => v.as_char(),
        }
    }

    /// Returns the 4-byte code written for this axis.
    #[must_use]
    pub const fn code(self) -> [u8; 4] {
        [self.as_char() as u8, 0, 0, 0]
    }
}

impl Display for Axis {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// One axis descriptor of a tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionEntry {
    pub axis: Axis,
    pub start: i32,
    pub size: i32,
    pub start_coordinate: f32,
    pub stored_size: i32,
}

impl DimensionEntry {
    /// Creates an entry whose stored size equals its logical size.
    #[must_use]
    pub const fn new(axis: Axis, start: i32, size: i32) -> Self {
        Self {
            axis,
            start,
            size,
            start_coordinate: 0.0,
            stored_size: size,
        }
    }

    #[must_use]
    pub const fn with_stored_size(mut self, stored_size: i32) -> Self {
        self.stored_size = stored_size;
        self
    }

    pub(crate) fn from_raw(raw: &DimensionEntryRaw, offset: u64) -> Result<Self> {
        Ok(Self {
            axis: Axis::classify(raw.dimension, offset)?,
            start: raw.start.get(),
            size: raw.size.get(),
            start_coordinate: raw.start_coordinate.get(),
            stored_size: raw.stored_size.get(),
        })
    }

    pub(crate) fn to_raw(self) -> DimensionEntryRaw {
        DimensionEntryRaw {
            dimension: self.axis.code(),
            start: I32::new(self.start),
            size: I32::new(self.size),
            start_coordinate: F32::new(self.start_coordinate),
            stored_size: I32::new(self.stored_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_size_sits_at_byte_sixteen() {
        assert_eq!(DIMENSION_ENTRY_SIZE, 20);
        assert_eq!(STORED_SIZE_OFFSET, 16);

        let raw = DimensionEntry::new(Axis::X, 0, 512).with_stored_size(500).to_raw();
        assert_eq!(&raw.as_bytes()[16..20], &500i32.to_le_bytes());
    }

    #[test]
    fn axis_codes_are_case_insensitive() {
        assert_eq!(Axis::classify(*b"x\0\0\0", 0).unwrap(), Axis::X);
        assert_eq!(Axis::classify(*b"Y\0\0\0", 0).unwrap(), Axis::Y);
        assert_eq!(Axis::classify(*b"m\0\0\0", 0).unwrap(), Axis::M);
        assert_eq!(
            Axis::classify(*b"c\0\0\0", 0).unwrap(),
            Axis::Logical(LogicalAxis::C)
        );
        assert_eq!(
            Axis::classify(*b"Z\0\0\0", 0).unwrap(),
            Axis::Logical(LogicalAxis::Z)
        );
    }

    #[test]
    fn every_logical_axis_is_found() {
        for (letter, axis) in LOGICAL_AXES {
            assert_eq!(LogicalAxis::from_code(letter), Some(axis));
            assert_eq!(axis.as_char() as u8, letter);
        }

        assert!(LOGICAL_AXES.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn unknown_axis_code_is_rejected() {
        let err = Axis::classify(*b"Q\0\0\0", 1234).unwrap_err();

        assert!(err.is_format());
        assert_eq!(err.offset(), 1234);
    }
}
