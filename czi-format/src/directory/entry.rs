use std::fmt::{Display, Formatter};

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    little_endian::{I32, I64},
};

use super::DirectoryParseOptions;
use crate::dimension::{Axis, DIMENSION_ENTRY_SIZE, DimensionEntry, DimensionEntryRaw};
use crate::{
    MSizeNotOneSnafu, MissingXySnafu, PyramidMSizeNotOneSnafu, Result, SizeNotOneSnafu,
    StoredSizeNotOneSnafu,
};

pub(crate) const SCHEMA_DV: [u8; 2] = *b"DV";
pub(crate) const SCHEMA_DE: [u8; 2] = *b"DE";

/// Fixed part of a "DV" directory entry (32 bytes), followed on disk by
/// `dimension_count` dimension entries.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub(crate) struct DvEntryPrefixRaw {
    pub schema: [u8; 2],      // 0x00
    pub pixel_type: I32,      // 0x02
    pub file_position: I64,   // 0x06
    pub file_part: I32,       // 0x0E
    pub compression: I32,     // 0x12
    pub spare: [u8; 6],       // 0x16 - spare[0] holds the pyramid type
    pub dimension_count: I32, // 0x1C
}

/// Size of the fixed part of a "DV" entry.
pub const DV_PREFIX_SIZE: u64 = size_of::<DvEntryPrefixRaw>() as u64;

/// Byte offset of the dimension count within a "DV" entry.
pub(crate) const DIMENSION_COUNT_OFFSET: u64 =
    std::mem::offset_of!(DvEntryPrefixRaw, dimension_count) as u64;

/// How a tile's pixel data is compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMode {
    Uncompressed,
    Jpg,
    Lzw,
    /// JPEG-XR, the only mode whose bitmap size is cross-checked on repair.
    JpgXr,
    Zstd0,
    Zstd1,
    Other(i32),
}

impl CompressionMode {
    #[must_use]
    pub const fn from_raw(v: i32) -> Self {
        match v {
            0 => Self::Uncompressed,
            1 => Self::Jpg,
            2 => Self::Lzw,
            4 => Self::JpgXr,
            5 => Self::Zstd0,
            6 => Self::Zstd1,
            v => Self::Other(v),
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Uncompressed => 0,
            Self::Jpg => 1,
            Self::Lzw => 2,
            Self::JpgXr => 4,
            Self::Zstd0 => 5,
            Self::Zstd1 => 6,
            Self::Other(v) => v,
        }
    }

    #[must_use]
    pub const fn is_jpgxr(self) -> bool {
        matches!(self, Self::JpgXr)
    }
}

impl Display for CompressionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uncompressed => f.write_str("uncompressed"),
            Self::Jpg => f.write_str("JPEG"),
            Self::Lzw => f.write_str("LZW"),
            Self::JpgXr => f.write_str("JPEG-XR"),
            Self::Zstd0 => f.write_str("zstd"),
            Self::Zstd1 => f.write_str("zstd (with header)"),
            Self::Other(v) => write!(f, "unknown ({v})"),
        }
    }
}

/// Pixel format of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    Gray8,
    Gray16,
    Gray32Float,
    Bgr24,
    Bgr48,
    Bgr96Float,
    Bgra32,
    Gray64ComplexFloat,
    Bgr192ComplexFloat,
    Gray32,
    Gray64Float,
    Other(i32),
}

impl PixelType {
    #[must_use]
    pub const fn from_raw(v: i32) -> Self {
        match v {
            0 => Self::Gray8,
            1 => Self::Gray16,
            2 => Self::Gray32Float,
            3 => Self::Bgr24,
            4 => Self::Bgr48,
            8 => Self::Bgr96Float,
            9 => Self::Bgra32,
            10 => Self::Gray64ComplexFloat,
            11 => Self::Bgr192ComplexFloat,
            12 => Self::Gray32,
            13 => Self::Gray64Float,
            v => Self::Other(v),
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Gray8 => 0,
            Self::Gray16 => 1,
            Self::Gray32Float => 2,
            Self::Bgr24 => 3,
            Self::Bgr48 => 4,
            Self::Bgr96Float => 8,
            Self::Bgra32 => 9,
            Self::Gray64ComplexFloat => 10,
            Self::Bgr192ComplexFloat => 11,
            Self::Gray32 => 12,
            Self::Gray64Float => 13,
            Self::Other(v) => v,
        }
    }
}

/// Logical placement of a tile: start and extent on X and Y.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Width and height of a stored bitmap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Display for Size {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A decoded "DV" entry before policy checks, with the position of every
/// field the patch path may need.
#[derive(Debug, Clone)]
pub(crate) struct RawEntry {
    pub offset: u64,
    pub prefix: DvEntryPrefixRaw,
    pub dimensions: Vec<DimensionEntryRaw>,
}

impl RawEntry {
    /// Returns the file offset of the `i`-th dimension entry.
    pub fn dimension_offset(&self, i: usize) -> u64 {
        self.offset + DV_PREFIX_SIZE + i as u64 * DIMENSION_ENTRY_SIZE
    }

    /// Returns the file offset just past this entry.
    pub fn end(&self) -> u64 {
        self.dimension_offset(self.dimensions.len())
    }
}

/// Directory information for one tile.
///
/// The tile index is not stored on disk: it is the position of the entry in
/// the directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    offset: u64,
    pixel_type: PixelType,
    file_position: u64,
    file_part: i32,
    compression: CompressionMode,
    spare: [u8; 6],
    dimensions: Vec<DimensionEntry>,
    rect: Rect,
    physical_size: Size,
    m_index: Option<i32>,
}

impl DirectoryEntry {
    /// Creates an entry for a tile stored at `file_position`.
    pub fn new(
        pixel_type: PixelType,
        compression: CompressionMode,
        file_position: u64,
        dimensions: Vec<DimensionEntry>,
    ) -> Self {
        let mut entry = Self {
            offset: 0,
            pixel_type,
            file_position,
            file_part: 0,
            compression,
            spare: [0; 6],
            dimensions,
            rect: Rect::default(),
            physical_size: Size::default(),
            m_index: None,
        };

        entry.summarize();
        entry
    }

    /// Sets the pyramid type byte.
    pub fn with_pyramid_type(mut self, pyramid_type: u8) -> Self {
        self.spare[0] = pyramid_type;
        self
    }

    pub(crate) fn with_file_position(mut self, file_position: u64) -> Self {
        self.file_position = file_position;
        self
    }

    /// Decodes `raw` and applies the checks enabled in `options`.
    pub(crate) fn from_raw(raw: &RawEntry, options: DirectoryParseOptions) -> Result<Self> {
        let offset = raw.offset;

        let dimensions = raw
            .dimensions
            .iter()
            .enumerate()
            .map(|(i, d)| DimensionEntry::from_raw(d, raw.dimension_offset(i)))
            .collect::<Result<Vec<_>>>()?;

        let mut x_given = false;
        let mut y_given = false;
        let mut m_size_not_one = None;

        for d in &dimensions {
            match d.axis {
                Axis::X => x_given = true,
                Axis::Y => y_given = true,
                Axis::M => {
                    if d.size != 1 {
                        snafu::ensure!(
                            !options.contains(DirectoryParseOptions::M_SIZE_MUST_BE_ONE),
                            MSizeNotOneSnafu {
                                offset,
                                size: d.size
                            }
                        );

                        // Whether this is a pyramid tile depends on X and Y, which may
                        // come later in the entry.
                        m_size_not_one = Some(d.size);
                    }
                }
                Axis::Logical(axis) => {
                    snafu::ensure!(
                        d.stored_size == 1
                            || !options
                                .contains(DirectoryParseOptions::STORED_SIZE_OTHER_THAN_M_MUST_BE_ONE),
                        StoredSizeNotOneSnafu {
                            offset,
                            axis,
                            size: d.stored_size
                        }
                    );

                    snafu::ensure!(
                        d.size == 1
                            || !options.contains(DirectoryParseOptions::SIZE_OTHER_THAN_M_MUST_BE_ONE),
                        SizeNotOneSnafu {
                            offset,
                            axis,
                            size: d.size
                        }
                    );
                }
            }
        }

        if options.contains(DirectoryParseOptions::XY_MUST_BE_PRESENT) {
            let missing = match (x_given, y_given) {
                (true, true) => None,
                (false, true) => Some("'X'"),
                (true, false) => Some("'Y'"),
                (false, false) => Some("'X' and 'Y'"),
            };

            if let Some(missing) = missing {
                return MissingXySnafu { offset, missing }.fail();
            }
        }

        let mut entry = Self {
            offset,
            pixel_type: PixelType::from_raw(raw.prefix.pixel_type.get()),
            file_position: raw.prefix.file_position.get() as u64,
            file_part: raw.prefix.file_part.get(),
            compression: CompressionMode::from_raw(raw.prefix.compression.get()),
            spare: raw.prefix.spare,
            dimensions,
            rect: Rect::default(),
            physical_size: Size::default(),
            m_index: None,
        };

        entry.summarize();

        if let Some(size) = m_size_not_one {
            // Files exist where pyramid tiles were written with a non-1 M size.
            // A pyramid tile is recognizable by its stored size differing from
            // its logical size.
            snafu::ensure!(
                !options.contains(DirectoryParseOptions::M_SIZE_MUST_BE_ONE_EXCEPT_PYRAMID)
                    || !entry.is_stored_size_equal_logical_size(),
                PyramidMSizeNotOneSnafu { offset, size }
            );
        }

        Ok(entry)
    }

    fn summarize(&mut self) {
        for d in &self.dimensions {
            match d.axis {
                Axis::X => {
                    self.rect.x = d.start;
                    self.rect.w = d.size;
                    self.physical_size.width = d.stored_size as u32;
                }
                Axis::Y => {
                    self.rect.y = d.start;
                    self.rect.h = d.size;
                    self.physical_size.height = d.stored_size as u32;
                }
                Axis::M => self.m_index = Some(d.start),
                Axis::Logical(_) => {}
            }
        }
    }

    /// Appends the on-disk "DV" representation of this entry to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let prefix = DvEntryPrefixRaw {
            schema: SCHEMA_DV,
            pixel_type: I32::new(self.pixel_type.as_raw()),
            file_position: I64::new(self.file_position as i64),
            file_part: I32::new(self.file_part),
            compression: I32::new(self.compression.as_raw()),
            spare: self.spare,
            dimension_count: I32::new(self.dimensions.len() as i32),
        };

        out.extend_from_slice(prefix.as_bytes());

        for d in &self.dimensions {
            out.extend_from_slice(d.to_raw().as_bytes());
        }
    }

    /// Returns the number of bytes [`encode()`](Self::encode) produces.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        DV_PREFIX_SIZE + self.dimensions.len() as u64 * DIMENSION_ENTRY_SIZE
    }

    /// Returns the file offset this entry was decoded from (0 if built in memory).
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub const fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    /// Returns the offset of the tile's sub-block segment.
    #[must_use]
    pub const fn file_position(&self) -> u64 {
        self.file_position
    }

    #[must_use]
    pub const fn file_part(&self) -> i32 {
        self.file_part
    }

    #[must_use]
    pub const fn compression(&self) -> CompressionMode {
        self.compression
    }

    #[must_use]
    pub const fn pyramid_type(&self) -> u8 {
        self.spare[0]
    }

    #[must_use]
    pub fn dimensions(&self) -> &[DimensionEntry] {
        &self.dimensions
    }

    /// Returns the tile's logical rectangle.
    #[must_use]
    pub const fn logical_rect(&self) -> Rect {
        self.rect
    }

    /// Returns the declared size of the stored bitmap.
    #[must_use]
    pub const fn physical_size(&self) -> Size {
        self.physical_size
    }

    /// Returns the M index, if the entry has an M dimension.
    #[must_use]
    pub const fn m_index(&self) -> Option<i32> {
        self.m_index
    }

    /// Returns `true` unless the tile is a downscaled (pyramid) tile.
    #[must_use]
    pub const fn is_stored_size_equal_logical_size(&self) -> bool {
        self.rect.w as u32 == self.physical_size.width && self.rect.h as u32 == self.physical_size.height
    }

    /// Returns the start of the given logical axis, if present.
    #[must_use]
    pub fn coordinate(&self, axis: crate::LogicalAxis) -> Option<i32> {
        self.dimensions
            .iter()
            .find(|d| d.axis == Axis::Logical(axis))
            .map(|d| d.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogicalAxis;

    fn tile(dimensions: Vec<DimensionEntry>) -> RawEntry {
        let entry = DirectoryEntry::new(PixelType::Gray8, CompressionMode::JpgXr, 4096, dimensions);
        let mut bytes = Vec::new();
        entry.encode(&mut bytes);

        let (prefix, mut rest) = DvEntryPrefixRaw::read_from_prefix(&bytes).unwrap();
        let mut raw_dims = Vec::new();
        while !rest.is_empty() {
            let (d, tail) = DimensionEntryRaw::read_from_prefix(rest).unwrap();
            raw_dims.push(d);
            rest = tail;
        }

        RawEntry {
            offset: 1000,
            prefix,
            dimensions: raw_dims,
        }
    }

    fn xy(w: i32, h: i32) -> Vec<DimensionEntry> {
        vec![
            DimensionEntry::new(Axis::X, 0, w),
            DimensionEntry::new(Axis::Y, 0, h),
        ]
    }

    #[test]
    fn prefix_layout_is_thirty_two_bytes() {
        assert_eq!(DV_PREFIX_SIZE, 32);
        assert_eq!(DIMENSION_COUNT_OFFSET, 28);
    }

    #[test]
    fn entry_survives_encoding() {
        let mut dims = xy(512, 256);
        dims[0].stored_size = 500;
        dims.push(DimensionEntry::new(Axis::Logical(LogicalAxis::C), 2, 1));
        dims.push(DimensionEntry::new(Axis::M, 7, 1));

        let raw = tile(dims.clone());
        let entry = DirectoryEntry::from_raw(&raw, DirectoryParseOptions::strict()).unwrap();

        assert_eq!(entry.offset(), 1000);
        assert_eq!(entry.dimensions(), dims.as_slice());
        assert_eq!(entry.compression(), CompressionMode::JpgXr);
        assert_eq!(entry.file_position(), 4096);
        assert_eq!(entry.physical_size(), Size::new(500, 256));
        assert_eq!(entry.logical_rect(), Rect { x: 0, y: 0, w: 512, h: 256 });
        assert_eq!(entry.m_index(), Some(7));
        assert_eq!(entry.coordinate(LogicalAxis::C), Some(2));
        assert_eq!(entry.encoded_len(), 32 + 4 * 20);
    }

    #[test]
    fn missing_y_is_reported_only_when_required() {
        let raw = tile(vec![DimensionEntry::new(Axis::X, 0, 8)]);

        assert!(DirectoryEntry::from_raw(&raw, DirectoryParseOptions::lax()).is_ok());

        let err = DirectoryEntry::from_raw(&raw, DirectoryParseOptions::XY_MUST_BE_PRESENT).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::MissingXy {
                offset: 1000,
                missing: "'Y'"
            }
        ));
    }

    #[test]
    fn logical_axis_sizes_are_checked_independently() {
        let mut dims = xy(8, 8);
        dims.push(DimensionEntry::new(Axis::Logical(LogicalAxis::Z), 0, 3).with_stored_size(1));
        let raw = tile(dims);

        assert!(
            DirectoryEntry::from_raw(&raw, DirectoryParseOptions::STORED_SIZE_OTHER_THAN_M_MUST_BE_ONE)
                .is_ok()
        );

        let err =
            DirectoryEntry::from_raw(&raw, DirectoryParseOptions::SIZE_OTHER_THAN_M_MUST_BE_ONE).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::SizeNotOne {
                axis: LogicalAxis::Z,
                size: 3,
                ..
            }
        ));
    }

    #[test]
    fn non_one_m_size_is_tolerated_for_pyramid_tiles() {
        // Stored size differs from logical size: a pyramid tile.
        let mut dims = xy(1024, 1024);
        dims[0].stored_size = 512;
        dims[1].stored_size = 512;
        dims.push(DimensionEntry::new(Axis::M, 0, 4));
        let pyramid = tile(dims);

        let options = DirectoryParseOptions::M_SIZE_MUST_BE_ONE_EXCEPT_PYRAMID;
        assert!(DirectoryEntry::from_raw(&pyramid, options).is_ok());

        let err = DirectoryEntry::from_raw(&pyramid, DirectoryParseOptions::M_SIZE_MUST_BE_ONE).unwrap_err();
        assert!(matches!(err, crate::Error::MSizeNotOne { size: 4, .. }));

        // Same M size on a full-resolution tile.
        let mut dims = xy(1024, 1024);
        dims.push(DimensionEntry::new(Axis::M, 0, 4));
        let plain = tile(dims);

        let err = DirectoryEntry::from_raw(&plain, options).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::PyramidMSizeNotOne {
                offset: 1000,
                size: 4
            }
        ));
        assert!(err.is_validation());
        assert!(!err.is_format());
        assert!(!err.is_io());
    }
}
