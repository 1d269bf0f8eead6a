//! Defines the physical binary layout of MAT5 files.
//!
//! # Layout
//! A file starts with a header followed by a sequence of root entries. Every
//! element, root or nested, is preceded by a [`Tag`].
//!
//! File: `[Header] [Root Entry 0] [Root Entry 1] ... [Subsystem Entry?]`
//!
//! ## Header Variants
//! * **Full** (128 bytes): `[Description(116)] [Subsystem Offset(8)] [Version(2)] [Endian(2)]`
//! * **Reduced** (8 bytes): `[Version(2)] [Endian(2)] [Padding(4)]`, used by
//!   embedded subsystem sub-files and some host formats.
//!
//! ## Tag Anatomy
//! * **Packed** (4 bytes): upper 16 bits = byte length, lower 16 bits = type id.
//!   The payload occupies the remaining 4 bytes of the 8-byte word.
//! * **Unpacked** (8 bytes): `[Type Id(4)] [Byte Length(4)]`.
//!
//! Payloads are zero-padded to the next multiple of 8, except for the two
//! container wrappers (`Matrix` and `Compressed`).

use std::fmt;
use std::io::Write;

use serde::Serialize;

use crate::error::{MatError, Result};
use crate::io::ByteSource;

/// Identifier every full header description must start with.
pub const IDENTIFIER: &str = "MATLAB";

/// Identifier prefix of HDF5-based (v7.3) files, which are not MAT5.
pub const HDF5_IDENTIFIER: &str = "MATLAB 7.3";

/// The size of the text description at the start of a full header.
pub const DESCRIPTION_SIZE: usize = 116;

/// Position of the 8-byte subsystem offset inside a full header.
pub const SUBSYSTEM_OFFSET_POSITION: u64 = 116;

/// The fixed size of a full header.
pub const FULL_HEADER_SIZE: usize = 128;

/// The fixed size of a reduced header.
pub const REDUCED_HEADER_SIZE: usize = 8;

/// The only MAT5 version written by MATLAB.
pub const VERSION: u16 = 0x0100;

/// The endian marker `'M','I'` read as a 16-bit value in matching byte order.
pub const ENDIAN_MARKER: u16 = u16::from_be_bytes(*b"MI");

/// Magic word opening every MCOS reference payload.
pub const MCOS_MAGIC: u32 = 0xDD00_0000;

/// Byte order of a source, sink or number buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ByteOrder {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

impl ByteOrder {
    /// The byte order of the running machine.
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }

    /// The opposite byte order.
    pub const fn swapped(self) -> Self {
        match self {
            Self::Little => Self::Big,
            Self::Big => Self::Little,
        }
    }

    pub(crate) fn u16_bytes(self, v: u16) -> [u8; 2] {
        match self {
            Self::Little => v.to_le_bytes(),
            Self::Big => v.to_be_bytes(),
        }
    }

    pub(crate) fn u32_bytes(self, v: u32) -> [u8; 4] {
        match self {
            Self::Little => v.to_le_bytes(),
            Self::Big => v.to_be_bytes(),
        }
    }

    pub(crate) fn u64_bytes(self, v: u64) -> [u8; 8] {
        match self {
            Self::Little => v.to_le_bytes(),
            Self::Big => v.to_be_bytes(),
        }
    }

    pub(crate) fn u16_from(self, b: [u8; 2]) -> u16 {
        match self {
            Self::Little => u16::from_le_bytes(b),
            Self::Big => u16::from_be_bytes(b),
        }
    }

    pub(crate) fn u32_from(self, b: [u8; 4]) -> u32 {
        match self {
            Self::Little => u32::from_le_bytes(b),
            Self::Big => u32::from_be_bytes(b),
        }
    }

    pub(crate) fn u64_from(self, b: [u8; 8]) -> u64 {
        match self {
            Self::Little => u64::from_le_bytes(b),
            Self::Big => u64::from_be_bytes(b),
        }
    }
}

/// Element type ids carried in a [`Tag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MatType {
    /// Signed 8-bit integer (`miINT8`).
    Int8,
    /// Unsigned 8-bit integer (`miUINT8`).
    UInt8,
    /// Signed 16-bit integer (`miINT16`).
    Int16,
    /// Unsigned 16-bit integer (`miUINT16`).
    UInt16,
    /// Signed 32-bit integer (`miINT32`).
    Int32,
    /// Unsigned 32-bit integer (`miUINT32`).
    UInt32,
    /// IEEE 754 single precision (`miSINGLE`).
    Single,
    /// IEEE 754 double precision (`miDOUBLE`).
    Double,
    /// Signed 64-bit integer (`miINT64`).
    Int64,
    /// Unsigned 64-bit integer (`miUINT64`).
    UInt64,
    /// Array wrapper (`miMATRIX`).
    Matrix,
    /// Deflate wrapper (`miCOMPRESSED`).
    Compressed,
    /// UTF-8 text (`miUTF8`).
    Utf8,
    /// UTF-16 text (`miUTF16`).
    Utf16,
    /// UTF-32 text (`miUTF32`).
    Utf32,
}

impl MatType {
    /// Resolves a raw type id.
    ///
    /// # Errors
    /// Returns `MatError::Format` for unknown or reserved ids.
    pub fn from_id(id: u32) -> Result<Self> {
        Ok(match id {
            1 => Self::Int8,
            2 => Self::UInt8,
            3 => Self::Int16,
            4 => Self::UInt16,
            5 => Self::Int32,
            6 => Self::UInt32,
            7 => Self::Single,
            9 => Self::Double,
            12 => Self::Int64,
            13 => Self::UInt64,
            14 => Self::Matrix,
            15 => Self::Compressed,
            16 => Self::Utf8,
            17 => Self::Utf16,
            18 => Self::Utf32,
            other => return Err(MatError::format(format!("unknown element type id {other}"))),
        })
    }

    /// The raw type id written to disk.
    pub fn id(self) -> u32 {
        match self {
            Self::Int8 => 1,
            Self::UInt8 => 2,
            Self::Int16 => 3,
            Self::UInt16 => 4,
            Self::Int32 => 5,
            Self::UInt32 => 6,
            Self::Single => 7,
            Self::Double => 9,
            Self::Int64 => 12,
            Self::UInt64 => 13,
            Self::Matrix => 14,
            Self::Compressed => 15,
            Self::Utf8 => 16,
            Self::Utf16 => 17,
            Self::Utf32 => 18,
        }
    }

    /// Width in bytes of one physical value. Containers and UTF-8 report 1.
    pub fn width(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 | Self::Utf8 | Self::Matrix | Self::Compressed => 1,
            Self::Int16 | Self::UInt16 | Self::Utf16 => 2,
            Self::Int32 | Self::UInt32 | Self::Single | Self::Utf32 => 4,
            Self::Double | Self::Int64 | Self::UInt64 => 8,
        }
    }

    /// True for the two wrapper types that are never padded.
    pub fn is_container(self) -> bool {
        matches!(self, Self::Matrix | Self::Compressed)
    }

    /// True for the ten numeric storage types.
    pub fn is_numeric(self) -> bool {
        !self.is_container() && !self.is_text()
    }

    /// True for the three text encodings.
    pub fn is_text(self) -> bool {
        matches!(self, Self::Utf8 | Self::Utf16 | Self::Utf32)
    }

    /// True for the integer storage types.
    pub fn is_integer(self) -> bool {
        self.is_numeric() && !matches!(self, Self::Single | Self::Double)
    }

    /// True for the unsigned integer storage types.
    pub fn is_unsigned(self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }
}

impl fmt::Display for MatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The header preceding every element payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    /// Type of the payload.
    pub ty: MatType,
    /// Payload length in bytes, excluding padding.
    pub num_bytes: u32,
    /// Whether the 4-byte packed form is used.
    pub packed: bool,
}

impl Tag {
    /// Creates a tag, choosing the packed form when the payload fits in 4 bytes.
    ///
    /// Zero-length payloads always use the unpacked form because a packed tag
    /// is recognised by a non-zero upper half.
    pub fn new(ty: MatType, num_bytes: u32) -> Self {
        let packed = !ty.is_container() && num_bytes > 0 && num_bytes <= 4;
        Self { ty, num_bytes, packed }
    }

    /// Creates an 8-byte tag regardless of the payload size.
    pub fn unpacked(ty: MatType, num_bytes: u32) -> Self {
        Self { ty, num_bytes, packed: false }
    }

    /// Reads a tag, accepting both the packed and the unpacked form.
    ///
    /// # Errors
    /// Fails with `MatError::Format` for unknown type ids or lengths that are not
    /// a multiple of the type width.
    pub fn read(src: &mut dyn ByteSource) -> Result<Self> {
        let position = src.position();
        let first = src.read_u32()?;
        let (id, num_bytes, packed) = if first >> 16 != 0 {
            (first & 0xFFFF, first >> 16, true)
        } else {
            (first, src.read_u32()?, false)
        };
        let ty = MatType::from_id(id)
            .map_err(|e| MatError::format(format!("{e} (tag at position {position})")))?;
        if packed && num_bytes > 4 {
            return Err(MatError::format(format!(
                "packed {ty} tag at position {position} claims {num_bytes} bytes"
            )));
        }
        if num_bytes as usize % ty.width() != 0 {
            return Err(MatError::format(format!(
                "{ty} tag at position {position} has length {num_bytes}, not a multiple of {}",
                ty.width()
            )));
        }
        Ok(Self { ty, num_bytes, packed })
    }

    /// Writes the tag in the given byte order.
    pub fn write(&self, out: &mut dyn Write, order: ByteOrder) -> Result<()> {
        if self.packed {
            out.write_all(&order.u32_bytes((self.num_bytes << 16) | self.ty.id()))?;
        } else {
            out.write_all(&order.u32_bytes(self.ty.id()))?;
            out.write_all(&order.u32_bytes(self.num_bytes))?;
        }
        Ok(())
    }

    /// Size of the tag itself (4 or 8 bytes).
    pub fn header_size(&self) -> usize {
        if self.packed { 4 } else { 8 }
    }

    /// Number of zero bytes following the payload.
    pub fn padding(&self) -> usize {
        if self.ty.is_container() {
            return 0;
        }
        let used = self.header_size() + self.num_bytes as usize;
        (8 - used % 8) % 8
    }

    /// Total bytes occupied by tag, payload and padding.
    pub fn total_size(&self) -> usize {
        self.header_size() + self.num_bytes as usize + self.padding()
    }

    /// Number of physical values in the payload.
    pub fn num_elements(&self) -> usize {
        self.num_bytes as usize / self.ty.width()
    }
}

/// Array class stored in the low byte of the array flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ArrayClass {
    /// Cell array (`mxCELL_CLASS`).
    Cell,
    /// Struct array (`mxSTRUCT_CLASS`).
    Struct,
    /// Object array (`mxOBJECT_CLASS`).
    Object,
    /// Character array (`mxCHAR_CLASS`).
    Char,
    /// Sparse matrix (`mxSPARSE_CLASS`).
    Sparse,
    /// Double precision array.
    Double,
    /// Single precision array.
    Single,
    /// Signed 8-bit array.
    Int8,
    /// Unsigned 8-bit array.
    UInt8,
    /// Signed 16-bit array.
    Int16,
    /// Unsigned 16-bit array.
    UInt16,
    /// Signed 32-bit array.
    Int32,
    /// Unsigned 32-bit array.
    UInt32,
    /// Signed 64-bit array.
    Int64,
    /// Unsigned 64-bit array.
    UInt64,
    /// Function handle (`mxFUNCTION_CLASS`).
    Function,
    /// Undocumented opaque class objects (`mxOPAQUE_CLASS`).
    Opaque,
}

impl ArrayClass {
    /// Resolves a raw class id.
    pub fn from_id(id: u8) -> Result<Self> {
        Ok(match id {
            1 => Self::Cell,
            2 => Self::Struct,
            3 => Self::Object,
            4 => Self::Char,
            5 => Self::Sparse,
            6 => Self::Double,
            7 => Self::Single,
            8 => Self::Int8,
            9 => Self::UInt8,
            10 => Self::Int16,
            11 => Self::UInt16,
            12 => Self::Int32,
            13 => Self::UInt32,
            14 => Self::Int64,
            15 => Self::UInt64,
            16 => Self::Function,
            17 => Self::Opaque,
            other => return Err(MatError::format(format!("unknown array class {other}"))),
        })
    }

    /// The raw class id.
    pub fn id(self) -> u8 {
        match self {
            Self::Cell => 1,
            Self::Struct => 2,
            Self::Object => 3,
            Self::Char => 4,
            Self::Sparse => 5,
            Self::Double => 6,
            Self::Single => 7,
            Self::Int8 => 8,
            Self::UInt8 => 9,
            Self::Int16 => 10,
            Self::UInt16 => 11,
            Self::Int32 => 12,
            Self::UInt32 => 13,
            Self::Int64 => 14,
            Self::UInt64 => 15,
            Self::Function => 16,
            Self::Opaque => 17,
        }
    }

    /// The storage type a numeric class nominally uses.
    pub fn numeric_type(self) -> Option<MatType> {
        Some(match self {
            Self::Double => MatType::Double,
            Self::Single => MatType::Single,
            Self::Int8 => MatType::Int8,
            Self::UInt8 => MatType::UInt8,
            Self::Int16 => MatType::Int16,
            Self::UInt16 => MatType::UInt16,
            Self::Int32 => MatType::Int32,
            Self::UInt32 => MatType::UInt32,
            Self::Int64 => MatType::Int64,
            Self::UInt64 => MatType::UInt64,
            _ => return None,
        })
    }
}

/// The array flags sub-element: class, complex/global/logical bits and `nzmax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayFlags {
    /// Array class.
    pub class: ArrayClass,
    /// Imaginary part present.
    pub complex: bool,
    /// Global variable.
    pub global: bool,
    /// Logical (boolean) array.
    pub logical: bool,
    /// Maximum non-zero count, used by sparse matrices only.
    pub nz_max: u32,
}

impl ArrayFlags {
    const COMPLEX_MASK: u32 = 0x0800;
    const GLOBAL_MASK: u32 = 0x0400;
    const LOGICAL_MASK: u32 = 0x0200;

    /// Payload size of the flags sub-element.
    pub const SIZE: u32 = 8;

    /// Creates plain flags for a class.
    pub fn new(class: ArrayClass) -> Self {
        Self { class, complex: false, global: false, logical: false, nz_max: 0 }
    }

    /// Decodes the two flag words.
    pub fn from_words(flags: u32, nz_max: u32) -> Result<Self> {
        Ok(Self {
            class: ArrayClass::from_id((flags & 0xFF) as u8)?,
            complex: flags & Self::COMPLEX_MASK != 0,
            global: flags & Self::GLOBAL_MASK != 0,
            logical: flags & Self::LOGICAL_MASK != 0,
            nz_max,
        })
    }

    /// Encodes the first flag word.
    pub fn word(&self) -> u32 {
        let mut word = u32::from(self.class.id());
        if self.complex {
            word |= Self::COMPLEX_MASK;
        }
        if self.global {
            word |= Self::GLOBAL_MASK;
        }
        if self.logical {
            word |= Self::LOGICAL_MASK;
        }
        word
    }
}

/// Which header variant a file uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HeaderKind {
    /// 128-byte header with a description and a subsystem offset.
    Full {
        /// Text description, at most 116 bytes.
        description: String,
        /// Absolute position of the subsystem entry, if any.
        subsystem_offset: Option<u64>,
    },
    /// 8-byte header without description.
    Reduced,
}

/// A decoded (or to-be-written) file header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHeader {
    /// Header variant.
    pub kind: HeaderKind,
    /// Format version, `0x0100` in practice.
    pub version: u16,
    /// Byte order of everything following the header.
    pub order: ByteOrder,
}

impl FileHeader {
    /// A full header with the default description.
    pub fn full(order: ByteOrder) -> Self {
        let description = format!(
            "MATLAB 5.0 MAT-file, Platform: {}, Created by: mat5 {}",
            std::env::consts::OS,
            env!("CARGO_PKG_VERSION")
        );
        Self {
            kind: HeaderKind::Full { description, subsystem_offset: None },
            version: VERSION,
            order,
        }
    }

    /// A reduced header.
    pub fn reduced(order: ByteOrder) -> Self {
        Self { kind: HeaderKind::Reduced, version: VERSION, order }
    }

    /// True for the reduced variant.
    pub fn is_reduced(&self) -> bool {
        matches!(self.kind, HeaderKind::Reduced)
    }

    /// Recorded subsystem position (full headers only).
    pub fn subsystem_offset(&self) -> Option<u64> {
        match &self.kind {
            HeaderKind::Full { subsystem_offset, .. } => *subsystem_offset,
            HeaderKind::Reduced => None,
        }
    }

    /// Size of the header on disk.
    pub fn size(&self) -> usize {
        if self.is_reduced() { REDUCED_HEADER_SIZE } else { FULL_HEADER_SIZE }
    }

    /// Reads a header and switches `src` to the byte order its endian marker
    /// announces.
    ///
    /// The version and subsystem offset are read in the source's current order
    /// first and un-swapped if the marker turns out to be reversed.
    ///
    /// # Errors
    /// Returns `MatError::Format` for a missing identifier or malformed endian
    /// marker, and `MatError::Unsupported` for HDF5-based files.
    pub fn read(src: &mut dyn ByteSource, reduced: bool) -> Result<Self> {
        let mut description = None;
        let mut offset_bytes = [0u8; 8];
        if !reduced {
            let mut text = [0u8; DESCRIPTION_SIZE];
            src.read_bytes(&mut text)?;
            let text = String::from_utf8_lossy(&text);
            if text.starts_with(HDF5_IDENTIFIER) {
                return Err(MatError::Unsupported(
                    "HDF5-based (v7.3) MAT files are not MAT5".into(),
                ));
            }
            if !text.starts_with(IDENTIFIER) {
                return Err(MatError::format(format!(
                    "header does not start with '{IDENTIFIER}'"
                )));
            }
            description = Some(text.trim_end_matches([' ', '\0']).to_string());
            src.read_bytes(&mut offset_bytes)?;
        }

        let mut version = src.read_u16()?;
        let marker = src.read_u16()?;
        let order = if marker == ENDIAN_MARKER {
            src.order()
        } else if marker.swap_bytes() == ENDIAN_MARKER {
            version = version.swap_bytes();
            src.order().swapped()
        } else {
            return Err(MatError::format(format!("malformed endian marker {marker:#06x}")));
        };
        src.set_order(order);

        if reduced {
            src.skip(4)?;
        }

        let kind = match description {
            Some(description) => {
                // Absent subsystems are recorded as all zeros or all spaces.
                let subsystem_offset = if offset_bytes.iter().all(|b| *b == 0 || *b == b' ') {
                    None
                } else {
                    Some(order.u64_from(offset_bytes))
                };
                HeaderKind::Full { description, subsystem_offset }
            }
            None => HeaderKind::Reduced,
        };
        Ok(Self { kind, version, order })
    }

    /// Serializes the header. A full header always carries a zero subsystem
    /// offset here; the writer patches it once the subsystem position is known.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        if let HeaderKind::Full { description, .. } = &self.kind {
            let mut text = [b' '; DESCRIPTION_SIZE];
            let len = description.len().min(DESCRIPTION_SIZE);
            text[..len].copy_from_slice(&description.as_bytes()[..len]);
            buf.extend_from_slice(&text);
            buf.extend_from_slice(&[0u8; 8]);
        }
        buf.extend_from_slice(&self.order.u16_bytes(self.version));
        buf.extend_from_slice(&self.order.u16_bytes(ENDIAN_MARKER));
        if self.is_reduced() {
            buf.extend_from_slice(&[0u8; 4]);
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SliceSource;

    fn encode(tag: Tag, order: ByteOrder) -> Vec<u8> {
        let mut out = Vec::new();
        tag.write(&mut out, order).unwrap();
        out
    }

    #[test]
    fn small_payloads_use_packed_tags() {
        for len in 1..=4 {
            let tag = Tag::new(MatType::UInt8, len);
            assert!(tag.packed);
            assert_eq!(encode(tag, ByteOrder::Little).len(), 4);
        }
        let tag = Tag::new(MatType::UInt8, 5);
        assert!(!tag.packed);
        assert_eq!(encode(tag, ByteOrder::Little).len(), 8);
    }

    #[test]
    fn packed_and_unpacked_tags_decode_to_same_length() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            for tag in [Tag::new(MatType::Int16, 4), Tag::unpacked(MatType::Int16, 4)] {
                let mut src = SliceSource::from_vec(encode(tag, order), order);
                let decoded = Tag::read(&mut src).unwrap();
                assert_eq!(decoded, tag);
                assert_eq!(decoded.num_bytes, 4);
            }
        }
    }

    #[test]
    fn padding_aligns_to_eight_bytes() {
        for len in 0..40u32 {
            let tag = Tag::new(MatType::Int8, len);
            let pad = tag.padding();
            assert!(pad < 8);
            assert_eq!((tag.header_size() + len as usize + pad) % 8, 0);
        }
        assert_eq!(Tag::new(MatType::Matrix, 13).padding(), 0);
        assert_eq!(Tag::new(MatType::Compressed, 7).padding(), 0);
    }

    #[test]
    fn unknown_type_ids_are_format_errors() {
        let mut src = SliceSource::from_vec(vec![8, 0, 0, 0, 4, 0, 0, 0], ByteOrder::Little);
        assert!(matches!(Tag::read(&mut src), Err(MatError::Format(_))));
    }

    #[test]
    fn misaligned_lengths_are_rejected() {
        let bytes = encode(Tag::unpacked(MatType::Double, 12), ByteOrder::Little);
        let mut src = SliceSource::from_vec(bytes, ByteOrder::Little);
        assert!(matches!(Tag::read(&mut src), Err(MatError::Format(_))));
    }

    #[test]
    fn array_flags_round_trip() {
        let flags = ArrayFlags {
            class: ArrayClass::Sparse,
            complex: true,
            global: false,
            logical: true,
            nz_max: 17,
        };
        let back = ArrayFlags::from_words(flags.word(), 17).unwrap();
        assert_eq!(back, flags);
    }

    #[test]
    fn header_detects_swapped_byte_order() {
        let header = FileHeader::full(ByteOrder::Big);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), FULL_HEADER_SIZE);
        assert_eq!(&bytes[126..128], b"MI");

        let mut src = SliceSource::from_vec(bytes, ByteOrder::Little);
        let back = FileHeader::read(&mut src, false).unwrap();
        assert_eq!(back.order, ByteOrder::Big);
        assert_eq!(back.version, VERSION);
        assert_eq!(src.order(), ByteOrder::Big);
        assert_eq!(back.subsystem_offset(), None);
    }

    #[test]
    fn reduced_header_is_eight_bytes() {
        let bytes = FileHeader::reduced(ByteOrder::Little).to_bytes();
        assert_eq!(bytes, vec![0x00, 0x01, b'I', b'M', 0, 0, 0, 0]);
        let mut src = SliceSource::from_vec(bytes, ByteOrder::Big);
        let back = FileHeader::read(&mut src, true).unwrap();
        assert!(back.is_reduced());
        assert_eq!(back.order, ByteOrder::Little);
        assert_eq!(src.position(), 8);
    }

    #[test]
    fn foreign_headers_are_rejected() {
        let mut bytes = vec![b' '; FULL_HEADER_SIZE];
        bytes[..4].copy_from_slice(b"JUNK");
        let mut src = SliceSource::from_vec(bytes, ByteOrder::Little);
        assert!(matches!(FileHeader::read(&mut src, false), Err(MatError::Format(_))));
    }
}
