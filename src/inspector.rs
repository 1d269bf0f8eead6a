//! Tools for inspecting the physical layout of MAT5 files.
//! Useful for checking compression and subsystem placement.

use std::path::Path;

use serde::Serialize;

use crate::compression::{Compressor, ZlibCompressor};
use crate::error::{MatError, Result};
use crate::format::{ArrayClass, ByteOrder, FileHeader, HeaderKind, MatType, Tag};
use crate::io::{ByteSource, SliceSource};
use crate::reader::{ElementReader, ReadOptions};

/// A structural report of a MAT5 file.
#[derive(Debug, Serialize)]
pub struct DebugReport {
    /// Total size of the input.
    pub file_size: u64,
    /// Header version word.
    pub version: u16,
    /// Byte order announced by the header.
    pub byte_order: ByteOrder,
    /// Header text (full headers only).
    pub description: Option<String>,
    /// Subsystem position recorded in the header.
    pub subsystem_offset: Option<u64>,
    /// Root elements in file order.
    pub entries: Vec<EntryInfo>,
}

/// Layout of one root element.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Absolute offset of the element tag.
    pub offset: u64,
    /// Payload length declared by the tag.
    pub stored_length: u64,
    /// True for a deflated entry.
    pub compressed: bool,
    /// Payload length after inflating (compressed entries only).
    pub inflated_length: Option<u64>,
    /// Variable name, empty for the subsystem.
    pub name: String,
    /// Array class, absent for empty elements.
    pub class: Option<ArrayClass>,
    /// Dimensions.
    pub dims: Vec<usize>,
    /// True for the subsystem: at the header's offset, or second under a reduced header.
    pub is_subsystem: bool,
}

/// The MAT5 inspector tool.
#[derive(Debug)]
pub struct Mat5Inspector;

impl Mat5Inspector {
    /// Analyzes a file and returns a structural report.
    pub fn inspect<P: AsRef<Path>>(path: P) -> Result<DebugReport> {
        let bytes = std::fs::read(path)?;
        Self::inspect_bytes(bytes, false)
    }

    /// Analyzes an in-memory file. `reduced` selects the 8-byte header.
    pub fn inspect_bytes(bytes: Vec<u8>, reduced: bool) -> Result<DebugReport> {
        let file_size = bytes.len() as u64;
        let mut src = SliceSource::from_vec(bytes, ByteOrder::native());
        let header = FileHeader::read(&mut src, reduced)?;
        let subsystem_offset = header.subsystem_offset();
        let options = ReadOptions::new();
        let inflater = ZlibCompressor::new(0);

        let mut entries = Vec::new();
        while !src.is_exhausted()? {
            let offset = src.position();
            let tag = Tag::read(&mut src)?;
            let payload = src.read_vec(tag.num_bytes as usize)?;

            let (matrix, compressed, inflated_length) = match tag.ty {
                MatType::Matrix => (payload, false, None),
                MatType::Compressed => {
                    let inflated = inflater.decompress(&payload)?.into_owned();
                    let len = inflated.len() as u64;
                    let mut inner = SliceSource::from_vec(inflated, header.order);
                    let inner_tag = Tag::read(&mut inner)?;
                    if inner_tag.ty != MatType::Matrix {
                        return Err(MatError::format(format!(
                            "compressed entry at {offset} holds a {} element",
                            inner_tag.ty
                        )));
                    }
                    let body = inner.read_vec(inner_tag.num_bytes as usize)?;
                    (body, true, Some(len))
                }
                other => {
                    return Err(MatError::format(format!(
                        "root element at {offset} has type {other}"
                    )));
                }
            };

            let (name, class, dims) = if matrix.is_empty() {
                (String::new(), None, vec![0, 0])
            } else {
                let mut body = SliceSource::from_vec(matrix, header.order);
                let peeked = ElementReader::new(&options).peek_header(&mut body)?;
                (peeked.name, Some(peeked.class), peeked.dims)
            };
            let is_subsystem =
                subsystem_offset == Some(offset) || (header.is_reduced() && entries.len() == 1);
            entries.push(EntryInfo {
                offset,
                stored_length: u64::from(tag.num_bytes),
                compressed,
                inflated_length,
                name,
                class,
                dims,
                is_subsystem,
            });
        }

        let description = match header.kind {
            HeaderKind::Full { description, .. } => Some(description),
            HeaderKind::Reduced => None,
        };
        Ok(DebugReport {
            file_size,
            version: header.version,
            byte_order: header.order,
            description,
            subsystem_offset,
            entries,
        })
    }
}

impl std::fmt::Display for DebugReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== MAT5 INSPECTOR REPORT ===")?;
        if let Some(text) = &self.description {
            writeln!(f, "Header:         {text}")?;
        }
        writeln!(f, "Byte Order:     {:?}", self.byte_order)?;
        writeln!(f, "File Size:      {}", self.file_size)?;
        match self.subsystem_offset {
            Some(at) => writeln!(f, "Subsystem:      @{at}")?,
            None => writeln!(f, "Subsystem:      none")?,
        }
        writeln!(f, "\n[ROOT ENTRIES]")?;
        for (i, entry) in self.entries.iter().enumerate() {
            entry.fmt_line(f, i + 1 == self.entries.len())?;
        }
        Ok(())
    }
}

impl EntryInfo {
    fn fmt_line(&self, f: &mut std::fmt::Formatter<'_>, is_last: bool) -> std::fmt::Result {
        let connector = if is_last { "└── " } else { "├── " };
        let name = match (self.is_subsystem, self.name.is_empty()) {
            (true, _) => "<subsystem>",
            (false, true) => "<unnamed>",
            (false, false) => self.name.as_str(),
        };
        let class = self.class.map(|c| format!("{c:?}")).unwrap_or_else(|| "Empty".into());
        let dims = self.dims.iter().map(ToString::to_string).collect::<Vec<_>>().join("x");
        let size = match self.inflated_length {
            Some(inflated) => format!("{}b (deflated from {inflated}b)", self.stored_length),
            None => format!("{}b", self.stored_length),
        };
        writeln!(f, "{connector}@{} {name} [{class} {dims}] Size: {size}", self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::default_allocator;
    use crate::array::{Array, Entry, NumericArray};
    use crate::compression::Compression;
    use crate::mcos::Subsystem;
    use crate::writer::{MatWriter, WriteOptions};

    #[test]
    fn report_lists_entries_and_subsystem() {
        let alloc = default_allocator();
        let options = WriteOptions::new().with_compression(Compression::deflate());
        let mut writer = MatWriter::in_memory(options).unwrap();
        writer
            .write_entry(Entry::new("a", Array::Numeric(NumericArray::from_f64(vec![1, 3], &[1.0, 2.0, 3.0], &alloc).unwrap())))
            .unwrap();
        writer
            .write_entry_with(Entry::new("b", Array::empty()), Compression::None)
            .unwrap();
        writer.write_subsystem(Subsystem::encode(&[], ByteOrder::native(), &alloc).unwrap()).unwrap();
        let bytes = writer.finish().unwrap().into_inner().into_inner();

        let report = Mat5Inspector::inspect_bytes(bytes, false).unwrap();
        assert_eq!(report.entries.len(), 3);
        let a = &report.entries[0];
        assert_eq!((a.name.as_str(), a.compressed, a.offset), ("a", true, 128));
        assert_eq!(a.dims, vec![1, 3]);
        assert!(a.inflated_length.is_some());
        let b = &report.entries[1];
        assert!(!b.compressed);
        assert_eq!(b.class, Some(ArrayClass::Double));
        assert!(report.entries[2].is_subsystem);
        assert_eq!(report.subsystem_offset, Some(report.entries[2].offset));

        let text = report.to_string();
        assert!(text.contains("<subsystem>"));
        assert!(text.contains("a [Double 1x3]"));
    }
}
