//! The `FileWrapper__` object table.
//!
//! The table is a cell array:
//! * cell 0: `UInt8` metadata blob (layout below),
//! * cell 1: unused (empty),
//! * cells `2..n-1`: property values, addressed as `value + 2`,
//! * cell `n-1`: per-class default properties, a cell of structs indexed by
//!   class id (slot 0 unused).
//!
//! Metadata blob, all words `u32` in the subsystem's byte order:
//!
//! ```text
//! [version] [num_names] [offset * 8]        40 bytes
//! names, NUL-terminated, padded to 8        40 .. o0
//! classes  [pkg, name, 0, 0] * n           o0 .. o1   record 0 is a sentinel
//! blocks   8-byte lead, then per block      o1 .. o2
//!          [count] [name, flag, value] * count, padded to 8
//! objects  [class, 0, 0, block1, block2, id] * n
//!                                           o2 .. o3   record 0 is a sentinel
//! blocks   (same shape as o1 .. o2)         o3 .. o4
//! ```
//!
//! Property flags: 0 = value names a string, 1 = value indexes a cell,
//! 2 = value is the literal integer.

use std::sync::Arc;

use crate::allocator::BufferAllocator;
use crate::array::{Array, CellArray, CharArray, NumericArray, StructArray};
use crate::error::{MatError, Result};
use crate::format::{ArrayClass, ByteOrder, MatType};
use crate::mcos::McosObject;
use crate::number::NumberStore;

const HEADER_SIZE: usize = 40;
const CLASS_RECORD: usize = 16;
const OBJECT_RECORD: usize = 24;
const BLOCK_LEAD: usize = 8;
const SUPPORTED_VERSIONS: std::ops::RangeInclusive<u32> = 2..=4;
const WRITTEN_VERSION: u32 = 4;

fn align8(n: usize) -> usize {
    n.div_ceil(8) * 8
}

struct Metadata<'a> {
    bytes: &'a [u8],
    order: ByteOrder,
}

impl<'a> Metadata<'a> {
    fn u32_at(&self, pos: usize) -> Result<u32> {
        let word = self
            .bytes
            .get(pos..pos + 4)
            .ok_or_else(|| MatError::format(format!("object metadata truncated at byte {pos}")))?;
        Ok(self.order.u32_from([word[0], word[1], word[2], word[3]]))
    }

    fn segment(&self, start: usize, end: usize) -> Result<&'a [u8]> {
        self.bytes.get(start..end).ok_or_else(|| {
            MatError::format(format!(
                "object metadata segment {start}..{end} exceeds {} bytes",
                self.bytes.len()
            ))
        })
    }

    fn words(&self, segment: &[u8], at: usize, n: usize) -> Result<Vec<u32>> {
        let sub = Metadata { bytes: segment, order: self.order };
        (0..n).map(|i| sub.u32_at(at + 4 * i)).collect()
    }
}

type Property = (u32, u32, u32);

fn parse_blocks(meta: &Metadata<'_>, segment: &[u8]) -> Result<Vec<Vec<Property>>> {
    let mut blocks = Vec::new();
    let mut pos = BLOCK_LEAD;
    while pos + 4 <= segment.len() {
        let count = meta.words(segment, pos, 1)?[0] as usize;
        pos += 4;
        let words = meta.words(segment, pos, count * 3)?;
        blocks.push(words.chunks_exact(3).map(|w| (w[0], w[1], w[2])).collect());
        pos = align8(pos + count * 12);
    }
    Ok(blocks)
}

fn name(names: &[String], index: u32) -> Result<String> {
    if index == 0 {
        return Ok(String::new());
    }
    names
        .get(index as usize - 1)
        .cloned()
        .ok_or_else(|| MatError::format(format!("name index {index} out of {}", names.len())))
}

/// Decodes the object table into objects ordered by id.
pub(crate) fn decode(
    content: &Array,
    order: ByteOrder,
    allocator: &Arc<dyn BufferAllocator>,
) -> Result<Vec<McosObject>> {
    let Array::Cell(table) = content else {
        return Err(MatError::format("object table is not a cell array"));
    };
    let Some(Array::Numeric(blob)) = table.cells.first() else {
        return Err(MatError::format("object table lacks its metadata blob"));
    };
    if blob.real.physical_type() != MatType::UInt8 {
        return Err(MatError::format("object metadata is not a UInt8 vector"));
    }
    let meta = Metadata { bytes: blob.real.as_bytes(), order };

    let version = meta.u32_at(0)?;
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(MatError::Unsupported(format!("object metadata version {version}")));
    }
    let num_names = meta.u32_at(4)? as usize;
    let offsets: Vec<usize> =
        (0..8).map(|i| meta.u32_at(8 + 4 * i).map(|o| o as usize)).collect::<Result<_>>()?;
    if offsets.windows(2).take(4).any(|w| w[0] > w[1]) || offsets[0] < HEADER_SIZE {
        return Err(MatError::format(format!("object metadata offsets out of order: {offsets:?}")));
    }

    let name_bytes = meta.segment(HEADER_SIZE, offsets[0])?;
    let names: Vec<String> = name_bytes
        .split(|b| *b == 0)
        .take(num_names)
        .map(|n| String::from_utf8_lossy(n).into_owned())
        .collect();
    if names.len() != num_names {
        return Err(MatError::format(format!(
            "object metadata lists {num_names} names, found {}",
            names.len()
        )));
    }

    let class_seg = meta.segment(offsets[0], offsets[1])?;
    let mut classes = Vec::new();
    for record in (CLASS_RECORD..class_seg.len()).step_by(CLASS_RECORD) {
        let w = meta.words(class_seg, record, 2)?;
        classes.push((name(&names, w[0])?, name(&names, w[1])?));
    }

    let first_blocks = parse_blocks(&meta, meta.segment(offsets[1], offsets[2])?)?;
    let object_seg = meta.segment(offsets[2], offsets[3])?;
    let second_blocks = parse_blocks(&meta, meta.segment(offsets[3], offsets[4])?)?;

    let defaults = table.cells.last().filter(|_| table.cells.len() > 2);
    let record_count = (object_seg.len() / OBJECT_RECORD).saturating_sub(1);
    let mut slots: Vec<Option<McosObject>> = Vec::new();
    for record in (OBJECT_RECORD..object_seg.len()).step_by(OBJECT_RECORD) {
        let w = meta.words(object_seg, record, 6)?;
        let (class_idx, block1, block2, id) = (w[0], w[3], w[4], w[5] as usize);
        let (package, class) = classes
            .get((class_idx as usize).wrapping_sub(1))
            .ok_or_else(|| MatError::format(format!("object {id} names unknown class {class_idx}")))?;
        let mut object = McosObject::new(class.clone()).with_package(package.clone());
        for (block_idx, blocks) in [(block1, &first_blocks), (block2, &second_blocks)] {
            if block_idx == 0 {
                continue;
            }
            let block = blocks.get(block_idx as usize - 1).ok_or_else(|| {
                MatError::format(format!("object {id} names missing property block {block_idx}"))
            })?;
            for (name_idx, flag, value) in block {
                let value = property_value(*flag, *value, &names, &table.cells, allocator)?;
                object.set_field(name(&names, *name_idx)?, value);
            }
        }
        if let Some(Array::Cell(defaults)) = defaults
            && let Some(Array::Struct(s)) = defaults.cells.get(class_idx as usize)
        {
            for field in &s.field_names {
                if object.field(field).is_none()
                    && let Some(v) = s.field(0, field)
                {
                    object.set_field(field.clone(), v.clone());
                }
            }
        }
        if id == 0 || id > record_count {
            return Err(MatError::format(format!(
                "object record id {id} outside 1..={record_count}"
            )));
        }
        if slots.len() < id {
            slots.resize_with(id, || None);
        }
        slots[id - 1] = Some(object);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, o)| o.ok_or_else(|| MatError::format(format!("object id {} has no record", i + 1))))
        .collect()
}

fn property_value(
    flag: u32,
    value: u32,
    names: &[String],
    cells: &[Array],
    allocator: &Arc<dyn BufferAllocator>,
) -> Result<Array> {
    match flag {
        0 => Ok(Array::Char(CharArray::from_text(&name(names, value)?))),
        1 => cells.get(value as usize + 2).cloned().ok_or_else(|| {
            MatError::format(format!("property value cell {} out of {}", value + 2, cells.len()))
        }),
        2 => Ok(Array::Numeric(NumericArray::scalar(f64::from(value), allocator)?)),
        other => Err(MatError::format(format!("unknown property flag {other}"))),
    }
}

/// Distinct `(package, class)` pairs in first-appearance order. Class id `k`
/// names entry `k - 1`.
pub(crate) fn class_table(objects: &[McosObject]) -> Vec<(String, String)> {
    let mut classes: Vec<(String, String)> = Vec::new();
    for o in objects {
        let key = (o.package_name.clone(), o.class_name.clone());
        if !classes.contains(&key) {
            classes.push(key);
        }
    }
    classes
}

#[derive(Default)]
struct NameTable {
    names: Vec<String>,
}

impl NameTable {
    fn index(&mut self, name: &str) -> u32 {
        if name.is_empty() {
            return 0;
        }
        let pos = match self.names.iter().position(|n| n == name) {
            Some(pos) => pos,
            None => {
                self.names.push(name.to_string());
                self.names.len() - 1
            }
        };
        pos as u32 + 1
    }
}

/// Encodes objects (ids `1..=n` in slice order) into an object table.
pub(crate) fn encode(
    objects: &[McosObject],
    order: ByteOrder,
    allocator: &Arc<dyn BufferAllocator>,
) -> Result<Array> {
    let classes = class_table(objects);
    let mut names = NameTable::default();
    let class_words: Vec<[u32; 4]> =
        classes.iter().map(|(p, c)| [names.index(p), names.index(c), 0, 0]).collect();

    let mut cells = vec![Array::empty(), Array::empty()];
    let mut blocks: Vec<u8> = vec![0; BLOCK_LEAD];
    let mut object_words: Vec<[u32; 6]> = Vec::with_capacity(objects.len());
    for (i, object) in objects.iter().enumerate() {
        let class_idx = classes
            .iter()
            .position(|(p, c)| *p == object.package_name && *c == object.class_name)
            .map_or(0, |p| p + 1) as u32;
        blocks.extend_from_slice(&order.u32_bytes(object.fields.len() as u32));
        for (field, value) in &object.fields {
            let cell = (cells.len() - 2) as u32;
            cells.push(value.clone());
            for word in [names.index(field), 1, cell] {
                blocks.extend_from_slice(&order.u32_bytes(word));
            }
        }
        blocks.resize(align8(blocks.len()), 0);
        object_words.push([class_idx, 0, 0, 0, i as u32 + 1, i as u32 + 1]);
    }

    let mut name_bytes = Vec::new();
    for n in &names.names {
        name_bytes.extend_from_slice(n.as_bytes());
        name_bytes.push(0);
    }
    name_bytes.resize(align8(name_bytes.len()), 0);

    let o0 = HEADER_SIZE + name_bytes.len();
    let o1 = o0 + CLASS_RECORD * (classes.len() + 1);
    let o2 = o1 + BLOCK_LEAD;
    let o3 = o2 + OBJECT_RECORD * (objects.len() + 1);
    let o4 = o3 + blocks.len();
    let offsets = [o0, o1, o2, o3, o4, o4, o4, o4];

    let mut blob = Vec::with_capacity(o4);
    let put = |blob: &mut Vec<u8>, w: u32| blob.extend_from_slice(&order.u32_bytes(w));
    put(&mut blob, WRITTEN_VERSION);
    put(&mut blob, names.names.len() as u32);
    for o in offsets {
        put(&mut blob, o as u32);
    }
    blob.extend_from_slice(&name_bytes);
    blob.extend_from_slice(&[0; CLASS_RECORD]);
    for record in &class_words {
        record.iter().for_each(|w| put(&mut blob, *w));
    }
    blob.extend_from_slice(&[0; BLOCK_LEAD]);
    blob.extend_from_slice(&[0; OBJECT_RECORD]);
    for record in &object_words {
        record.iter().for_each(|w| put(&mut blob, *w));
    }
    blob.extend_from_slice(&blocks);

    let len = blob.len();
    cells[0] = Array::Numeric(NumericArray::new(
        ArrayClass::UInt8,
        vec![len, 1],
        NumberStore::from_bytes(MatType::UInt8, &blob, order, allocator)?,
    )?);

    let defaults: Vec<Array> = (0..=classes.len())
        .map(|_| Array::Struct(StructArray::new(vec![1, 1], Vec::new())))
        .collect();
    let defaults_len = defaults.len();
    cells.push(Array::Cell(CellArray::new(vec![defaults_len, 1], defaults)?));

    let count = cells.len();
    Ok(Array::Cell(CellArray::new(vec![count, 1], cells)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::default_allocator;

    fn sample() -> Vec<McosObject> {
        let alloc = default_allocator();
        vec![
            McosObject::new("Point")
                .with_field("x", Array::Numeric(NumericArray::scalar(1.0, &alloc).unwrap()))
                .with_field("y", Array::Numeric(NumericArray::scalar(2.0, &alloc).unwrap())),
            McosObject::new("Label")
                .with_package("ui")
                .with_field("text", Array::Char(CharArray::from_text("hi"))),
            McosObject::new("Point"),
        ]
    }

    #[test]
    fn object_tables_round_trip() {
        let alloc = default_allocator();
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let table = encode(&sample(), order, &alloc).unwrap();
            let back = decode(&table, order, &alloc).unwrap();
            assert_eq!(back, sample());
        }
    }

    #[test]
    fn class_ids_follow_first_appearance() {
        let classes = class_table(&sample());
        assert_eq!(
            classes,
            vec![("".to_string(), "Point".to_string()), ("ui".to_string(), "Label".to_string())]
        );
    }

    #[test]
    fn defaults_fill_missing_properties() {
        let alloc = default_allocator();
        let mut table = encode(&sample(), ByteOrder::Little, &alloc).unwrap();
        let Array::Cell(cells) = &mut table else { panic!("table is a cell") };
        let Some(Array::Cell(defaults)) = cells.cells.last_mut() else { panic!("defaults") };
        let mut point_defaults = StructArray::new(vec![1, 1], Vec::new());
        point_defaults.set_field(0, "z", Array::Char(CharArray::from_text("d"))).unwrap();
        defaults.cells[1] = Array::Struct(point_defaults);

        let back = decode(&table, ByteOrder::Little, &alloc).unwrap();
        assert_eq!(back[0].field_names().collect::<Vec<_>>(), vec!["x", "y", "z"]);
        assert_eq!(back[2].field("z").and_then(Array::as_char).map(CharArray::to_text), Some("d".into()));
        assert!(back[1].field("z").is_none());
    }

    #[test]
    fn unknown_versions_are_unsupported() {
        let alloc = default_allocator();
        let mut blob = vec![0u8; 48];
        blob[0] = 9;
        let meta = NumericArray::new(
            ArrayClass::UInt8,
            vec![48, 1],
            NumberStore::from_bytes(MatType::UInt8, &blob, ByteOrder::Little, &alloc).unwrap(),
        )
        .unwrap();
        let table = Array::Cell(
            CellArray::new(vec![2, 1], vec![Array::Numeric(meta), Array::empty()]).unwrap(),
        );
        assert!(matches!(
            decode(&table, ByteOrder::Little, &alloc),
            Err(MatError::Unsupported(_))
        ));
    }
}
