use std::sync::Arc;

use crate::allocator::BufferAllocator;
use crate::array::{Array, Entry, OpaqueArray, OpaqueContent, StructArray};
use crate::error::{MatError, Result};
use crate::format::{ByteOrder, FileHeader, REDUCED_HEADER_SIZE};
use crate::mcos::{McosObject, ObjectArena, ReferenceRegistry, wrapper};
use crate::reader::{self, FILE_WRAPPER_CLASS, MCOS_TYPE, ReadOptions};
use crate::writer;

const MCOS_FIELD: &str = "MCOS";

/// The raw subsystem blob of a file: a reduced-header sub-file whose first
/// element carries the object table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subsystem {
    bytes: Vec<u8>,
}

impl Subsystem {
    /// Wraps raw subsystem bytes, as stored in the file.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the subsystem, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Byte order announced by the sub-file header.
    pub fn order(&self) -> Result<ByteOrder> {
        let marker = self
            .bytes
            .get(2..4)
            .ok_or_else(|| MatError::format("subsystem shorter than its header"))?;
        match marker {
            b"IM" => Ok(ByteOrder::Little),
            b"MI" => Ok(ByteOrder::Big),
            other => Err(MatError::format(format!("subsystem endian marker {other:?}"))),
        }
    }

    /// Encodes `objects` (ids `1..=n` in slice order) as a subsystem.
    pub fn encode(
        objects: &[McosObject],
        order: ByteOrder,
        allocator: &Arc<dyn BufferAllocator>,
    ) -> Result<Self> {
        let table = wrapper::encode(objects, order, allocator)?;
        let wrapper = Array::Opaque(OpaqueArray {
            global: false,
            object_type: MCOS_TYPE.to_string(),
            class_name: FILE_WRAPPER_CLASS.to_string(),
            content: OpaqueContent::FileWrapper(Box::new(table)),
        });
        let mut root = StructArray::new(vec![1, 1], Vec::new());
        root.set_field(0, MCOS_FIELD, wrapper)?;

        let mut bytes = FileHeader::reduced(order).to_bytes();
        debug_assert_eq!(bytes.len(), REDUCED_HEADER_SIZE);
        writer::encode_element(&mut bytes, Entry::new("", Array::Struct(root)), order)?;
        Ok(Self { bytes })
    }

    /// Parses the object table into an arena, binding references held by
    /// object properties.
    pub fn decode_objects(&self, options: &ReadOptions) -> Result<ObjectArena> {
        let order = self.order()?;
        let root = reader::read_subsystem_root(self.bytes.clone(), options)?;
        let table = match &root {
            Array::Opaque(OpaqueArray { content: OpaqueContent::FileWrapper(t), .. }) => t.as_ref(),
            Array::Struct(s) => match s.field(0, MCOS_FIELD) {
                Some(Array::Opaque(OpaqueArray {
                    content: OpaqueContent::FileWrapper(t), ..
                })) => t.as_ref(),
                _ => return Err(MatError::format("subsystem struct has no MCOS object table")),
            },
            other => {
                return Err(MatError::format(format!(
                    "subsystem starts with a {:?} array, expected an object table",
                    other.class()
                )));
            }
        };
        let objects = wrapper::decode(table, order, options.allocator())?;
        let mut arena = ObjectArena::from_objects(objects);
        let count = arena.len();
        for object in arena.objects_mut() {
            for (_, value) in &mut object.fields {
                value.visit_references_mut(&mut |r| r.bind(count))?;
            }
        }
        Ok(arena)
    }
}

/// Binds every reference in `entries` to the subsystem's objects.
///
/// Files without references skip the subsystem entirely.
///
/// # Errors
/// Returns `MatError::Format` when references exist but the file carries no
/// subsystem, or when a reference names an id the table lacks.
pub(crate) fn resolve(
    entries: &mut [Entry],
    registry: &ReferenceRegistry,
    subsystem: Option<&Subsystem>,
    options: &ReadOptions,
) -> Result<ObjectArena> {
    if registry.is_empty() {
        return Ok(ObjectArena::new());
    }
    let subsystem = subsystem.ok_or_else(|| {
        MatError::format(format!("{} object references but no subsystem", registry.len()))
    })?;
    let arena = subsystem.decode_objects(options)?;
    registry.validate(&arena)?;
    let count = arena.len();
    for entry in entries.iter_mut() {
        entry.value.visit_references_mut(&mut |r| r.bind(count))?;
    }
    Ok(arena)
}
