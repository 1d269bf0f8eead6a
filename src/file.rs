//! The decoded file: header, root entries and the class objects they refer to.

use std::sync::Arc;

use crate::allocator::BufferAllocator;
use crate::array::{Array, Entry, OpaqueArray, OpaqueContent};
use crate::error::{MatError, Result};
use crate::format::{ByteOrder, FileHeader};
use crate::mcos::{McosObject, McosReference, ObjectArena, Subsystem, class_table};
use crate::reader::MCOS_TYPE;

/// An in-memory MAT5 file.
///
/// Root entries keep file order. The subsystem, when present, is not an entry:
/// it is kept as raw bytes and re-emitted unchanged on write, while its decoded
/// objects live in [`objects`](Self::objects).
#[derive(Debug, Clone)]
pub struct MatFile {
    header: FileHeader,
    entries: Vec<Entry>,
    subsystem: Option<Subsystem>,
    objects: ObjectArena,
}

impl MatFile {
    /// An empty file with a full native-order header.
    pub fn new() -> Self {
        Self::from_parts(FileHeader::full(ByteOrder::native()), Vec::new(), None, ObjectArena::new())
    }

    pub(crate) fn from_parts(
        header: FileHeader,
        entries: Vec<Entry>,
        subsystem: Option<Subsystem>,
        objects: ObjectArena,
    ) -> Self {
        Self { header, entries, subsystem, objects }
    }

    /// The header the file was read with.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Number of root entries, not counting the subsystem.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the file has no root entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value of the first entry named `name`.
    pub fn get(&self, name: &str) -> Option<&Array> {
        self.entry(name).map(|e| &e.value)
    }

    /// Mutable value of the first entry named `name`.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Array> {
        self.entries.iter_mut().find(|e| e.name == name).map(|e| &mut e.value)
    }

    /// First entry named `name`.
    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Entries in file order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Entry names in file order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Appends an entry, replacing an existing one with the same name in place.
    pub fn push(&mut self, entry: Entry) {
        match self.entries.iter_mut().find(|e| !e.name.is_empty() && e.name == entry.name) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
    }

    /// Shorthand for `push(Entry::new(name, value))`.
    pub fn insert(&mut self, name: impl Into<String>, value: Array) {
        self.push(Entry::new(name, value));
    }

    /// Removes the first entry named `name`.
    pub fn remove(&mut self, name: &str) -> Option<Array> {
        let index = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(index).value)
    }

    /// Consumes the file, returning its entries.
    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    /// Raw subsystem bytes, if the file carries a subsystem.
    pub fn subsystem(&self) -> Option<&Subsystem> {
        self.subsystem.as_ref()
    }

    /// Objects decoded from the subsystem.
    ///
    /// Empty when the file had no references, even if it carries a subsystem.
    pub fn objects(&self) -> &ObjectArena {
        &self.objects
    }

    /// Replaces the class objects and re-encodes the subsystem.
    ///
    /// Object ids are assigned `1..=n` in slice order. References already in
    /// the file are re-bound and must name ids within the new table.
    pub fn set_objects(
        &mut self,
        objects: Vec<McosObject>,
        order: ByteOrder,
        allocator: &Arc<dyn BufferAllocator>,
    ) -> Result<()> {
        let subsystem = Subsystem::encode(&objects, order, allocator)?;
        let count = objects.len();
        for entry in &mut self.entries {
            entry.value.visit_references_mut(&mut |r| r.bind(count))?;
        }
        self.objects = ObjectArena::from_objects(objects);
        self.subsystem = Some(subsystem);
        Ok(())
    }

    /// Builds a bound reference value to the objects with ids `ids`.
    ///
    /// All ids must name objects of the same class.
    ///
    /// # Errors
    /// Returns `MatError::Format` for unknown ids or mixed classes.
    pub fn reference_to(&self, dims: Vec<usize>, ids: Vec<u32>) -> Result<Array> {
        let classes = class_table(self.objects.objects());
        let mut class_id = 0u32;
        let mut class_name = String::new();
        for raw in &ids {
            let object = self
                .objects
                .get(self.objects.id(*raw)?)
                .ok_or_else(|| MatError::format(format!("no object with id {raw}")))?;
            let key = (object.package_name.clone(), object.class_name.clone());
            let position = classes.iter().position(|c| *c == key).unwrap_or(0);
            let id = u32::try_from(position + 1).map_err(|_| MatError::range("too many classes"))?;
            if class_id != 0 && class_id != id {
                return Err(MatError::format("reference mixes objects of different classes"));
            }
            class_id = id;
            class_name = object.qualified_name();
        }
        let mut reference = McosReference::new(dims, ids, class_id)?;
        reference.bind(self.objects.len())?;
        Ok(Array::Opaque(OpaqueArray {
            global: false,
            object_type: MCOS_TYPE.to_string(),
            class_name,
            content: OpaqueContent::Reference(reference),
        }))
    }

    /// Property `property` of object `index` behind the reference stored in
    /// entry `name`.
    ///
    /// # Errors
    /// Returns `MatError::Format` if the entry is not a class-object reference.
    pub fn object_field(&self, name: &str, index: usize, property: &str) -> Result<Option<&Array>> {
        let reference = self
            .get(name)
            .and_then(Array::as_reference)
            .ok_or_else(|| MatError::format(format!("entry '{name}' is not an object reference")))?;
        reference.field(&self.objects, index, property)
    }
}

impl Default for MatFile {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IntoIterator for &'a MatFile {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::default_allocator;
    use crate::array::{CharArray, NumericArray};

    #[test]
    fn push_replaces_named_entries_in_place() {
        let alloc = default_allocator();
        let mut file = MatFile::new();
        file.insert("a", Array::empty());
        file.insert("b", Array::Char(CharArray::from_text("b")));
        file.insert("a", Array::Numeric(NumericArray::scalar(2.0, &alloc).unwrap()));
        assert_eq!(file.names().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(file.get("a").and_then(Array::as_numeric).unwrap().get_f64(0).unwrap(), 2.0);
        assert!(file.remove("a").is_some());
        assert_eq!(file.len(), 1);
    }

    #[test]
    fn references_resolve_against_installed_objects() {
        let alloc = default_allocator();
        let mut file = MatFile::new();
        file.set_objects(
            vec![
                McosObject::new("Point").with_field("x", Array::Numeric(NumericArray::scalar(1.0, &alloc).unwrap())),
                McosObject::new("Point").with_field("x", Array::Numeric(NumericArray::scalar(2.0, &alloc).unwrap())),
                McosObject::new("Other"),
            ],
            ByteOrder::native(),
            &alloc,
        )
        .unwrap();
        let value = file.reference_to(vec![1, 2], vec![2, 1]).unwrap();
        assert_eq!(value.as_reference().unwrap().class_id(), 1);
        file.insert("p", value);

        let x = file.object_field("p", 0, "x").unwrap().and_then(Array::as_numeric).unwrap();
        assert_eq!(x.get_f64(0).unwrap(), 2.0);
        assert!(file.object_field("p", 0, "missing").unwrap().is_none());
        assert!(file.reference_to(vec![1, 2], vec![1, 3]).is_err());
        assert!(file.reference_to(vec![1, 1], vec![9]).is_err());
    }
}
