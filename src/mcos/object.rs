use crate::array::Array;
use crate::error::{MatError, Result};
use crate::mcos::ObjectId;

/// One backing object of the subsystem's object table.
#[derive(Debug, Clone, PartialEq)]
pub struct McosObject {
    /// Package name, empty for classes outside a package.
    pub package_name: String,
    /// Class name.
    pub class_name: String,
    /// Ordered `(property name, value)` pairs.
    pub fields: Vec<(String, Array)>,
}

impl McosObject {
    /// Creates an object without properties.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self { package_name: String::new(), class_name: class_name.into(), fields: Vec::new() }
    }

    /// Sets the package name.
    pub fn with_package(mut self, package_name: impl Into<String>) -> Self {
        self.package_name = package_name.into();
        self
    }

    /// Adds or replaces a property.
    pub fn with_field(mut self, name: impl Into<String>, value: Array) -> Self {
        self.set_field(name, value);
        self
    }

    /// Adds or replaces a property.
    pub fn set_field(&mut self, name: impl Into<String>, value: Array) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Property value by name.
    pub fn field(&self, name: &str) -> Option<&Array> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Property names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// `package.Class`, or just `Class`.
    pub fn qualified_name(&self) -> String {
        if self.package_name.is_empty() {
            self.class_name.clone()
        } else {
            format!("{}.{}", self.package_name, self.class_name)
        }
    }
}

/// Owns every object of one file. Slot 0 is a sentinel so that on-disk ids
/// index the table directly.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectArena {
    objects: Vec<McosObject>,
}

impl ObjectArena {
    /// An arena holding only the sentinel.
    pub fn new() -> Self {
        Self { objects: vec![McosObject::new("")] }
    }

    /// An arena over `objects`, which receive ids `1..=objects.len()`.
    pub fn from_objects(objects: Vec<McosObject>) -> Self {
        let mut arena = Self::new();
        arena.objects.extend(objects);
        arena
    }

    /// Number of real objects.
    pub fn len(&self) -> usize {
        self.objects.len() - 1
    }

    /// Returns true if there are no real objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validates a raw on-disk id.
    ///
    /// # Errors
    /// Returns `MatError::Format` for the sentinel id or an id past the table.
    pub fn id(&self, raw: u32) -> Result<ObjectId> {
        Self::id_within(raw, self.len())
    }

    pub(crate) fn id_within(raw: u32, count: usize) -> Result<ObjectId> {
        if raw == 0 || raw as usize > count {
            return Err(MatError::format(format!(
                "object id {raw} not present in subsystem table of {count} objects"
            )));
        }
        Ok(ObjectId::new(raw))
    }

    /// Object by id.
    pub fn get(&self, id: ObjectId) -> Option<&McosObject> {
        (id.index() > 0).then(|| self.objects.get(id.index())).flatten()
    }

    /// Real objects paired with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &McosObject)> {
        self.objects.iter().enumerate().skip(1).map(|(i, o)| (ObjectId::new(i as u32), o))
    }

    /// Real objects, in id order.
    pub fn objects(&self) -> &[McosObject] {
        &self.objects[1..]
    }

    pub(crate) fn objects_mut(&mut self) -> &mut [McosObject] {
        &mut self.objects[1..]
    }
}

impl Default for ObjectArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_skip_the_sentinel() {
        let arena = ObjectArena::from_objects(vec![McosObject::new("A"), McosObject::new("B")]);
        assert_eq!(arena.len(), 2);
        assert!(arena.id(0).is_err());
        assert!(arena.id(3).is_err());
        let id = arena.id(2).unwrap();
        assert_eq!(arena.get(id).map(|o| o.class_name.as_str()), Some("B"));
        let names: Vec<_> = arena.iter().map(|(id, o)| (id.as_u32(), o.class_name.clone())).collect();
        assert_eq!(names, vec![(1, "A".to_string()), (2, "B".to_string())]);
    }

    #[test]
    fn properties_keep_declaration_order() {
        let obj = McosObject::new("Point")
            .with_package("geo")
            .with_field("x", Array::empty())
            .with_field("y", Array::empty())
            .with_field("x", Array::empty());
        assert_eq!(obj.field_names().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(obj.qualified_name(), "geo.Point");
        assert!(obj.field("z").is_none());
    }
}
