use crate::array::{Array, element_count};
use crate::error::{MatError, Result};
use crate::format::MCOS_MAGIC;
use crate::mcos::{McosObject, ObjectArena, ObjectId};

/// A placeholder for one or more class objects whose data lives in the
/// subsystem. Bound to the file's [`ObjectArena`] once the whole file is read.
#[derive(Debug, Clone, PartialEq)]
pub struct McosReference {
    dims: Vec<usize>,
    object_ids: Vec<u32>,
    class_id: u32,
    targets: Option<Vec<ObjectId>>,
}

impl McosReference {
    /// Creates an unresolved reference.
    ///
    /// # Errors
    /// Returns `MatError::Format` if `dims` has fewer than two entries or does
    /// not describe `object_ids.len()` elements.
    pub fn new(dims: Vec<usize>, object_ids: Vec<u32>, class_id: u32) -> Result<Self> {
        if dims.len() < 2 {
            return Err(MatError::format("object reference needs at least 2 dimensions"));
        }
        if element_count(&dims)? != object_ids.len() {
            return Err(MatError::format(format!(
                "object reference dims {dims:?} do not match {} ids",
                object_ids.len()
            )));
        }
        Ok(Self { dims, object_ids, class_id, targets: None })
    }

    /// Decodes the `UInt32` payload `[magic, ndims, dims.., ids.., class_id]`.
    pub fn from_payload(words: &[u32]) -> Result<Self> {
        let [magic, ndims, rest @ ..] = words else {
            return Err(MatError::format("object reference payload too short"));
        };
        if *magic != MCOS_MAGIC {
            return Err(MatError::format(format!(
                "object reference magic {magic:#010x}, expected {MCOS_MAGIC:#010x}"
            )));
        }
        let ndims = *ndims as usize;
        if ndims < 2 || rest.len() < ndims + 1 {
            return Err(MatError::format(format!("object reference declares {ndims} dimensions")));
        }
        let (dims, rest) = rest.split_at(ndims);
        let dims: Vec<usize> = dims.iter().map(|d| *d as usize).collect();
        let count = element_count(&dims)?;
        if count.checked_add(1) != Some(rest.len()) {
            return Err(MatError::format(format!(
                "object reference of {count} ids carries {} trailing words",
                rest.len()
            )));
        }
        let (ids, class_id) = rest.split_at(count);
        Self::new(dims, ids.to_vec(), class_id[0])
    }

    /// Encodes the `UInt32` payload.
    pub fn to_payload(&self) -> Vec<u32> {
        let mut words = Vec::with_capacity(3 + self.dims.len() + self.object_ids.len());
        words.push(MCOS_MAGIC);
        words.push(self.dims.len() as u32);
        words.extend(self.dims.iter().map(|d| *d as u32));
        words.extend_from_slice(&self.object_ids);
        words.push(self.class_id);
        words
    }

    /// Dimensions of the referenced object array.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Raw on-disk object ids, column-major.
    pub fn object_ids(&self) -> &[u32] {
        &self.object_ids
    }

    /// Class table index.
    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    /// True once bound to an arena.
    pub fn is_resolved(&self) -> bool {
        self.targets.is_some()
    }

    /// Bound targets, if resolved.
    pub fn targets(&self) -> Option<&[ObjectId]> {
        self.targets.as_deref()
    }

    /// Binds the reference to a table of `object_count` objects.
    pub(crate) fn bind(&mut self, object_count: usize) -> Result<()> {
        let targets = self
            .object_ids
            .iter()
            .map(|raw| ObjectArena::id_within(*raw, object_count))
            .collect::<Result<_>>()?;
        self.targets = Some(targets);
        Ok(())
    }

    /// The object at linear index `index`.
    ///
    /// # Errors
    /// Returns `MatError::Format` for an unresolved reference and
    /// `MatError::Range` for an out-of-bounds index.
    pub fn object<'a>(&self, arena: &'a ObjectArena, index: usize) -> Result<&'a McosObject> {
        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| MatError::format("object reference has not been resolved"))?;
        let id = targets.get(index).ok_or_else(|| {
            MatError::range(format!("object index {index} out of {}", targets.len()))
        })?;
        arena
            .get(*id)
            .ok_or_else(|| MatError::format(format!("object {id} missing from arena")))
    }

    /// Property `name` of the object at `index`.
    pub fn field<'a>(
        &self,
        arena: &'a ObjectArena,
        index: usize,
        name: &str,
    ) -> Result<Option<&'a Array>> {
        Ok(self.object(arena, index)?.field(name))
    }

    /// Property names of the referenced class. Empty or unresolved references
    /// have none.
    pub fn field_names<'a>(&self, arena: &'a ObjectArena) -> Result<Vec<&'a str>> {
        if self.object_ids.is_empty() || self.targets.is_none() {
            return Ok(Vec::new());
        }
        Ok(self.object(arena, 0)?.field_names().collect())
    }
}

/// Per-read record of every reference encountered, in encounter order.
///
/// A file without references never touches its subsystem.
#[derive(Debug, Default)]
pub struct ReferenceRegistry {
    pending: Vec<(u32, Vec<u32>)>,
}

impl ReferenceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a decoded reference.
    pub fn register(&mut self, reference: &McosReference) {
        self.pending.push((reference.class_id, reference.object_ids.clone()));
    }

    /// Appends the records of a registry filled on another thread.
    pub fn merge(&mut self, other: ReferenceRegistry) {
        self.pending.extend(other.pending);
    }

    /// Number of recorded references.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if no references were recorded.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Checks every recorded id against the arena.
    pub fn validate(&self, arena: &ObjectArena) -> Result<()> {
        for (class_id, ids) in &self.pending {
            for raw in ids {
                arena.id(*raw).map_err(|e| {
                    MatError::format(format!("reference of class {class_id}: {e}"))
                })?;
            }
        }
        Ok(())
    }
}
