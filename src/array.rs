//! The decoded element tree.
//!
//! [`Array`] is a closed union with one variant per array kind. Storage is
//! owned: dropping an array drops its children first and then releases its own
//! number buffers back to their allocator.

use std::sync::Arc;

use crate::allocator::BufferAllocator;
use crate::error::{MatError, Result};
use crate::format::{ArrayClass, MatType};
use crate::mcos::McosReference;
use crate::number::NumberStore;
use crate::sparse::SparseMatrix;

const SCALAR_DIMS: [usize; 2] = [1, 1];

/// Any element that can appear in a file.
#[derive(Debug, Clone, PartialEq)]
pub enum Array {
    /// Dense numeric or logical matrix.
    Numeric(NumericArray),
    /// Compressed-column sparse matrix.
    Sparse(SparseArray),
    /// Character matrix.
    Char(CharArray),
    /// Cell array of nested elements.
    Cell(CellArray),
    /// Struct array.
    Struct(StructArray),
    /// Struct array tagged with a class name.
    Object(ObjectArray),
    /// Function handle wrapping one struct.
    FunctionHandle(FunctionHandle),
    /// Undocumented class-object extension.
    Opaque(OpaqueArray),
}

impl Array {
    /// A `0x0` double matrix, the value of unset cells and fields.
    pub fn empty() -> Self {
        Self::Numeric(NumericArray::empty())
    }

    /// Dimensions (at least two).
    pub fn dims(&self) -> &[usize] {
        match self {
            Self::Numeric(a) => &a.dims,
            Self::Sparse(a) => &a.dims,
            Self::Char(a) => &a.dims,
            Self::Cell(a) => &a.dims,
            Self::Struct(a) => &a.dims,
            Self::Object(a) => &a.fields.dims,
            Self::FunctionHandle(_) => &SCALAR_DIMS,
            Self::Opaque(a) => match &a.content {
                OpaqueContent::Reference(r) => r.dims(),
                _ => &SCALAR_DIMS,
            },
        }
    }

    /// Product of the dimensions.
    pub fn num_elements(&self) -> usize {
        saturating_count(self.dims())
    }

    /// Global flag.
    pub fn is_global(&self) -> bool {
        match self {
            Self::Numeric(a) => a.global,
            Self::Sparse(a) => a.global,
            Self::Char(a) => a.global,
            Self::Cell(a) => a.global,
            Self::Struct(a) => a.global,
            Self::Object(a) => a.fields.global,
            Self::FunctionHandle(a) => a.global,
            Self::Opaque(a) => a.global,
        }
    }

    /// Sets the global flag.
    pub fn set_global(&mut self, global: bool) {
        match self {
            Self::Numeric(a) => a.global = global,
            Self::Sparse(a) => a.global = global,
            Self::Char(a) => a.global = global,
            Self::Cell(a) => a.global = global,
            Self::Struct(a) => a.global = global,
            Self::Object(a) => a.fields.global = global,
            Self::FunctionHandle(a) => a.global = global,
            Self::Opaque(a) => a.global = global,
        }
    }

    /// The array class written to the flags sub-element.
    pub fn class(&self) -> ArrayClass {
        match self {
            Self::Numeric(a) => a.class,
            Self::Sparse(_) => ArrayClass::Sparse,
            Self::Char(_) => ArrayClass::Char,
            Self::Cell(_) => ArrayClass::Cell,
            Self::Struct(_) => ArrayClass::Struct,
            Self::Object(_) => ArrayClass::Object,
            Self::FunctionHandle(_) => ArrayClass::Function,
            Self::Opaque(_) => ArrayClass::Opaque,
        }
    }

    /// Visits every MCOS reference in this tree, depth first.
    pub(crate) fn visit_references_mut(
        &mut self,
        f: &mut dyn FnMut(&mut McosReference) -> Result<()>,
    ) -> Result<()> {
        match self {
            Self::Numeric(_) | Self::Sparse(_) | Self::Char(_) => Ok(()),
            Self::Cell(a) => a.cells.iter_mut().try_for_each(|c| c.visit_references_mut(f)),
            Self::Struct(a) => a.values.iter_mut().try_for_each(|v| v.visit_references_mut(f)),
            Self::Object(a) => a.fields.values.iter_mut().try_for_each(|v| v.visit_references_mut(f)),
            Self::FunctionHandle(a) => {
                a.content.values.iter_mut().try_for_each(|v| v.visit_references_mut(f))
            }
            Self::Opaque(a) => match &mut a.content {
                OpaqueContent::Reference(r) => f(r),
                OpaqueContent::Java(_) => Ok(()),
                OpaqueContent::FileWrapper(inner) | OpaqueContent::Generic(inner) => {
                    inner.visit_references_mut(f)
                }
            },
        }
    }

    /// Returns the numeric variant, if this is one.
    pub fn as_numeric(&self) -> Option<&NumericArray> {
        match self {
            Self::Numeric(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the char variant, if this is one.
    pub fn as_char(&self) -> Option<&CharArray> {
        match self {
            Self::Char(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the struct variant, if this is one.
    pub fn as_struct(&self) -> Option<&StructArray> {
        match self {
            Self::Struct(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the cell variant, if this is one.
    pub fn as_cell(&self) -> Option<&CellArray> {
        match self {
            Self::Cell(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the MCOS reference inside an opaque array, if this is one.
    pub fn as_reference(&self) -> Option<&McosReference> {
        match self {
            Self::Opaque(OpaqueArray { content: OpaqueContent::Reference(r), .. }) => Some(r),
            _ => None,
        }
    }
}

/// Number of elements described by `dims`.
///
/// # Errors
/// Returns `MatError::Format` if the product overflows `usize`.
pub fn element_count(dims: &[usize]) -> Result<usize> {
    if dims.contains(&0) {
        return Ok(0);
    }
    dims.iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(*d))
        .ok_or_else(|| MatError::format(format!("dimensions {dims:?} overflow the element count")))
}

fn saturating_count(dims: &[usize]) -> usize {
    dims.iter().fold(1usize, |acc, d| acc.saturating_mul(*d))
}

fn check_dims(dims: &[usize], num_elements: usize) -> Result<()> {
    if dims.len() < 2 {
        return Err(MatError::format(format!("arrays need at least 2 dimensions, got {dims:?}")));
    }
    let expected = element_count(dims)?;
    if expected != num_elements {
        return Err(MatError::format(format!(
            "dimensions {dims:?} describe {expected} elements, found {num_elements}"
        )));
    }
    Ok(())
}

/// Dense numeric or logical matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    /// Nominal class (the physical storage may be narrower).
    pub class: ArrayClass,
    /// Dimensions.
    pub dims: Vec<usize>,
    /// Global flag.
    pub global: bool,
    /// Logical flag.
    pub logical: bool,
    /// Real part, column-major.
    pub real: NumberStore,
    /// Imaginary part, present for complex arrays.
    pub imaginary: Option<NumberStore>,
}

impl NumericArray {
    /// Wraps a store. `class` must be a numeric class.
    ///
    /// # Errors
    /// Returns `MatError::Format` for non-numeric classes or mismatched dims.
    pub fn new(class: ArrayClass, dims: Vec<usize>, real: NumberStore) -> Result<Self> {
        if class.numeric_type().is_none() {
            return Err(MatError::format(format!("{class:?} is not a numeric class")));
        }
        check_dims(&dims, real.len())?;
        Ok(Self { class, dims, global: false, logical: false, real, imaginary: None })
    }

    /// Adds an imaginary part.
    pub fn with_imaginary(mut self, imaginary: NumberStore) -> Result<Self> {
        if imaginary.len() != self.real.len() {
            return Err(MatError::format("imaginary part length differs from real part"));
        }
        self.imaginary = Some(imaginary);
        Ok(self)
    }

    /// A `double` matrix stored with compaction.
    pub fn from_f64(
        dims: Vec<usize>,
        values: &[f64],
        allocator: &Arc<dyn BufferAllocator>,
    ) -> Result<Self> {
        Self::new(ArrayClass::Double, dims, NumberStore::compacted(values, allocator)?)
    }

    /// A `1x1` double.
    pub fn scalar(value: f64, allocator: &Arc<dyn BufferAllocator>) -> Result<Self> {
        Self::new(
            ArrayClass::Double,
            vec![1, 1],
            NumberStore::from_f64(MatType::Double, &[value], allocator)?,
        )
    }

    /// A logical matrix backed by `UInt8`.
    pub fn logical(
        dims: Vec<usize>,
        values: &[bool],
        allocator: &Arc<dyn BufferAllocator>,
    ) -> Result<Self> {
        let ints: Vec<i64> = values.iter().map(|b| i64::from(*b)).collect();
        let mut array =
            Self::new(ArrayClass::UInt8, dims, NumberStore::from_i64(MatType::UInt8, &ints, allocator)?)?;
        array.logical = true;
        Ok(array)
    }

    /// A `0x0` double matrix.
    pub fn empty() -> Self {
        Self {
            class: ArrayClass::Double,
            dims: vec![0, 0],
            global: false,
            logical: false,
            real: NumberStore::empty_double(),
            imaginary: None,
        }
    }

    /// Returns true for complex arrays.
    pub fn is_complex(&self) -> bool {
        self.imaginary.is_some()
    }

    /// Real value at a linear (column-major) index.
    pub fn get_f64(&self, index: usize) -> Result<f64> {
        self.real.get_f64(index)
    }

    /// Real value at a multi-dimensional index.
    pub fn get_f64_at(&self, index: &[usize]) -> Result<f64> {
        self.real.get_f64(linear_index(&self.dims, index)?)
    }
}

/// Converts a subscript into a column-major linear index.
pub fn linear_index(dims: &[usize], index: &[usize]) -> Result<usize> {
    if index.len() != dims.len() {
        return Err(MatError::range(format!("index {index:?} does not match dims {dims:?}")));
    }
    let mut linear = 0;
    let mut stride = 1;
    for (i, (d, x)) in dims.iter().zip(index).enumerate() {
        if x >= d {
            return Err(MatError::range(format!("index {x} out of bounds for dimension {i} ({d})")));
        }
        linear += x * stride;
        stride *= d;
    }
    Ok(linear)
}

/// Sparse matrix element.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseArray {
    /// `[rows, cols]`.
    pub dims: Vec<usize>,
    /// Global flag.
    pub global: bool,
    /// Logical flag.
    pub logical: bool,
    /// The CSC data.
    pub matrix: SparseMatrix,
}

impl SparseArray {
    /// Wraps a sparse matrix.
    pub fn new(matrix: SparseMatrix) -> Self {
        Self { dims: vec![matrix.rows(), matrix.cols()], global: false, logical: false, matrix }
    }
}

/// Character matrix stored as UTF-16 code units, column-major.
#[derive(Debug, Clone, PartialEq)]
pub struct CharArray {
    /// Dimensions.
    pub dims: Vec<usize>,
    /// Global flag.
    pub global: bool,
    /// Storage type used when writing (`UInt16`, `Utf8`, `Utf16` or `Utf32`).
    pub encoding: MatType,
    /// Code units.
    pub chars: Vec<u16>,
}

impl CharArray {
    /// A `1xN` row holding `text`.
    pub fn from_text(text: &str) -> Self {
        let chars: Vec<u16> = text.encode_utf16().collect();
        Self { dims: vec![1, chars.len()], global: false, encoding: MatType::UInt16, chars }
    }

    /// Wraps code units with explicit dims.
    pub fn new(dims: Vec<usize>, chars: Vec<u16>) -> Result<Self> {
        check_dims(&dims, chars.len())?;
        Ok(Self { dims, global: false, encoding: MatType::UInt16, chars })
    }

    /// The whole array as a string, in column-major order.
    pub fn to_text(&self) -> String {
        String::from_utf16_lossy(&self.chars)
    }

    /// Row `r` of a 2-D char matrix.
    pub fn row(&self, r: usize) -> Option<String> {
        let rows = *self.dims.first()?;
        if r >= rows {
            return None;
        }
        let units: Vec<u16> = self.chars.iter().skip(r).step_by(rows).copied().collect();
        Some(String::from_utf16_lossy(&units))
    }
}

/// Cell array, column-major.
#[derive(Debug, Clone, PartialEq)]
pub struct CellArray {
    /// Dimensions.
    pub dims: Vec<usize>,
    /// Global flag.
    pub global: bool,
    /// Elements.
    pub cells: Vec<Array>,
}

impl CellArray {
    /// Wraps elements with explicit dims.
    pub fn new(dims: Vec<usize>, cells: Vec<Array>) -> Result<Self> {
        check_dims(&dims, cells.len())?;
        Ok(Self { dims, global: false, cells })
    }

    /// Element at a linear index.
    pub fn get(&self, index: usize) -> Option<&Array> {
        self.cells.get(index)
    }
}

/// Struct array. Values are laid out element by element, all fields of one
/// element next to each other.
#[derive(Debug, Clone, PartialEq)]
pub struct StructArray {
    /// Dimensions.
    pub dims: Vec<usize>,
    /// Global flag.
    pub global: bool,
    /// Ordered field names.
    pub field_names: Vec<String>,
    /// `num_elements * field_names.len()` values.
    pub values: Vec<Array>,
}

impl StructArray {
    /// A struct array whose fields all hold empty matrices.
    pub fn new(dims: Vec<usize>, field_names: Vec<String>) -> Self {
        let count = saturating_count(&dims).saturating_mul(field_names.len());
        Self {
            dims,
            global: false,
            field_names,
            values: (0..count).map(|_| Array::empty()).collect(),
        }
    }

    /// Wraps decoded values.
    pub fn from_values(dims: Vec<usize>, field_names: Vec<String>, values: Vec<Array>) -> Result<Self> {
        let elements = element_count(&dims)?;
        if elements.checked_mul(field_names.len()) != Some(values.len()) {
            return Err(MatError::format(format!(
                "struct of {elements} elements with {} fields holds {} values",
                field_names.len(),
                values.len()
            )));
        }
        Ok(Self { dims, global: false, field_names, values })
    }

    /// Number of struct elements.
    pub fn num_elements(&self) -> usize {
        saturating_count(&self.dims)
    }

    fn slot(&self, index: usize, name: &str) -> Option<usize> {
        let field = self.field_names.iter().position(|f| f == name)?;
        (index < self.num_elements()).then(|| index * self.field_names.len() + field)
    }

    /// Field `name` of element `index`.
    pub fn field(&self, index: usize, name: &str) -> Option<&Array> {
        self.values.get(self.slot(index, name)?)
    }

    /// Sets field `name` of element `index`, adding the field if needed.
    ///
    /// # Errors
    /// Returns `MatError::Range` if `index` is out of bounds.
    pub fn set_field(&mut self, index: usize, name: &str, value: Array) -> Result<()> {
        let elements = self.num_elements();
        if index >= elements {
            return Err(MatError::range(format!("struct index {index} out of {elements}")));
        }
        if !self.field_names.iter().any(|f| f == name) {
            let old = self.field_names.len();
            let mut values = Vec::with_capacity(elements * (old + 1));
            let mut drained = std::mem::take(&mut self.values).into_iter();
            for _ in 0..elements {
                values.extend(drained.by_ref().take(old));
                values.push(Array::empty());
            }
            self.values = values;
            self.field_names.push(name.to_string());
        }
        if let Some(slot) = self.slot(index, name)
            && let Some(target) = self.values.get_mut(slot)
        {
            *target = value;
        }
        Ok(())
    }
}

/// Struct array tagged with a class name.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectArray {
    /// Class name.
    pub class_name: String,
    /// Field storage.
    pub fields: StructArray,
}

/// Function handle. Its content is a single struct describing the function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionHandle {
    /// Global flag.
    pub global: bool,
    /// Descriptor struct.
    pub content: StructArray,
}

/// Opaque class-object element.
#[derive(Debug, Clone, PartialEq)]
pub struct OpaqueArray {
    /// Global flag.
    pub global: bool,
    /// Type system string (`"MCOS"`, `"java"`, ...).
    pub object_type: String,
    /// Class name.
    pub class_name: String,
    /// Decoded content, dispatched on `object_type`.
    pub content: OpaqueContent,
}

/// Content of an opaque element.
#[derive(Debug, Clone, PartialEq)]
pub enum OpaqueContent {
    /// Serialized Java object bytes (`UInt8` vector).
    Java(NumericArray),
    /// Forward reference into the subsystem's object table.
    Reference(McosReference),
    /// The subsystem's `FileWrapper__` object table.
    FileWrapper(Box<Array>),
    /// Any other opaque payload.
    Generic(Box<Array>),
}

/// A named root-level binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Variable name.
    pub name: String,
    /// Global variable.
    pub global: bool,
    /// Bound value.
    pub value: Array,
}

impl Entry {
    /// Creates an entry whose global flag follows `value`.
    pub fn new(name: impl Into<String>, value: Array) -> Self {
        let global = value.is_global();
        Self { name: name.into(), global, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::default_allocator;

    #[test]
    fn struct_fields_grow_in_place() {
        let alloc = default_allocator();
        let mut s = StructArray::new(vec![1, 2], vec!["a".into()]);
        s.set_field(1, "a", Array::Numeric(NumericArray::scalar(1.0, &alloc).unwrap())).unwrap();
        s.set_field(0, "b", Array::Char(CharArray::from_text("x"))).unwrap();
        assert_eq!(s.field_names, vec!["a", "b"]);
        assert_eq!(s.values.len(), 4);
        assert_eq!(s.field(1, "a").and_then(Array::as_numeric).map(|n| n.get_f64(0).unwrap()), Some(1.0));
        assert_eq!(s.field(0, "b").and_then(Array::as_char).map(CharArray::to_text), Some("x".into()));
        assert_eq!(s.field(1, "b"), Some(&Array::empty()));
        assert!(s.set_field(2, "a", Array::empty()).is_err());
    }

    #[test]
    fn char_rows_follow_column_major_order() {
        let chars: Vec<u16> = "adbecf".encode_utf16().collect();
        let c = CharArray::new(vec![2, 3], chars).unwrap();
        assert_eq!(c.row(0).as_deref(), Some("abc"));
        assert_eq!(c.row(1).as_deref(), Some("def"));
        assert_eq!(c.row(2), None);
    }

    #[test]
    fn overflowing_dimensions_are_format_errors() {
        assert_eq!(element_count(&[2, 3, 4]).unwrap(), 24);
        assert_eq!(element_count(&[usize::MAX, usize::MAX, 0]).unwrap(), 0);
        let huge = [65_536usize; 4];
        assert!(matches!(element_count(&huge), Err(MatError::Format(_))));
        assert!(matches!(CharArray::new(huge.to_vec(), Vec::new()), Err(MatError::Format(_))));
    }

    #[test]
    fn linear_indices_are_column_major() {
        assert_eq!(linear_index(&[2, 3], &[1, 2]).unwrap(), 5);
        assert_eq!(linear_index(&[2, 3, 4], &[1, 0, 1]).unwrap(), 7);
        assert!(linear_index(&[2, 3], &[2, 0]).is_err());
    }

    #[test]
    fn numeric_dims_must_match_storage() {
        let alloc = default_allocator();
        let store = NumberStore::from_f64(MatType::Double, &[1.0, 2.0], &alloc).unwrap();
        assert!(NumericArray::new(ArrayClass::Double, vec![1, 3], store.clone()).is_err());
        assert!(NumericArray::new(ArrayClass::Char, vec![1, 2], store.clone()).is_err());
        let a = NumericArray::new(ArrayClass::Double, vec![2, 1], store).unwrap();
        assert_eq!(a.get_f64_at(&[1, 0]).unwrap(), 2.0);
    }
}
