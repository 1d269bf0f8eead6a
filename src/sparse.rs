//! Compressed-column (CSC) sparse matrices.
//!
//! Layout: `row_indices` (one per stored value, ascending within a column),
//! `col_indices` (`cols + 1` offsets, non-decreasing), and the real and optional
//! imaginary values. `col_indices[c + 1] - col_indices[c]` is the number of
//! entries in column `c`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::allocator::BufferAllocator;
use crate::error::{MatError, Result};
use crate::format::MatType;
use crate::number::NumberStore;

/// A sparse matrix in compressed-column form.
#[derive(Debug, Clone)]
pub struct SparseMatrix {
    rows: usize,
    cols: usize,
    nz_max: usize,
    row_indices: Vec<i32>,
    col_indices: Vec<i32>,
    real: NumberStore,
    imaginary: Option<NumberStore>,
    default_value: f64,
}

impl SparseMatrix {
    /// Assembles a matrix from its decoded parts.
    ///
    /// The non-zero count is taken from `col_indices[cols]`, not from `nz_max`:
    /// an empty matrix may declare `nz_max == 1` with no row indices at all.
    ///
    /// # Errors
    /// Returns `MatError::Format` if the index arrays are inconsistent.
    pub fn from_parts(
        rows: usize,
        cols: usize,
        nz_max: usize,
        row_indices: Vec<i32>,
        col_indices: Vec<i32>,
        real: NumberStore,
        imaginary: Option<NumberStore>,
    ) -> Result<Self> {
        if col_indices.len() != cols + 1 {
            return Err(MatError::format(format!(
                "sparse column index has {} entries, expected {}",
                col_indices.len(),
                cols + 1
            )));
        }
        if col_indices[0] != 0 || col_indices.windows(2).any(|w| w[1] < w[0]) {
            return Err(MatError::format("sparse column index is not non-decreasing from 0"));
        }
        let nnz = col_indices[cols] as usize;
        if nnz > row_indices.len() || nnz > real.len() {
            return Err(MatError::format(format!(
                "sparse matrix claims {nnz} entries but stores {} row indices and {} values",
                row_indices.len(),
                real.len()
            )));
        }
        if let Some(imag) = &imaginary
            && imag.len() < nnz
        {
            return Err(MatError::format("sparse imaginary part is shorter than the real part"));
        }
        for c in 0..cols {
            let column = &row_indices[col_indices[c] as usize..col_indices[c + 1] as usize];
            if column.iter().any(|r| *r < 0 || *r as usize >= rows)
                || column.windows(2).any(|w| w[1] <= w[0])
            {
                return Err(MatError::format(format!(
                    "sparse column {c} has unsorted or out-of-range row indices"
                )));
            }
        }
        Ok(Self {
            rows,
            cols,
            nz_max,
            row_indices,
            col_indices,
            real,
            imaginary,
            default_value: 0.0,
        })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Declared capacity of the value arrays.
    pub fn nz_max(&self) -> usize {
        self.nz_max
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.col_indices[self.cols] as usize
    }

    /// Row index per stored entry.
    pub fn row_indices(&self) -> &[i32] {
        &self.row_indices[..self.nnz()]
    }

    /// Column offsets (`cols + 1` entries).
    pub fn col_indices(&self) -> &[i32] {
        &self.col_indices
    }

    /// Real values.
    pub fn real(&self) -> &NumberStore {
        &self.real
    }

    /// Imaginary values, if complex.
    pub fn imaginary(&self) -> Option<&NumberStore> {
        self.imaginary.as_ref()
    }

    pub(crate) fn stores_mut(&mut self) -> (&mut NumberStore, Option<&mut NumberStore>) {
        (&mut self.real, self.imaginary.as_mut())
    }

    /// Value reported for entries that are not stored.
    pub fn default_value(&self) -> f64 {
        self.default_value
    }

    /// Overrides the value reported for entries that are not stored.
    pub fn set_default_value(&mut self, value: f64) {
        self.default_value = value;
    }

    fn find(&self, row: usize, col: usize) -> Result<Option<usize>> {
        if row >= self.rows || col >= self.cols {
            return Err(MatError::range(format!(
                "({row}, {col}) outside {}x{} sparse matrix",
                self.rows, self.cols
            )));
        }
        let start = self.col_indices[col] as usize;
        let end = self.col_indices[col + 1] as usize;
        Ok(self.row_indices[start..end]
            .binary_search(&(row as i32))
            .ok()
            .map(|i| start + i))
    }

    /// Real value at `(row, col)`, or the default value if nothing is stored.
    pub fn get(&self, row: usize, col: usize) -> Result<f64> {
        match self.find(row, col)? {
            Some(i) => self.real.get_f64(i),
            None => Ok(self.default_value),
        }
    }

    /// Imaginary value at `(row, col)`; zero for real matrices and misses.
    pub fn get_imaginary(&self, row: usize, col: usize) -> Result<f64> {
        match (self.find(row, col)?, &self.imaginary) {
            (Some(i), Some(imag)) => imag.get_f64(i),
            _ => Ok(0.0),
        }
    }

    /// Visits every stored entry, columns ascending and rows ascending within a
    /// column. The callback receives `(row, col, real, imaginary)`.
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(usize, usize, f64, f64),
    {
        for col in 0..self.cols {
            let start = self.col_indices[col] as usize;
            let end = self.col_indices[col + 1] as usize;
            for i in start..end {
                let imag = match &self.imaginary {
                    Some(store) => store.get_f64(i)?,
                    None => 0.0,
                };
                f(self.row_indices[i] as usize, col, self.real.get_f64(i)?, imag);
            }
        }
        Ok(())
    }
}

impl PartialEq for SparseMatrix {
    fn eq(&self, other: &Self) -> bool {
        let nnz = self.nnz();
        self.rows == other.rows
            && self.cols == other.cols
            && self.col_indices == other.col_indices
            && self.row_indices() == other.row_indices()
            && (0..nnz).all(|i| self.real.get_f64(i).ok() == other.real.get_f64(i).ok())
            && match (&self.imaginary, &other.imaginary) {
                (Some(a), Some(b)) => (0..nnz).all(|i| a.get_f64(i).ok() == b.get_f64(i).ok()),
                (None, None) => true,
                _ => false,
            }
    }
}

/// Collects `(row, col, value)` triples and builds a [`SparseMatrix`].
#[derive(Debug, Clone)]
pub struct SparseBuilder {
    rows: usize,
    cols: usize,
    complex: bool,
    entries: BTreeMap<(usize, usize), (f64, f64)>,
}

impl SparseBuilder {
    /// Starts an empty `rows x cols` matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols, complex: false, entries: BTreeMap::new() }
    }

    /// Inserts or replaces a real value.
    pub fn insert(&mut self, row: usize, col: usize, value: f64) -> Result<&mut Self> {
        self.insert_complex(row, col, value, 0.0)?;
        Ok(self)
    }

    /// Inserts or replaces a complex value and marks the matrix complex.
    pub fn insert_complex(&mut self, row: usize, col: usize, re: f64, im: f64) -> Result<&mut Self> {
        if row >= self.rows || col >= self.cols {
            return Err(MatError::range(format!(
                "({row}, {col}) outside {}x{} sparse matrix",
                self.rows, self.cols
            )));
        }
        if im != 0.0 {
            self.complex = true;
        }
        // Keyed column-first so iteration yields CSC order.
        self.entries.insert((col, row), (re, im));
        Ok(self)
    }

    /// Builds the CSC layout with values stored as `physical` type.
    pub fn build(&self, physical: MatType, allocator: &Arc<dyn BufferAllocator>) -> Result<SparseMatrix> {
        let nnz = self.entries.len();
        let mut col_indices = vec![0i32; self.cols + 1];
        let mut row_indices = Vec::with_capacity(nnz);
        let mut real = Vec::with_capacity(nnz);
        let mut imag = Vec::with_capacity(nnz);
        for (&(col, row), &(re, im)) in &self.entries {
            col_indices[col + 1] += 1;
            row_indices.push(to_i32(row)?);
            real.push(re);
            imag.push(im);
        }
        for c in 0..self.cols {
            col_indices[c + 1] += col_indices[c];
        }
        let real = NumberStore::from_f64(physical, &real, allocator)?;
        let imaginary = if self.complex {
            Some(NumberStore::from_f64(physical, &imag, allocator)?)
        } else {
            None
        };
        SparseMatrix::from_parts(
            self.rows,
            self.cols,
            nnz.max(1),
            row_indices,
            col_indices,
            real,
            imaginary,
        )
    }
}

fn to_i32(v: usize) -> Result<i32> {
    i32::try_from(v).map_err(|_| MatError::range(format!("sparse index {v} exceeds int32")))
}
