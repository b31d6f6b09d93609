//! Reference-counted, copy-on-write matrices.
//!
//! # Model
//!
//! A [`Matrix`] is a cheap handle onto a shared *view*, and a view is a window onto a shared
//! *backing store*. Cloning a handle aliases the same view; [`Matrix::view`] creates a second view
//! onto the same store.
//!
//! Before every write the handle runs an exclusive-or-clone check:
//!
//! - an immutable view refuses the write with [`AntError::ProtectionViolation`];
//! - a write-in-place view writes straight through to the store, so every alias sees it;
//! - a copy-on-write view (the default) clones its logical window into a fresh store first,
//!   unless both the view and the store are held exclusively by this handle.
//!
//! The result is that mutation through a handle never surprises the holder of another handle
//! that did not opt into aliasing.
//!
//! # Transpose
//!
//! [`Matrix::transpose`] only flips a flag. Products consume the flag: `Aᵗ·B` and `Aᵗ·A` are
//! computed without a physical copy, and any other flagged combination is rejected. All other
//! operations read the untransposed window. [`Matrix::transposed`] makes a physical copy.
//!
//! # Example
//!
//! ```rust
//! use ant_nn::matrix::Matrix;
//!
//! let a = Matrix::from_rows(2, 2, &[1.0, 2.0, 3.0, 4.0]).unwrap();
//! let mut corner = a.view(1, 1, 1, 1).unwrap();
//! corner.set(0, 0, 9.0).unwrap();
//! assert_eq!(a.at(1, 1), 9.0);
//! ```

mod context;
mod linalg;
mod ops;
mod store;

pub use context::MatrixContext;

use std::cell::RefMut;
use std::fmt;
use std::rc::Rc;

use log::trace;

use crate::error::{AntError, Result};
use store::{BackingStore, View};

/// Handle onto a shared, possibly partial, possibly transposed window of `f64` values.
#[derive(Clone)]
pub struct Matrix {
    view: Rc<View>,
}

impl Matrix {
    /// Allocates a zeroed `rows × columns` matrix.
    ///
    /// # Errors
    /// [`AntError::InvalidDimension`] if either extent is zero.
    pub fn new(rows: usize, columns: usize) -> Result<Self> {
        Self::filled(rows, columns, 0.0)
    }

    pub fn filled(rows: usize, columns: usize, value: f64) -> Result<Self> {
        check_extent(rows, columns)?;
        Ok(Self::from_col_major(rows, columns, vec![value; rows * columns]))
    }

    /// Builds a matrix from row-major `values`.
    pub fn from_rows(rows: usize, columns: usize, values: &[f64]) -> Result<Self> {
        check_extent(rows, columns)?;
        if values.len() != rows * columns {
            return Err(AntError::mismatch(
                "from_rows",
                (rows, columns),
                (values.len(), 1),
            ));
        }
        let mut data = vec![0.0; rows * columns];
        for r in 0..rows {
            for c in 0..columns {
                data[c * rows + r] = values[r * columns + c];
            }
        }
        Ok(Self::from_col_major(rows, columns, data))
    }

    /// A column vector.
    pub fn column(values: &[f64]) -> Result<Self> {
        Self::from_rows(values.len(), 1, values)
    }

    /// A row vector.
    pub fn row(values: &[f64]) -> Result<Self> {
        Self::from_rows(1, values.len(), values)
    }

    pub fn identity(n: usize) -> Result<Self> {
        check_extent(n, n)?;
        let mut data = vec![0.0; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
        }
        Ok(Self::from_col_major(n, n, data))
    }

    /// Wraps an already packed column-major buffer. The caller guarantees the length.
    pub(crate) fn from_col_major(rows: usize, columns: usize, data: Vec<f64>) -> Self {
        Self {
            view: Rc::new(View::whole(BackingStore::from_vec(rows, columns, data))),
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.view.rows
    }

    #[inline]
    pub fn columns(&self) -> usize {
        self.view.columns
    }

    /// `(rows, columns)` of the untransposed window.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.view.rows, self.view.columns)
    }

    pub fn len(&self) -> usize {
        self.view.rows * self.view.columns
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_transposed(&self) -> bool {
        self.view.transposed
    }

    pub fn is_immutable(&self) -> bool {
        self.view.immutable
    }

    pub fn is_copy_on_write(&self) -> bool {
        self.view.copy_on_write
    }

    /// Serial number assigned by a [`MatrixContext`], or `0`.
    pub fn serial(&self) -> u64 {
        self.view.serial
    }

    pub(crate) fn set_serial(&mut self, serial: u64) {
        Rc::make_mut(&mut self.view).serial = serial;
    }

    /// Whether both handles reference the same backing store.
    pub fn shares_storage(&self, other: &Matrix) -> bool {
        Rc::ptr_eq(&self.view.store, &other.view.store)
    }

    /// Reads one element.
    ///
    /// # Panics
    /// Panics if `(row, column)` lies outside the window.
    #[inline]
    pub fn at(&self, row: usize, column: usize) -> f64 {
        assert!(
            row < self.view.rows && column < self.view.columns,
            "index ({row}, {column}) outside {}x{}",
            self.view.rows,
            self.view.columns
        );
        self.view.data()[self.view.offset(row, column)]
    }

    /// Checked read.
    pub fn get(&self, row: usize, column: usize) -> Option<f64> {
        (row < self.view.rows && column < self.view.columns)
            .then(|| self.view.data()[self.view.offset(row, column)])
    }

    /// Mutable access to one element, after the copy-on-write check.
    ///
    /// # Errors
    /// - [`AntError::ProtectionViolation`] if the handle is immutable.
    /// - [`AntError::InvalidDimension`] if `(row, column)` lies outside the window.
    pub fn at_mut(&mut self, row: usize, column: usize) -> Result<RefMut<'_, f64>> {
        self.check_index(row, column)?;
        self.make_mut()?;
        let offset = self.view.offset(row, column);
        Ok(RefMut::map(self.view.data_mut(), |d| &mut d[offset]))
    }

    pub fn set(&mut self, row: usize, column: usize, value: f64) -> Result<()> {
        *self.at_mut(row, column)? = value;
        Ok(())
    }

    fn check_index(&self, row: usize, column: usize) -> Result<()> {
        if row < self.view.rows && column < self.view.columns {
            Ok(())
        } else {
            Err(AntError::InvalidDimension {
                rows: row,
                columns: column,
            })
        }
    }

    /// The exclusive-or-clone check run before every write.
    fn make_mut(&mut self) -> Result<()> {
        if self.view.immutable {
            return Err(AntError::ProtectionViolation);
        }
        if !self.view.copy_on_write {
            return Ok(());
        }
        if Rc::strong_count(&self.view) == 1 && self.view.store_exclusive() {
            return Ok(());
        }
        trace!(
            "copy-on-write clone of {}x{} (serial {})",
            self.view.rows, self.view.columns, self.view.serial
        );
        self.view = Rc::new(self.view.detach());
        Ok(())
    }

    /// Write-in-place window: mutations are visible through every alias of the store.
    ///
    /// # Errors
    /// [`AntError::InvalidDimension`] if the window is empty or leaves the parent.
    pub fn view(&self, row: usize, column: usize, rows: usize, columns: usize) -> Result<Self> {
        self.window(row, column, rows, columns, false)
    }

    /// Copy-on-write window: shares storage until its first mutation.
    pub fn view_cow(&self, row: usize, column: usize, rows: usize, columns: usize) -> Result<Self> {
        self.window(row, column, rows, columns, true)
    }

    /// Write-in-place view of one column.
    pub fn column_view(&self, column: usize) -> Result<Self> {
        self.view(0, column, self.rows(), 1)
    }

    /// Write-in-place view of one row.
    pub fn row_view(&self, row: usize) -> Result<Self> {
        self.view(row, 0, 1, self.columns())
    }

    fn window(
        &self,
        row: usize,
        column: usize,
        rows: usize,
        columns: usize,
        copy_on_write: bool,
    ) -> Result<Self> {
        check_extent(rows, columns)?;
        if row + rows > self.view.rows || column + columns > self.view.columns {
            return Err(AntError::InvalidDimension {
                rows: row + rows,
                columns: column + columns,
            });
        }
        let mut view = self.view.window(row, column, rows, columns);
        view.copy_on_write = copy_on_write;
        Ok(Self {
            view: Rc::new(view),
        })
    }

    /// Flags the handle for a deferred transpose. No data moves.
    pub fn transpose(&self) -> Self {
        let mut view = (*self.view).clone();
        view.transposed = !view.transposed;
        Self {
            view: Rc::new(view),
        }
    }

    /// Physically transposed copy. The deferred flag is not consulted.
    pub fn transposed(&self) -> Self {
        let (rows, columns) = self.shape();
        let src = self.to_col_major();
        let mut data = vec![0.0; rows * columns];
        for c in 0..columns {
            for r in 0..rows {
                data[r * columns + c] = src[c * rows + r];
            }
        }
        Self::from_col_major(columns, rows, data)
    }

    /// Eager deep copy into fresh storage.
    pub fn deep_copy(&self) -> Self {
        let mut view = self.view.detach();
        view.transposed = false;
        Self {
            view: Rc::new(view),
        }
    }

    /// Forbids further writes through this handle.
    pub fn set_immutable(&mut self) {
        Rc::make_mut(&mut self.view).immutable = true;
    }

    pub fn set_mutable(&mut self) {
        Rc::make_mut(&mut self.view).immutable = false;
    }

    /// Future writes through this handle go straight to the shared store.
    pub fn set_write_in_place(&mut self) {
        Rc::make_mut(&mut self.view).copy_on_write = false;
    }

    pub fn set_copy_on_write(&mut self) {
        Rc::make_mut(&mut self.view).copy_on_write = true;
    }

    /// Logical window packed column-major.
    pub(crate) fn to_col_major(&self) -> Vec<f64> {
        let data = self.view.data();
        let mut out = Vec::with_capacity(self.len());
        for range in self.view.column_ranges() {
            out.extend_from_slice(&data[range]);
        }
        out
    }

    /// Logical window packed row-major.
    pub fn to_row_major(&self) -> Vec<f64> {
        let (rows, columns) = self.shape();
        let packed = self.to_col_major();
        let mut out = vec![0.0; rows * columns];
        for c in 0..columns {
            for r in 0..rows {
                out[r * columns + c] = packed[c * rows + r];
            }
        }
        out
    }

    /// One row, copied out.
    pub fn row_vec(&self, row: usize) -> Vec<f64> {
        (0..self.columns()).map(|c| self.at(row, c)).collect()
    }

    /// Visits every element of the window mutably, in storage order. The index passed to `f`
    /// is the packed column-major position `column * rows + row`.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(usize, &mut f64)) -> Result<()> {
        self.make_mut()?;
        let view = &self.view;
        let mut data = view.data_mut();
        let mut index = 0;
        for range in view.column_ranges() {
            for x in &mut data[range] {
                f(index, x);
                index += 1;
            }
        }
        Ok(())
    }

    /// Combines `other` into `self` element by element.
    pub fn zip_mut(
        &mut self,
        other: &Matrix,
        op: &'static str,
        mut f: impl FnMut(&mut f64, f64),
    ) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(AntError::mismatch(op, self.shape(), other.shape()));
        }
        // `other` may alias our store through a write-in-place view; read it out first.
        let rhs = other.to_col_major();
        self.for_each_mut(|i, x| f(x, rhs[i]))
    }

    pub fn fill(&mut self, value: f64) -> Result<()> {
        self.for_each_mut(|_, x| *x = value)
    }

    /// Overwrites this window with the contents of `other`.
    pub fn copy_from(&mut self, other: &Matrix) -> Result<()> {
        self.zip_mut(other, "copy_from", |x, y| *x = y)
    }

    pub fn add_assign_matrix(&mut self, other: &Matrix) -> Result<()> {
        self.zip_mut(other, "add_assign", |x, y| *x += y)
    }

    pub fn sub_assign_matrix(&mut self, other: &Matrix) -> Result<()> {
        self.zip_mut(other, "sub_assign", |x, y| *x -= y)
    }

    pub fn scale_in_place(&mut self, factor: f64) -> Result<()> {
        self.for_each_mut(|_, x| *x *= factor)
    }

    /// Fresh matrix with `f` applied to every element.
    pub fn map(&self, mut f: impl FnMut(f64) -> f64) -> Matrix {
        let data = self.to_col_major().into_iter().map(&mut f).collect();
        Self::from_col_major(self.rows(), self.columns(), data)
    }

    /// Fresh matrix combining two equally shaped operands.
    pub fn zip_map(
        &self,
        other: &Matrix,
        op: &'static str,
        mut f: impl FnMut(f64, f64) -> f64,
    ) -> Result<Matrix> {
        if self.shape() != other.shape() {
            return Err(AntError::mismatch(op, self.shape(), other.shape()));
        }
        let rhs = other.to_col_major();
        let data = self
            .to_col_major()
            .into_iter()
            .zip(rhs)
            .map(|(a, b)| f(a, b))
            .collect();
        Ok(Self::from_col_major(self.rows(), self.columns(), data))
    }

    pub fn try_add(&self, other: &Matrix) -> Result<Matrix> {
        self.zip_map(other, "add", |a, b| a + b)
    }

    pub fn try_sub(&self, other: &Matrix) -> Result<Matrix> {
        self.zip_map(other, "sub", |a, b| a - b)
    }

    /// Elementwise product.
    pub fn hadamard(&self, other: &Matrix) -> Result<Matrix> {
        self.zip_map(other, "hadamard", |a, b| a * b)
    }

    pub fn scale(&self, factor: f64) -> Matrix {
        self.map(|x| x * factor)
    }

    pub fn sum(&self) -> f64 {
        self.to_col_major().iter().sum()
    }

    /// `rows × 1` vector of row sums.
    pub fn row_sums(&self) -> Matrix {
        let (rows, columns) = self.shape();
        let packed = self.to_col_major();
        let mut out = vec![0.0; rows];
        for c in 0..columns {
            for (r, acc) in out.iter_mut().enumerate() {
                *acc += packed[c * rows + r];
            }
        }
        Self::from_col_major(rows, 1, out)
    }

    /// `1 × columns` vector of column sums.
    pub fn column_sums(&self) -> Matrix {
        let rows = self.rows();
        let out = self
            .to_col_major()
            .chunks(rows)
            .map(|col| col.iter().sum())
            .collect();
        Self::from_col_major(1, self.columns(), out)
    }

    pub fn frobenius(&self) -> f64 {
        self.to_col_major().iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    /// Largest absolute elementwise difference.
    pub fn max_abs_diff(&self, other: &Matrix) -> Result<f64> {
        let diff = self.zip_map(other, "max_abs_diff", |a, b| (a - b).abs())?;
        Ok(diff.to_col_major().into_iter().fold(0.0, f64::max))
    }

    /// Column of the largest element in `row`; the first maximum wins.
    pub fn argmax_row(&self, row: usize) -> usize {
        let mut best = 0;
        for c in 1..self.columns() {
            if self.at(row, c) > self.at(row, best) {
                best = c;
            }
        }
        best
    }

    pub fn has_nan(&self) -> bool {
        self.to_col_major().iter().any(|x| x.is_nan())
    }
}

/// Rejects empty extents and ones whose element count overflows `usize`.
fn check_extent(rows: usize, columns: usize) -> Result<()> {
    if rows == 0 || columns == 0 || rows.checked_mul(columns).is_none() {
        Err(AntError::InvalidDimension { rows, columns })
    } else {
        Ok(())
    }
}

impl PartialEq for Matrix {
    /// Equal logical shape and values; flags are ignored.
    fn eq(&self, other: &Self) -> bool {
        self.shape() == other.shape() && self.to_col_major() == other.to_col_major()
    }
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matrix")
            .field("shape", &self.shape())
            .field("transposed", &self.view.transposed)
            .field("copy_on_write", &self.view.copy_on_write)
            .field("immutable", &self.view.immutable)
            .field("serial", &self.view.serial)
            .field("rows", &RowsDebug(self))
            .finish()
    }
}

struct RowsDebug<'a>(&'a Matrix);

impl fmt::Debug for RowsDebug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries((0..self.0.rows()).map(|r| self.0.row_vec(r)))
            .finish()
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in 0..self.rows() {
            for c in 0..self.columns() {
                if c > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:.6}", self.at(r, c))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
