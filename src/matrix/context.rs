use std::cell::Cell;

use super::Matrix;
use crate::error::Result;

/// Hands out serial numbers to the matrices it constructs.
///
/// Serial numbers only help when tracing aliasing in logs; the engine never depends on them.
/// Matrices built without a context carry serial `0`.
#[derive(Debug, Default)]
pub struct MatrixContext {
    next: Cell<u64>,
}

impl MatrixContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn stamp(&self, mut m: Matrix) -> Matrix {
        let serial = self.next.get() + 1;
        self.next.set(serial);
        m.set_serial(serial);
        m
    }

    /// Number of matrices issued so far.
    pub fn issued(&self) -> u64 {
        self.next.get()
    }

    pub fn zeros(&self, rows: usize, columns: usize) -> Result<Matrix> {
        Matrix::new(rows, columns).map(|m| self.stamp(m))
    }

    pub fn filled(&self, rows: usize, columns: usize, value: f64) -> Result<Matrix> {
        Matrix::filled(rows, columns, value).map(|m| self.stamp(m))
    }

    pub fn from_rows(&self, rows: usize, columns: usize, values: &[f64]) -> Result<Matrix> {
        Matrix::from_rows(rows, columns, values).map(|m| self.stamp(m))
    }

    /// Write-in-place window over `parent`, stamped with a fresh serial.
    pub fn view(
        &self,
        parent: &Matrix,
        row: usize,
        column: usize,
        rows: usize,
        columns: usize,
    ) -> Result<Matrix> {
        parent.view(row, column, rows, columns).map(|m| self.stamp(m))
    }
}
