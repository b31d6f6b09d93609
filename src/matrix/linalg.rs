//! Dense solvers: Householder QR and Cholesky with triangular substitution.
//!
//! Right-hand sides may carry several columns; each column is solved independently.

use log::warn;

use super::Matrix;
use crate::error::{AntError, Result};

/// `H = I - beta·v·vᵗ`, acting on rows `k..` only.
struct Reflector {
    k: usize,
    v: Vec<f64>,
    beta: f64,
}

impl Reflector {
    /// Reflector that zeroes `column[k+1..]`. `None` when that part of the column is already
    /// zero, including the leading element.
    fn annihilating(column: &[f64], k: usize) -> Option<Self> {
        let mut v = column[k..].to_vec();
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm == 0.0 {
            return None;
        }
        // add to the leading element rather than cancel it
        if v[0] >= 0.0 {
            v[0] += norm;
        } else {
            v[0] -= norm;
        }
        let vv: f64 = v.iter().map(|x| x * x).sum();
        Some(Self {
            k,
            v,
            beta: 2.0 / vv,
        })
    }

    fn apply(&self, column: &mut [f64]) {
        let tail = &mut column[self.k..];
        let s = self.beta * tail.iter().zip(&self.v).map(|(a, b)| a * b).sum::<f64>();
        for (x, v) in tail.iter_mut().zip(&self.v) {
            *x -= s * v;
        }
    }
}

/// Runs the reflections over packed `a` (`rows × columns`) and every column of `rhs`.
fn triangularize(
    a: &mut [f64],
    rows: usize,
    columns: usize,
    rhs: &mut [&mut [f64]],
) -> Vec<Reflector> {
    let mut runs = columns - 1;
    if rows > columns {
        runs += 1;
    }
    let mut reflectors = Vec::with_capacity(runs);
    for k in 0..runs {
        let Some(h) = Reflector::annihilating(&a[k * rows..(k + 1) * rows], k) else {
            continue;
        };
        for column in a.chunks_mut(rows).skip(k) {
            h.apply(column);
        }
        for column in rhs.iter_mut() {
            h.apply(column);
        }
        // the annihilated entries are exactly zero in exact arithmetic
        for x in &mut a[k * rows + k + 1..(k + 1) * rows] {
            *x = 0.0;
        }
        reflectors.push(h);
    }
    reflectors
}

impl Matrix {
    /// Least-squares solution of `A·x = b` through Householder reflections.
    ///
    /// `A` is left untouched; the reflections run on a packed copy.
    ///
    /// # Errors
    /// - [`AntError::UnderdeterminedSystem`] if `rows < columns`.
    /// - [`AntError::DimensionMismatch`] if `b` does not have `rows` rows.
    pub fn solve_qr(&self, b: &Matrix) -> Result<Matrix> {
        let (rows, columns) = self.shape();
        if rows < columns {
            return Err(AntError::UnderdeterminedSystem { rows, columns });
        }
        if b.rows() != rows {
            return Err(AntError::mismatch("solve_qr", self.shape(), b.shape()));
        }
        let mut r = self.to_col_major();
        let mut rhs = b.to_col_major();
        {
            let mut columns_of_b: Vec<&mut [f64]> = rhs.chunks_mut(rows).collect();
            triangularize(&mut r, rows, columns, &mut columns_of_b);
        }
        let r = Matrix::from_col_major(rows, columns, r);
        let top = Matrix::from_col_major(rows, b.columns(), rhs).view(0, 0, columns, b.columns())?;
        r.view(0, 0, columns, columns)?.solve_upper(&top)
    }

    /// Householder QR decomposition, `A = Q·R`, with `Q` orthogonal (`rows × rows`) and `R`
    /// upper-triangular (`rows × columns`). The diagonal of `R` is made non-negative.
    ///
    /// # Errors
    /// [`AntError::UnderdeterminedSystem`] if `rows < columns`.
    pub fn qr(&self) -> Result<(Matrix, Matrix)> {
        let (rows, columns) = self.shape();
        if rows < columns {
            return Err(AntError::UnderdeterminedSystem { rows, columns });
        }
        let mut r = self.to_col_major();
        let reflectors = triangularize(&mut r, rows, columns, &mut []);

        // Qᵗ = H_last ⋯ H_0, built column by column from the identity
        let mut qt = vec![0.0; rows * rows];
        for (j, column) in qt.chunks_mut(rows).enumerate() {
            column[j] = 1.0;
            for h in &reflectors {
                h.apply(column);
            }
        }
        let mut q = Matrix::from_col_major(rows, rows, qt).transposed();
        let mut r = Matrix::from_col_major(rows, columns, r);

        for i in 0..columns.min(rows) {
            if r.at(i, i) < 0.0 {
                for c in i..columns {
                    let x = r.at(i, c);
                    r.set(i, c, -x)?;
                }
                for row in 0..rows {
                    let x = q.at(row, i);
                    q.set(row, i, -x)?;
                }
            }
        }
        Ok((q, r))
    }

    /// Lower-triangular `G` with `G·Gᵗ = A`, using only the lower triangle of `A`.
    ///
    /// # Errors
    /// - [`AntError::NotPositiveDefinite`] if a diagonal residual is negative or NaN. This is the
    ///   normal way to find out that a matrix is not positive definite.
    /// - [`AntError::DimensionMismatch`] if `A` is not square.
    pub fn cholesky(&self) -> Result<Matrix> {
        let n = self.rows();
        if self.columns() != n {
            return Err(AntError::mismatch("cholesky", self.shape(), self.shape()));
        }
        let mut g = Matrix::new(n, n)?;
        for i in 0..n {
            for j in 0..=i {
                let partial: f64 = (0..j).map(|k| g.at(i, k) * g.at(j, k)).sum();
                let residual = self.at(i, j) - partial;
                if i == j {
                    if residual < 0.0 || residual.is_nan() {
                        warn!("cholesky: residual {residual} at pivot {i}");
                        return Err(AntError::NotPositiveDefinite { pivot: i });
                    }
                    g.set(i, i, residual.sqrt())?;
                } else {
                    g.set(i, j, residual / g.at(j, j))?;
                }
            }
        }
        Ok(g)
    }

    /// Forward substitution, treating `self` as lower-triangular.
    pub fn solve_lower(&self, b: &Matrix) -> Result<Matrix> {
        let n = self.check_triangular_system(b, "solve_lower")?;
        let mut x = Matrix::new(n, b.columns())?;
        for col in 0..b.columns() {
            for i in 0..n {
                let partial: f64 = (0..i).map(|k| self.at(i, k) * x.at(k, col)).sum();
                x.set(i, col, (b.at(i, col) - partial) / self.at(i, i))?;
            }
        }
        Ok(x)
    }

    /// Back substitution, treating `self` as upper-triangular.
    pub fn solve_upper(&self, b: &Matrix) -> Result<Matrix> {
        let n = self.check_triangular_system(b, "solve_upper")?;
        let mut x = Matrix::new(n, b.columns())?;
        for col in 0..b.columns() {
            for i in (0..n).rev() {
                let partial: f64 = (i + 1..n).map(|k| self.at(i, k) * x.at(k, col)).sum();
                x.set(i, col, (b.at(i, col) - partial) / self.at(i, i))?;
            }
        }
        Ok(x)
    }

    /// Solves `A·x = b` for symmetric positive-definite `A` via Cholesky.
    pub fn solve_symmetric(&self, b: &Matrix) -> Result<Matrix> {
        let g = self.cholesky()?;
        let y = g.solve_lower(b)?;
        g.transposed().solve_upper(&y)
    }

    fn check_triangular_system(&self, b: &Matrix, op: &'static str) -> Result<usize> {
        let n = self.rows();
        if self.columns() != n || b.rows() != n {
            return Err(AntError::mismatch(op, self.shape(), b.shape()));
        }
        Ok(n)
    }
}
