//! Dense LU factorization with partial pivoting, ported from the SUNDIALS suite.
//!
//! Used for the well block of the Schur reduction and for the coarsest AMG level, both of which
//! are small.
use nalgebra::{DMatrix, DVector, Dim, Matrix, RealField, Storage, StorageMut, U1};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::Error;

/// An LU-factored square matrix.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct Dense {
    /// `L` (strictly lower part, unit diagonal implied) and `U` stored in place.
    lu: DMatrix<f64>,
    pivots: Vec<usize>,
}

impl Dense {
    /// Factors `mat_a`, consuming it.
    pub fn factor(mut mat_a: DMatrix<f64>) -> Result<Self, Error> {
        if mat_a.nrows() != mat_a.ncols() {
            return Err(Error::DimensionMismatch {
                expected: mat_a.nrows(),
                found: mat_a.ncols(),
            });
        }
        let mut pivots = vec![0; mat_a.ncols()];
        dense_get_rf(&mut mat_a, &mut pivots).map_err(|col| Error::LUFactFail { col })?;
        Ok(Dense { lu: mat_a, pivots })
    }

    pub fn dim(&self) -> usize {
        self.pivots.len()
    }

    /// Overwrites `b` with `A⁻¹ b`.
    pub fn solve_in_place<S>(&self, b: &mut Matrix<f64, nalgebra::Dyn, U1, S>)
    where
        S: StorageMut<f64, nalgebra::Dyn, U1>,
    {
        if self.dim() > 0 {
            dense_get_rs(&self.lu, &self.pivots, b);
        }
    }

    pub fn solve(&self, b: &DVector<f64>) -> DVector<f64> {
        let mut x = b.clone();
        self.solve_in_place(&mut x);
        x
    }

    /// Overwrites every column of `b` with `A⁻¹ b_j`.
    pub fn solve_columns(&self, b: &mut DMatrix<f64>) {
        for j in 0..b.ncols() {
            let mut col = b.column(j).clone_owned();
            self.solve_in_place(&mut col);
            b.set_column(j, &col);
        }
    }

    pub fn inverse(&self) -> DMatrix<f64> {
        let mut inv = DMatrix::identity(self.dim(), self.dim());
        self.solve_columns(&mut inv);
        inv
    }
}

/// Performs the LU factorization of the M by N dense matrix A.
///
/// This is done using standard Gaussian elimination with partial (row) pivoting. Note that this
/// applies only to matrices with M >= N and full column rank.
///
/// A successful LU factorization leaves the matrix A and the pivot array p with the following
/// information:
///
/// 1. p[k] contains the row number of the pivot element chosen at the beginning of elimination
///     step k, k=0, 1, ..., N-1.
///
/// 2. If the unique LU factorization of A is given by PA = LU, where P is a permutation matrix,
///     L is a lower trapezoidal matrix with all 1's on the diagonal, and U is an upper triangular
///     matrix, then the upper triangular part of A (including its diagonal) contains U and the
///     strictly lower trapezoidal part of A contains the multipliers, I-L.
///
/// Returns the column index (numbered from one) of the first zero pivot on failure.
fn dense_get_rf<T, R, C, S>(mat_a: &mut Matrix<T, R, C, S>, pivot: &mut [usize]) -> Result<(), usize>
where
    T: RealField + Copy,
    R: Dim,
    C: Dim,
    S: StorageMut<T, R, C>,
{
    let m = mat_a.nrows();
    let n = mat_a.ncols();
    assert!(m >= n, "Number of rows must be >= number of columns");
    assert_eq!(pivot.len(), n);

    // k-th elimination step number
    for k in 0..n {
        // find l = pivot row number
        let mut l = k;
        for i in (k + 1)..m {
            if mat_a[(i, k)].abs() > mat_a[(l, k)].abs() {
                l = i;
            }
        }
        pivot[k] = l;

        if mat_a[(l, k)] == T::zero() {
            return Err(k + 1);
        }

        if l != k {
            mat_a.swap_rows(k, l);
        }

        // Store the multipliers a(i,k)/a(k,k) below the diagonal.
        let mult = mat_a[(k, k)].recip();
        for i in (k + 1)..m {
            mat_a[(i, k)] *= mult;
        }

        // row_i = row_i - [a(i,k)/a(k,k)] row_k, one column at a time
        for j in (k + 1)..n {
            let a_kj = mat_a[(k, j)];
            if a_kj != T::zero() {
                for i in (k + 1)..m {
                    let a_ik = mat_a[(i, k)];
                    mat_a[(i, j)] -= a_kj * a_ik;
                }
            }
        }
    }

    Ok(())
}

/// Solves A x = b using the factors and pivots from `dense_get_rf`. The solution overwrites b.
fn dense_get_rs<T, R, C, SA, SC>(mat_a: &Matrix<T, R, C, SA>, pivot: &[usize], b: &mut Matrix<T, C, U1, SC>)
where
    T: RealField + Copy,
    R: Dim,
    C: Dim,
    SA: Storage<T, R, C>,
    SC: StorageMut<T, C>,
{
    let n = mat_a.ncols();

    for (k, &pk) in pivot.iter().enumerate().take(n) {
        if pk != k {
            b.swap((k, 0), (pk, 0));
        }
    }

    // Solve Ly = b
    for k in 0..n.saturating_sub(1) {
        let bk = b[k];
        for i in (k + 1)..n {
            b[i] -= mat_a[(i, k)] * bk;
        }
    }

    // Solve Ux = y
    for k in (0..n).rev() {
        b[k] /= mat_a[(k, k)];
        let bk = b[k];
        for i in 0..k {
            b[i] -= mat_a[(i, k)] * bk;
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::dmatrix;

    use super::*;

    #[test]
    fn test_dense_solve_requires_pivoting() {
        let mat_a = dmatrix![
            0.0, 2.0, 1.0;
            1.0, 1.0, 0.0;
            3.0, 0.0, 1.0;
        ];
        let x_exp = DVector::from_vec(vec![1.0, -2.0, 0.5]);
        let b = &mat_a * &x_exp;
        let lu = Dense::factor(mat_a).unwrap();
        assert_relative_eq!(lu.solve(&b), x_exp, max_relative = 1e-12);
    }

    #[test]
    fn test_dense1() {
        let mat_a = dmatrix![
            5.0, 0.0, 0.0, 1.0;
            2.0, 2.0, 2.0, 1.0;
            4.0, 5.0, 5.0, 5.0;
            1.0, 6.0, 4.0, 5.0;
        ];
        let b = DVector::from_vec(vec![9.0, 16.0, 49.0, 45.0]);
        let expected = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let lu = Dense::factor(mat_a).unwrap();
        assert_relative_eq!(lu.solve(&b), expected, max_relative = 1e-9);
    }

    #[test]
    fn test_inverse() {
        let mat_a = dmatrix![
            4.0, 1.0;
            2.0, 3.0;
        ];
        let inv = Dense::factor(mat_a.clone()).unwrap().inverse();
        assert_relative_eq!(&mat_a * inv, DMatrix::identity(2, 2), epsilon = 1e-14);
    }

    #[test]
    fn test_singular() {
        let mat_a = dmatrix![
            1.0, 2.0;
            2.0, 4.0;
        ];
        assert!(matches!(Dense::factor(mat_a), Err(Error::LUFactFail { col: 2 })));
    }

    #[test]
    fn test_empty() {
        let lu = Dense::factor(DMatrix::zeros(0, 0)).unwrap();
        assert_eq!(lu.solve(&DVector::zeros(0)).len(), 0);
    }
}
