//! Shape-tagged sparse Jacobian blocks.
//!
//! Every Jacobian block of an [`crate::AutoDiffBlock`] is one of four shapes. Binary operators
//! dispatch on the pair of shapes and always return the tightest shape that represents the
//! result exactly:
//!
//! | +   | Z | I | D | S |      | ×   | Z | I | D | S |
//! |-----|---|---|---|---|      |-----|---|---|---|---|
//! | Z   | Z | I | D | S |      | Z   | Z | Z | Z | Z |
//! | I   | I | D | D | S |      | I   | Z | I | D | S |
//! | D   | D | D | D | S |      | D   | Z | D | D | S |
//! | S   | S | S | S | S |      | S   | Z | S | S | S |
//!
//! Diagonals are never promoted and sparse matrices are never demoted, even when their values
//! would allow it.

use std::ops::{Add, Mul, Neg, Sub};

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{coo::CooMatrix, csr::CsrMatrix};

use crate::Error;

/// The structural tag of an [`AdMatrix`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Zero,
    Identity,
    Diagonal,
    Sparse,
}

/// A rectangular Jacobian block tagged with its structure.
#[derive(Clone, Debug, PartialEq)]
pub enum AdMatrix {
    /// All-zero block, only the dimensions are stored.
    Zero { rows: usize, cols: usize },
    /// Square identity of the given side length.
    Identity(usize),
    /// Square diagonal matrix.
    Diagonal(DVector<f64>),
    /// General sparse matrix.
    Sparse(CsrMatrix<f64>),
}

impl AdMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        AdMatrix::Zero { rows, cols }
    }

    pub fn identity(n: usize) -> Self {
        AdMatrix::Identity(n)
    }

    pub fn from_diagonal(d: DVector<f64>) -> Self {
        AdMatrix::Diagonal(d)
    }

    pub fn from_csr(m: CsrMatrix<f64>) -> Self {
        AdMatrix::Sparse(m)
    }

    /// Builds a sparse block from `(row, col, value)` triplets. Duplicate entries are summed.
    pub fn from_triplets(rows: usize, cols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let mut coo = CooMatrix::new(rows, cols);
        for &(i, j, v) in triplets {
            coo.push(i, j, v);
        }
        AdMatrix::Sparse(CsrMatrix::from(&coo))
    }

    pub fn shape(&self) -> Shape {
        match self {
            AdMatrix::Zero { .. } => Shape::Zero,
            AdMatrix::Identity(_) => Shape::Identity,
            AdMatrix::Diagonal(_) => Shape::Diagonal,
            AdMatrix::Sparse(_) => Shape::Sparse,
        }
    }

    pub fn nrows(&self) -> usize {
        match self {
            AdMatrix::Zero { rows, .. } => *rows,
            AdMatrix::Identity(n) => *n,
            AdMatrix::Diagonal(d) => d.len(),
            AdMatrix::Sparse(s) => s.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            AdMatrix::Zero { cols, .. } => *cols,
            AdMatrix::Identity(n) => *n,
            AdMatrix::Diagonal(d) => d.len(),
            AdMatrix::Sparse(s) => s.ncols(),
        }
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    /// Number of structurally stored entries.
    pub fn nnz(&self) -> usize {
        match self {
            AdMatrix::Zero { .. } => 0,
            AdMatrix::Identity(n) => *n,
            AdMatrix::Diagonal(d) => d.len(),
            AdMatrix::Sparse(s) => s.nnz(),
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, AdMatrix::Zero { .. })
    }

    pub fn try_add(&self, rhs: &AdMatrix) -> Result<AdMatrix, Error> {
        if self.dims() != rhs.dims() {
            return Err(Error::shape("add", self.dims(), rhs.dims()));
        }
        use AdMatrix::*;
        Ok(match (self, rhs) {
            (Zero { .. }, _) => rhs.clone(),
            (_, Zero { .. }) => self.clone(),
            (Identity(n), Identity(_)) => Diagonal(DVector::from_element(*n, 2.0)),
            (Identity(_), Diagonal(d)) | (Diagonal(d), Identity(_)) => Diagonal(d.add_scalar(1.0)),
            (Diagonal(a), Diagonal(b)) => Diagonal(a + b),
            (Sparse(a), Sparse(b)) => Sparse(a + b),
            (Sparse(s), other) | (other, Sparse(s)) => Sparse(s + &other.to_csr()),
        })
    }

    pub fn try_sub(&self, rhs: &AdMatrix) -> Result<AdMatrix, Error> {
        if self.dims() != rhs.dims() {
            return Err(Error::shape("sub", self.dims(), rhs.dims()));
        }
        if rhs.is_zero() {
            return Ok(self.clone());
        }
        self.try_add(&rhs.scale(-1.0))
    }

    pub fn try_mul(&self, rhs: &AdMatrix) -> Result<AdMatrix, Error> {
        if self.ncols() != rhs.nrows() {
            return Err(Error::shape("mul", self.dims(), rhs.dims()));
        }
        use AdMatrix::*;
        Ok(match (self, rhs) {
            (Zero { .. }, _) | (_, Zero { .. }) => Zero {
                rows: self.nrows(),
                cols: rhs.ncols(),
            },
            (Identity(_), _) => rhs.clone(),
            (_, Identity(_)) => self.clone(),
            (Diagonal(a), Diagonal(b)) => Diagonal(a.component_mul(b)),
            (Diagonal(d), Sparse(s)) => Sparse(scale_rows(s, d)),
            (Sparse(s), Diagonal(d)) => Sparse(scale_cols(s, d)),
            (Sparse(a), Sparse(b)) => Sparse(a * b),
        })
    }

    /// Multiplies every entry by `alpha`.
    pub fn scale(&self, alpha: f64) -> AdMatrix {
        match self {
            AdMatrix::Zero { .. } => self.clone(),
            AdMatrix::Identity(_) if alpha == 1.0 => self.clone(),
            AdMatrix::Identity(n) => AdMatrix::Diagonal(DVector::from_element(*n, alpha)),
            AdMatrix::Diagonal(d) => AdMatrix::Diagonal(d * alpha),
            AdMatrix::Sparse(s) => {
                let mut s = s.clone();
                s.values_mut().iter_mut().for_each(|v| *v *= alpha);
                AdMatrix::Sparse(s)
            }
        }
    }

    /// Computes `diag(d) * self`.
    pub fn scale_rows(&self, d: &DVector<f64>) -> Result<AdMatrix, Error> {
        AdMatrix::Diagonal(d.clone()).try_mul(self)
    }

    pub fn mul_vec(&self, x: &DVector<f64>) -> Result<DVector<f64>, Error> {
        if self.ncols() != x.len() {
            return Err(Error::shape("mul_vec", self.dims(), (x.len(), 1)));
        }
        Ok(match self {
            AdMatrix::Zero { rows, .. } => DVector::zeros(*rows),
            AdMatrix::Identity(_) => x.clone(),
            AdMatrix::Diagonal(d) => d.component_mul(x),
            AdMatrix::Sparse(s) => s * x,
        })
    }

    /// Element access. Entries outside the stored structure read as zero.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        assert!(
            i < self.nrows() && j < self.ncols(),
            "index ({i}, {j}) out of range for {:?}",
            self.dims()
        );
        match self {
            AdMatrix::Zero { .. } => 0.0,
            AdMatrix::Identity(_) => {
                if i == j {
                    1.0
                } else {
                    0.0
                }
            }
            AdMatrix::Diagonal(d) => {
                if i == j {
                    d[i]
                } else {
                    0.0
                }
            }
            AdMatrix::Sparse(s) => {
                let (offsets, cols, vals) = s.csr_data();
                let row = &cols[offsets[i]..offsets[i + 1]];
                match row.binary_search(&j) {
                    Ok(k) => vals[offsets[i] + k],
                    Err(_) => 0.0,
                }
            }
        }
    }

    /// Explicit sparse representation.
    pub fn to_csr(&self) -> CsrMatrix<f64> {
        match self {
            AdMatrix::Zero { rows, cols } => CsrMatrix::zeros(*rows, *cols),
            AdMatrix::Identity(n) => CsrMatrix::identity(*n),
            AdMatrix::Diagonal(d) => diagonal_csr(d),
            AdMatrix::Sparse(s) => s.clone(),
        }
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        match self {
            AdMatrix::Zero { rows, cols } => DMatrix::zeros(*rows, *cols),
            AdMatrix::Identity(n) => DMatrix::identity(*n, *n),
            AdMatrix::Diagonal(d) => DMatrix::from_diagonal(d),
            AdMatrix::Sparse(s) => DMatrix::from(s),
        }
    }

    pub fn transpose(&self) -> AdMatrix {
        match self {
            AdMatrix::Zero { rows, cols } => AdMatrix::Zero {
                rows: *cols,
                cols: *rows,
            },
            AdMatrix::Sparse(s) => AdMatrix::Sparse(s.transpose()),
            _ => self.clone(),
        }
    }

    /// Stacks blocks sharing a column count on top of each other.
    pub fn vstack(blocks: &[&AdMatrix]) -> Result<AdMatrix, Error> {
        let cols = blocks.first().map_or(0, |b| b.ncols());
        if let Some(b) = blocks.iter().find(|b| b.ncols() != cols) {
            return Err(Error::shape("vstack", (0, cols), b.dims()));
        }
        let rows: usize = blocks.iter().map(|b| b.nrows()).sum();
        if blocks.iter().all(|b| b.is_zero()) {
            return Ok(AdMatrix::Zero { rows, cols });
        }
        let mut offsets = Vec::with_capacity(rows + 1);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        offsets.push(0);
        for block in blocks {
            let csr = block.to_csr();
            let (o, c, v) = csr.csr_data();
            for i in 0..csr.nrows() {
                indices.extend_from_slice(&c[o[i]..o[i + 1]]);
                values.extend_from_slice(&v[o[i]..o[i + 1]]);
                offsets.push(indices.len());
            }
        }
        CsrMatrix::try_from_csr_data(rows, cols, offsets, indices, values)
            .map(AdMatrix::Sparse)
            .map_err(Error::from)
    }

    /// Places blocks sharing a row count side by side.
    pub fn hstack(blocks: &[&AdMatrix]) -> Result<CsrMatrix<f64>, Error> {
        let rows = blocks.first().map_or(0, |b| b.nrows());
        if let Some(b) = blocks.iter().find(|b| b.nrows() != rows) {
            return Err(Error::shape("hstack", (rows, 0), b.dims()));
        }
        let cols: usize = blocks.iter().map(|b| b.ncols()).sum();
        let csrs: Vec<CsrMatrix<f64>> = blocks.iter().map(|b| b.to_csr()).collect();
        let nnz = csrs.iter().map(|c| c.nnz()).sum();

        let mut offsets = Vec::with_capacity(rows + 1);
        let mut indices = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        offsets.push(0);
        for i in 0..rows {
            let mut col_offset = 0;
            for csr in &csrs {
                let (o, c, v) = csr.csr_data();
                indices.extend(c[o[i]..o[i + 1]].iter().map(|&j| j + col_offset));
                values.extend_from_slice(&v[o[i]..o[i + 1]]);
                col_offset += csr.ncols();
            }
            offsets.push(indices.len());
        }
        CsrMatrix::try_from_csr_data(rows, cols, offsets, indices, values).map_err(Error::from)
    }
}

/// Sparse matrix holding `d` on its diagonal. Explicit zeros are kept in the structure.
pub fn diagonal_csr(d: &DVector<f64>) -> CsrMatrix<f64> {
    let n = d.len();
    CsrMatrix::try_from_csr_data(
        n,
        n,
        (0..=n).collect(),
        (0..n).collect(),
        d.as_slice().to_vec(),
    )
    .unwrap_or_else(|_| unreachable!("diagonal pattern is always valid"))
}

fn scale_rows(s: &CsrMatrix<f64>, d: &DVector<f64>) -> CsrMatrix<f64> {
    let mut s = s.clone();
    let (offsets, _, values) = s.csr_data_mut();
    for i in 0..offsets.len() - 1 {
        values[offsets[i]..offsets[i + 1]]
            .iter_mut()
            .for_each(|v| *v *= d[i]);
    }
    s
}

fn scale_cols(s: &CsrMatrix<f64>, d: &DVector<f64>) -> CsrMatrix<f64> {
    let mut s = s.clone();
    let (_, cols, values) = s.csr_data_mut();
    for (v, &j) in values.iter_mut().zip(cols.iter()) {
        *v *= d[j];
    }
    s
}

impl<'a> Add<&'a AdMatrix> for &'a AdMatrix {
    type Output = AdMatrix;

    fn add(self, rhs: &'a AdMatrix) -> AdMatrix {
        self.try_add(rhs).unwrap_or_else(|e| panic!("{e}"))
    }
}

impl<'a> Sub<&'a AdMatrix> for &'a AdMatrix {
    type Output = AdMatrix;

    fn sub(self, rhs: &'a AdMatrix) -> AdMatrix {
        self.try_sub(rhs).unwrap_or_else(|e| panic!("{e}"))
    }
}

impl<'a> Mul<&'a AdMatrix> for &'a AdMatrix {
    type Output = AdMatrix;

    fn mul(self, rhs: &'a AdMatrix) -> AdMatrix {
        self.try_mul(rhs).unwrap_or_else(|e| panic!("{e}"))
    }
}

impl Mul<f64> for &AdMatrix {
    type Output = AdMatrix;

    fn mul(self, rhs: f64) -> AdMatrix {
        self.scale(rhs)
    }
}

impl Neg for &AdMatrix {
    type Output = AdMatrix;

    fn neg(self) -> AdMatrix {
        self.scale(-1.0)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn samples() -> Vec<AdMatrix> {
        vec![
            AdMatrix::zeros(3, 3),
            AdMatrix::identity(3),
            AdMatrix::from_diagonal(DVector::from_vec(vec![1.5, -2.0, 0.25])),
            AdMatrix::from_triplets(
                3,
                3,
                &[(0, 0, 2.0), (0, 2, -1.0), (1, 1, 3.0), (2, 0, 0.5), (2, 1, 4.0)],
            ),
        ]
    }

    fn expected_add(a: Shape, b: Shape) -> Shape {
        use Shape::*;
        match (a, b) {
            (Zero, x) | (x, Zero) => x,
            (Sparse, _) | (_, Sparse) => Sparse,
            _ => Diagonal,
        }
    }

    fn expected_mul(a: Shape, b: Shape) -> Shape {
        use Shape::*;
        match (a, b) {
            (Zero, _) | (_, Zero) => Zero,
            (Identity, x) | (x, Identity) => x,
            (Sparse, _) | (_, Sparse) => Sparse,
            _ => Diagonal,
        }
    }

    #[test]
    fn test_add_dispatch_table() {
        for a in samples() {
            for b in samples() {
                let c = &a + &b;
                assert_eq!(c.shape(), expected_add(a.shape(), b.shape()));
                assert_abs_diff_eq!(c.to_dense(), a.to_dense() + b.to_dense(), epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn test_mul_dispatch_table() {
        for a in samples() {
            for b in samples() {
                let c = &a * &b;
                assert_eq!(c.shape(), expected_mul(a.shape(), b.shape()));
                assert_abs_diff_eq!(c.to_dense(), a.to_dense() * b.to_dense(), epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn test_identity_plus_identity_is_diagonal_two() {
        let c = &AdMatrix::identity(2) + &AdMatrix::identity(2);
        assert_eq!(c, AdMatrix::from_diagonal(DVector::from_element(2, 2.0)));
    }

    #[test]
    fn test_diagonal_with_zero_stays_diagonal() {
        let d = AdMatrix::from_diagonal(DVector::from_vec(vec![0.0, 1.0]));
        let c = &d * &d;
        assert_eq!(c.shape(), Shape::Diagonal);
    }

    #[test]
    fn test_shape_error() {
        let a = AdMatrix::zeros(2, 3);
        let b = AdMatrix::identity(2);
        assert!(matches!(a.try_add(&b), Err(Error::ShapeMismatch { .. })));
        assert!(matches!(b.try_mul(&a.transpose()), Err(Error::ShapeMismatch { .. })));
        assert!(a.try_mul(&AdMatrix::identity(3)).is_ok());
    }

    #[test]
    fn test_get_and_mul_vec() {
        let s = &samples()[3];
        assert_eq!(s.get(2, 1), 4.0);
        assert_eq!(s.get(1, 0), 0.0);
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let y = s.mul_vec(&x).unwrap();
        assert_abs_diff_eq!(y, s.to_dense() * x, epsilon = 1e-14);
    }

    #[test]
    fn test_hstack_and_vstack() {
        let s = samples();
        let h = AdMatrix::hstack(&[&s[1], &s[3]]).unwrap();
        assert_eq!((h.nrows(), h.ncols()), (3, 6));
        let dense = AdMatrix::Sparse(h).to_dense();
        assert_eq!(dense[(1, 1)], 1.0);
        assert_eq!(dense[(2, 4)], 4.0);

        let v = AdMatrix::vstack(&[&s[2], &s[0]]).unwrap();
        assert_eq!(v.dims(), (6, 3));
        assert_eq!(v.get(1, 1), -2.0);
        assert_eq!(v.get(4, 1), 0.0);
    }
}
