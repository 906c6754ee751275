use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{coo::CooMatrix, csr::CsrMatrix};
use rayon::prelude::*;

use crate::{Error, LinearOperator};

/// A square sparse matrix of dense `bs × bs` blocks.
///
/// Column indices are sorted within each block row and every block row stores its diagonal
/// block, possibly as explicit zeros.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockCsrMatrix {
    n: usize,
    bs: usize,
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
    blocks: Vec<DMatrix<f64>>,
}

impl BlockCsrMatrix {
    /// Assembles from `(block_row, block_col, i, j, value)` entries. Duplicates are summed.
    pub fn from_entries<I>(n: usize, bs: usize, entries: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (usize, usize, usize, usize, f64)>,
    {
        let mut rows: Vec<BTreeMap<usize, DMatrix<f64>>> = vec![BTreeMap::new(); n];
        for (r, row) in rows.iter_mut().enumerate() {
            row.insert(r, DMatrix::zeros(bs, bs));
        }
        for (br, bc, i, j, v) in entries {
            if br >= n || bc >= n {
                return Err(Error::DimensionMismatch {
                    expected: n,
                    found: br.max(bc),
                });
            }
            if i >= bs || j >= bs {
                return Err(Error::DimensionMismatch {
                    expected: bs,
                    found: i.max(j),
                });
            }
            rows[br]
                .entry(bc)
                .or_insert_with(|| DMatrix::zeros(bs, bs))[(i, j)] += v;
        }

        let mut row_offsets = Vec::with_capacity(n + 1);
        let mut col_indices = Vec::new();
        let mut blocks = Vec::new();
        row_offsets.push(0);
        for row in rows {
            for (c, b) in row {
                col_indices.push(c);
                blocks.push(b);
            }
            row_offsets.push(col_indices.len());
        }
        Ok(BlockCsrMatrix {
            n,
            bs,
            row_offsets,
            col_indices,
            blocks,
        })
    }

    /// Interleaves a matrix whose rows and columns are ordered variable-major (`e * n + c`) into
    /// cell-major blocks, so that block `(c, c')` holds entry `(e, v)` from row `e * n + c` and
    /// column `v * n + c'`.
    pub fn from_variable_major(a: &CsrMatrix<f64>, n: usize, bs: usize) -> Result<Self, Error> {
        if a.nrows() != n * bs || a.ncols() != n * bs {
            return Err(Error::DimensionMismatch {
                expected: n * bs,
                found: a.nrows().max(a.ncols()),
            });
        }
        Self::from_entries(
            n,
            bs,
            a.triplet_iter()
                .map(|(r, c, &v)| (r % n, c % n, r / n, c / n, v)),
        )
    }

    pub fn num_block_rows(&self) -> usize {
        self.n
    }

    pub fn block_size(&self) -> usize {
        self.bs
    }

    pub fn nnz_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn row_range(&self, i: usize) -> std::ops::Range<usize> {
        self.row_offsets[i]..self.row_offsets[i + 1]
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn blocks(&self) -> &[DMatrix<f64>] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [DMatrix<f64>] {
        &mut self.blocks
    }

    /// Storage position of block `(i, j)`.
    pub fn position(&self, i: usize, j: usize) -> Option<usize> {
        let range = self.row_range(i);
        let start = range.start;
        self.col_indices[range]
            .binary_search(&j)
            .ok()
            .map(|k| start + k)
    }

    pub fn diagonal_position(&self, i: usize) -> usize {
        // diagonal blocks are always stored
        self.position(i, i).unwrap_or_else(|| unreachable!("missing diagonal block {i}"))
    }

    pub fn block(&self, i: usize, j: usize) -> Option<&DMatrix<f64>> {
        self.position(i, j).map(|k| &self.blocks[k])
    }

    /// The scalar matrix formed by entry `(ei, vj)` of every block.
    pub fn component_matrix(&self, ei: usize, vj: usize) -> CsrMatrix<f64> {
        let mut coo = CooMatrix::new(self.n, self.n);
        for i in 0..self.n {
            for k in self.row_range(i) {
                coo.push(i, self.col_indices[k], self.blocks[k][(ei, vj)]);
            }
        }
        CsrMatrix::from(&coo)
    }

    /// The scalar matrix in cell-major ordering.
    pub fn to_csr(&self) -> CsrMatrix<f64> {
        let bs = self.bs;
        let mut coo = CooMatrix::new(self.n * bs, self.n * bs);
        for i in 0..self.n {
            for k in self.row_range(i) {
                let j = self.col_indices[k];
                for r in 0..bs {
                    for c in 0..bs {
                        coo.push(i * bs + r, j * bs + c, self.blocks[k][(r, c)]);
                    }
                }
            }
        }
        CsrMatrix::from(&coo)
    }

    pub fn mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut y = DVector::zeros(self.n * self.bs);
        self.apply(x, &mut y);
        y
    }

    /// `b - A x`
    pub fn residual(&self, b: &DVector<f64>, x: &DVector<f64>) -> DVector<f64> {
        b - self.mul_vec(x)
    }
}

impl LinearOperator for BlockCsrMatrix {
    fn nrows(&self) -> usize {
        self.n * self.bs
    }

    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        let bs = self.bs;
        y.as_mut_slice()
            .par_chunks_mut(bs)
            .enumerate()
            .for_each(|(i, yi)| {
                yi.iter_mut().for_each(|v| *v = 0.0);
                for k in self.row_offsets[i]..self.row_offsets[i + 1] {
                    let j = self.col_indices[k];
                    let block = &self.blocks[k];
                    for (r, yr) in yi.iter_mut().enumerate() {
                        for c in 0..bs {
                            *yr += block[(r, c)] * x[j * bs + c];
                        }
                    }
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn sample() -> BlockCsrMatrix {
        BlockCsrMatrix::from_entries(
            3,
            2,
            vec![
                (0, 0, 0, 0, 4.0),
                (0, 0, 1, 1, 3.0),
                (0, 1, 0, 1, -1.0),
                (1, 1, 0, 0, 5.0),
                (1, 1, 1, 0, 1.0),
                (1, 1, 1, 1, 2.0),
                (2, 0, 1, 0, 0.5),
                (2, 2, 0, 0, 1.0),
                (2, 2, 1, 1, 1.0),
                (2, 2, 1, 1, 1.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_structure() {
        let a = sample();
        assert_eq!(a.nnz_blocks(), 5);
        assert_eq!(a.col_indices(), &[0, 1, 1, 0, 2]);
        assert_eq!(a.block(2, 2).unwrap()[(1, 1)], 2.0);
        assert!(a.block(1, 0).is_none());
    }

    #[test]
    fn test_mul_vec_matches_scalar() {
        let a = sample();
        let x = DVector::from_vec(vec![1.0, -1.0, 2.0, 0.5, 3.0, 4.0]);
        let y = a.mul_vec(&x);
        let mut y_ref = DVector::zeros(6);
        a.to_csr().apply(&x, &mut y_ref);
        assert_relative_eq!(y, y_ref, max_relative = 1e-12);
        assert_eq!(y[0], 4.0 - 0.5);
    }

    #[test]
    fn test_interleave_from_variable_major() {
        // two cells, two variables; row e*n + c
        let mut coo = CooMatrix::new(4, 4);
        coo.push(0, 0, 1.0); // (eq0, c0) d/d(v0, c0)
        coo.push(0, 3, 2.0); // (eq0, c0) d/d(v1, c1)
        coo.push(3, 2, 7.0); // (eq1, c1) d/d(v1, c0)
        let a = BlockCsrMatrix::from_variable_major(&CsrMatrix::from(&coo), 2, 2).unwrap();
        assert_eq!(a.block(0, 0).unwrap()[(0, 0)], 1.0);
        assert_eq!(a.block(0, 1).unwrap()[(0, 1)], 2.0);
        assert_eq!(a.block(1, 0).unwrap()[(1, 1)], 7.0);
        let p = ad::AdMatrix::from_csr(a.component_matrix(0, 0));
        assert_eq!(p.get(0, 0), 1.0);
        assert_eq!(p.get(1, 0), 0.0);
    }
}
