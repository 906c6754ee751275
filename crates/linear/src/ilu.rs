use nalgebra::{DMatrix, DVector};

use crate::{BlockCsrMatrix, Error, Preconditioner};

/// Block incomplete LU factorization without fill-in.
///
/// `L` (unit block diagonal) and `U` share the sparsity pattern of the input matrix. The inverted
/// diagonal blocks of `U` are kept separately.
#[derive(Clone, Debug)]
pub struct BlockIlu0 {
    lu: BlockCsrMatrix,
    diag_pos: Vec<usize>,
    inv_diag: Vec<DMatrix<f64>>,
}

impl BlockIlu0 {
    pub fn new(a: &BlockCsrMatrix) -> Result<Self, Error> {
        let mut lu = a.clone();
        let n = lu.num_block_rows();
        let diag_pos: Vec<usize> = (0..n).map(|i| lu.diagonal_position(i)).collect();
        let mut inv_diag: Vec<DMatrix<f64>> = Vec::with_capacity(n);

        for i in 0..n {
            let row = lu.row_range(i);
            for kk in row.start..diag_pos[i] {
                let k = lu.col_indices()[kk];
                // L_ik = A_ik U_kk⁻¹
                let l_ik = &lu.blocks()[kk] * &inv_diag[k];
                lu.blocks_mut()[kk] = l_ik.clone();

                for jj in (kk + 1)..row.end {
                    let j = lu.col_indices()[jj];
                    if let Some(pos) = lu.position(k, j) {
                        let update = &l_ik * &lu.blocks()[pos];
                        lu.blocks_mut()[jj] -= update;
                    }
                }
            }
            let inv = lu.blocks()[diag_pos[i]]
                .clone()
                .try_inverse()
                .ok_or(Error::SingularBlock { row: i })?;
            inv_diag.push(inv);
        }

        Ok(BlockIlu0 {
            lu,
            diag_pos,
            inv_diag,
        })
    }
}

impl Preconditioner for BlockIlu0 {
    fn apply(&self, r: &DVector<f64>, z: &mut DVector<f64>) {
        let bs = self.lu.block_size();
        let n = self.lu.num_block_rows();
        let cols = self.lu.col_indices();
        let blocks = self.lu.blocks();

        // forward: L y = r
        z.copy_from(r);
        for i in 0..n {
            let mut yi = z.rows(i * bs, bs).clone_owned();
            for kk in self.lu.row_range(i).start..self.diag_pos[i] {
                let k = cols[kk];
                yi -= &blocks[kk] * z.rows(k * bs, bs);
            }
            z.rows_mut(i * bs, bs).copy_from(&yi);
        }

        // backward: U x = y
        for i in (0..n).rev() {
            let mut yi = z.rows(i * bs, bs).clone_owned();
            for jj in (self.diag_pos[i] + 1)..self.lu.row_range(i).end {
                let j = cols[jj];
                yi -= &blocks[jj] * z.rows(j * bs, bs);
            }
            let xi = &self.inv_diag[i] * yi;
            z.rows_mut(i * bs, bs).copy_from(&xi);
        }
    }
}
