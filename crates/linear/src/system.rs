use ad::{vertcat_all, AdMatrix, AutoDiffBlock};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::csr::CsrMatrix;

use crate::{Error, WellElimination};

/// A linearized Newton system split into cell and well parts:
///
/// ```text
/// [ A_cc  A_cw ] [ Δx_c ]   [ r_c ]
/// [ A_wc  A_ww ] [ Δx_w ] = [ r_w ]
/// ```
///
/// Cell rows and columns are ordered variable-major: row `e * n + c` is equation `e` of cell
/// `c`, column `v * n + c` is variable `v` of cell `c`.
#[derive(Clone, Debug)]
pub struct LinearSystem {
    num_cells: usize,
    block_size: usize,
    pub(crate) a_cc: CsrMatrix<f64>,
    pub(crate) a_cw: CsrMatrix<f64>,
    pub(crate) a_wc: CsrMatrix<f64>,
    pub(crate) a_ww: DMatrix<f64>,
    pub(crate) r_c: DVector<f64>,
    pub(crate) r_w: DVector<f64>,
}

impl LinearSystem {
    /// Builds the system from residual equations.
    ///
    /// The first `block_size` equations are the cell equations, one row per cell, and the first
    /// `block_size` Jacobian blocks are the cell variables. Everything after is attributed to the
    /// wells.
    pub fn from_equations(eqs: &[AutoDiffBlock], block_size: usize) -> Result<Self, Error> {
        if eqs.len() < block_size || block_size == 0 {
            return Err(Error::DimensionMismatch {
                expected: block_size,
                found: eqs.len(),
            });
        }
        let n = eqs[0].size();
        let pattern = eqs
            .iter()
            .find(|e| e.num_blocks() > 0)
            .map(|e| e.block_pattern())
            .unwrap_or_default();
        if pattern.len() < block_size || pattern[..block_size].iter().any(|&m| m != n) {
            return Err(Error::DimensionMismatch {
                expected: n,
                found: pattern.first().copied().unwrap_or(0),
            });
        }
        let num_well_vars: usize = pattern[block_size..].iter().sum();

        let cell_refs: Vec<&AutoDiffBlock> = eqs[..block_size].iter().collect();
        let cell = vertcat_all(&cell_refs)?;
        let (a_cc, a_cw) = split_columns(&cell, &pattern, block_size)?;

        let well_refs: Vec<&AutoDiffBlock> = eqs[block_size..].iter().collect();
        let (a_wc, a_ww, r_w) = if well_refs.is_empty() {
            (
                CsrMatrix::zeros(0, n * block_size),
                DMatrix::zeros(0, 0),
                DVector::zeros(0),
            )
        } else {
            let well = vertcat_all(&well_refs)?;
            let (a_wc, a_ww) = split_columns(&well, &pattern, block_size)?;
            (a_wc, DMatrix::from(&a_ww), well.value().clone())
        };
        if a_ww.nrows() != num_well_vars {
            return Err(Error::DimensionMismatch {
                expected: num_well_vars,
                found: a_ww.nrows(),
            });
        }

        Ok(LinearSystem {
            num_cells: n,
            block_size,
            a_cc,
            a_cw,
            a_wc,
            a_ww,
            r_c: cell.value().clone(),
            r_w,
        })
    }

    /// Assembles a system from explicit parts.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        num_cells: usize,
        block_size: usize,
        a_cc: CsrMatrix<f64>,
        a_cw: CsrMatrix<f64>,
        a_wc: CsrMatrix<f64>,
        a_ww: DMatrix<f64>,
        r_c: DVector<f64>,
        r_w: DVector<f64>,
    ) -> Result<Self, Error> {
        let nc = num_cells * block_size;
        let nw = a_ww.nrows();
        let dims_ok = a_cc.nrows() == nc
            && a_cc.ncols() == nc
            && a_cw.nrows() == nc
            && a_cw.ncols() == nw
            && a_wc.nrows() == nw
            && a_wc.ncols() == nc
            && a_ww.ncols() == nw
            && r_c.len() == nc
            && r_w.len() == nw;
        if !dims_ok {
            return Err(Error::DimensionMismatch {
                expected: nc,
                found: a_cc.nrows(),
            });
        }
        Ok(LinearSystem {
            num_cells,
            block_size,
            a_cc,
            a_cw,
            a_wc,
            a_ww,
            r_c,
            r_w,
        })
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_well_unknowns(&self) -> usize {
        self.a_ww.nrows()
    }

    pub fn cell_rhs(&self) -> &DVector<f64> {
        &self.r_c
    }

    pub fn well_rhs(&self) -> &DVector<f64> {
        &self.r_w
    }

    /// Eliminates the well unknowns, returning the reduced cell matrix and right hand side.
    pub fn eliminate_wells(
        &self,
    ) -> Result<(WellElimination, CsrMatrix<f64>, DVector<f64>), Error> {
        WellElimination::reduce(self)
    }

    /// `J x` for a full (cell then well) vector.
    pub fn apply_full(&self, x: &DVector<f64>) -> DVector<f64> {
        let nc = self.num_cells * self.block_size;
        let xc = x.rows(0, nc).clone_owned();
        let xw = x.rows(nc, x.len() - nc).clone_owned();
        let yc = &self.a_cc * &xc + &self.a_cw * &xw;
        let yw = &self.a_wc * &xc + &self.a_ww * &xw;
        let mut y = DVector::zeros(x.len());
        y.rows_mut(0, nc).copy_from(&yc);
        y.rows_mut(nc, x.len() - nc).copy_from(&yw);
        y
    }
}

/// Splits the collapsed Jacobian of `x` into the cell columns and the well columns.
fn split_columns(
    x: &AutoDiffBlock,
    pattern: &[usize],
    block_size: usize,
) -> Result<(CsrMatrix<f64>, CsrMatrix<f64>), Error> {
    let n = x.size();
    let zeros: Vec<AdMatrix> = pattern.iter().map(|&m| AdMatrix::zeros(n, m)).collect();
    let jac: Vec<&AdMatrix> = (0..pattern.len())
        .map(|b| x.derivative().get(b).unwrap_or(&zeros[b]))
        .collect();
    let cells = AdMatrix::hstack(&jac[..block_size])?;
    let wells = if jac.len() > block_size {
        AdMatrix::hstack(&jac[block_size..])?
    } else {
        CsrMatrix::zeros(n, 0)
    };
    Ok((cells, wells))
}

