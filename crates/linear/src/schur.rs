//! Block Schur-complement elimination of the well unknowns.

use nalgebra::DVector;
use nalgebra_sparse::csr::CsrMatrix;

use crate::{system::LinearSystem, Dense, Error};

/// What is needed to recover the well increments once the reduced cell system is solved.
#[derive(Clone, Debug)]
pub struct WellElimination {
    /// `A_ww⁻¹`, exact zeros dropped. Block diagonal by well unless wells are coupled through
    /// group controls.
    d_inv: CsrMatrix<f64>,
    a_wc: CsrMatrix<f64>,
    r_w: DVector<f64>,
}

impl WellElimination {
    /// Returns the elimination together with `S = A_cc − A_cw A_ww⁻¹ A_wc` and
    /// `r_c − A_cw A_ww⁻¹ r_w`.
    pub fn reduce(sys: &LinearSystem) -> Result<(Self, CsrMatrix<f64>, DVector<f64>), Error> {
        let nw = sys.a_ww.nrows();
        if nw == 0 {
            let elim = WellElimination {
                d_inv: CsrMatrix::zeros(0, 0),
                a_wc: sys.a_wc.clone(),
                r_w: DVector::zeros(0),
            };
            return Ok((elim, sys.a_cc.clone(), sys.r_c.clone()));
        }

        let d_inv = CsrMatrix::from(&Dense::factor(sys.a_ww.clone())?.inverse());
        let y = &d_inv * &sys.a_wc;
        let s = &sys.a_cc - &(&sys.a_cw * &y);
        let z = &d_inv * &sys.r_w;
        let rhs = &sys.r_c - &sys.a_cw * &z;

        let elim = WellElimination {
            d_inv,
            a_wc: sys.a_wc.clone(),
            r_w: sys.r_w.clone(),
        };
        Ok((elim, s, rhs))
    }

    pub fn num_well_unknowns(&self) -> usize {
        self.r_w.len()
    }

    /// `Δx_w = A_ww⁻¹ (r_w − A_wc Δx_c)`
    pub fn recover(&self, dx_c: &DVector<f64>) -> DVector<f64> {
        if self.r_w.is_empty() {
            return DVector::zeros(0);
        }
        &self.d_inv * &(&self.r_w - &self.a_wc * dx_c)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, DMatrix};

    use super::*;

    fn csr(m: &DMatrix<f64>) -> CsrMatrix<f64> {
        CsrMatrix::from(m)
    }

    #[test]
    fn test_schur_matches_full_solve() {
        // two cells, one unknown each, two well unknowns
        let a_cc = dmatrix![4.0, -1.0; -1.0, 3.0];
        let a_cw = dmatrix![1.0, 0.0; 0.0, 0.5];
        let a_wc = dmatrix![2.0, 0.0; 0.0, 1.0];
        let a_ww = dmatrix![5.0, 1.0; 0.0, 2.0];
        let r_c = DVector::from_vec(vec![1.0, 2.0]);
        let r_w = DVector::from_vec(vec![-1.0, 0.5]);

        let sys = LinearSystem::from_parts(
            2,
            1,
            csr(&a_cc),
            csr(&a_cw),
            csr(&a_wc),
            a_ww.clone(),
            r_c.clone(),
            r_w.clone(),
        )
        .unwrap();
        let (elim, s, rhs) = sys.eliminate_wells().unwrap();
        let dx_c = Dense::factor(DMatrix::from(&s)).unwrap().solve(&rhs);
        let dx_w = elim.recover(&dx_c);

        let mut full = DMatrix::zeros(4, 4);
        full.view_mut((0, 0), (2, 2)).copy_from(&a_cc);
        full.view_mut((0, 2), (2, 2)).copy_from(&a_cw);
        full.view_mut((2, 0), (2, 2)).copy_from(&a_wc);
        full.view_mut((2, 2), (2, 2)).copy_from(&a_ww);
        let rhs_full = DVector::from_vec(vec![1.0, 2.0, -1.0, 0.5]);
        let x = Dense::factor(full).unwrap().solve(&rhs_full);

        assert_relative_eq!(dx_c[0], x[0], max_relative = 1e-12);
        assert_relative_eq!(dx_c[1], x[1], max_relative = 1e-12);
        assert_relative_eq!(dx_w[0], x[2], max_relative = 1e-12);
        assert_relative_eq!(dx_w[1], x[3], max_relative = 1e-12);
    }

    #[test]
    fn test_no_wells_is_identity_reduction() {
        let a_cc = dmatrix![2.0, 0.0; 0.0, 2.0];
        let sys = LinearSystem::from_parts(
            2,
            1,
            csr(&a_cc),
            CsrMatrix::zeros(2, 0),
            CsrMatrix::zeros(0, 2),
            DMatrix::zeros(0, 0),
            DVector::from_vec(vec![1.0, 1.0]),
            DVector::zeros(0),
        )
        .unwrap();
        let (elim, s, rhs) = sys.eliminate_wells().unwrap();
        assert_eq!(s, sys.a_cc);
        assert_eq!(rhs, sys.r_c);
        assert_eq!(elim.recover(&rhs).len(), 0);
    }
}
