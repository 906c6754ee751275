//! Newton iteration on the well equations alone, with the reservoir held fixed.

use ad::{vertcat, AdMatrix, AutoDiffBlock};
use linear::Dense;

use super::{
    assemble::{PhaseProps, WellEquations},
    convergence::average_inverse_fvf,
    BlackoilModel,
};
use crate::{primary::update_well_state, Error};

/// Iteration limit of the well-only solve.
pub const MAX_WELL_ITERATIONS: usize = 15;

impl BlackoilModel {
    fn wells_converged(&self, eqs: &WellEquations, pp: &PhaseProps) -> bool {
        let nw = self.wells.num_wells();
        let b_avg: Vec<f64> = pp
            .b
            .iter()
            .map(|b| average_inverse_fvf(b.value(), &*self.comm))
            .collect();
        let flux_ok = eqs
            .flux
            .value()
            .iter()
            .enumerate()
            .all(|(k, &v)| (v * b_avg[k / nw]).abs() < self.config.tolerance_wells);
        let control_ok = eqs
            .control
            .value()
            .iter()
            .zip(eqs.control_scale.iter())
            .all(|(&v, &s)| (v / s).abs() < self.config.tolerance_well_control);
        flux_ok && control_ok
    }

    /// Solves the well equations for the well unknowns before the first coupled iteration.
    ///
    /// Returns the number of iterations spent. A singular well Jacobian or a solve that does not
    /// converge leaves the well state as it was.
    ///
    /// # Errors
    ///
    /// `Error::WellControlInfeasible` when the solve produces a non-finite update.
    pub(crate) fn solve_well_equations(&mut self) -> Result<usize, Error> {
        let nw = self.wells.num_wells();
        if nw == 0 {
            return Ok(0);
        }
        let (s, pp) = self.constant_props()?;
        let saved = self.well_state.clone();
        let nq = self.well_state.surface_rates.len();

        for it in 0..MAX_WELL_ITERATIONS {
            let vars = AutoDiffBlock::variables(vec![
                self.well_state.surface_rates.clone(),
                self.well_state.bhp.clone(),
            ]);
            let targets = self.well_targets(&s, &pp);
            let eqs = self.well_equations(&s, &pp, &vars[0], &vars[1], &targets)?;
            if self.wells_converged(&eqs, &pp) {
                log::debug!("well equations converged in {it} iterations");
                return Ok(it);
            }

            let eq = vertcat(&eqs.flux, &eqs.control)?;
            let jac = AdMatrix::from_csr(eq.collapse_jacs()?).to_dense();
            let lu = match Dense::factor(jac) {
                Ok(lu) => lu,
                Err(e) => {
                    log::warn!("well-only solve abandoned: {e}");
                    self.well_state = saved;
                    return Ok(it);
                }
            };
            let dx = lu.solve(eq.value());
            if let Some(k) = dx.iter().position(|v| !v.is_finite()) {
                let w = if k < nq { k % nw } else { k - nq };
                return Err(Error::WellControlInfeasible {
                    well: self.wells.specs()[w].name.clone(),
                    reason: "non-finite update in the well-only solve".into(),
                });
            }
            update_well_state(&mut self.well_state, &dx, self.config.dbhp_max_rel)?;
            let rates = targets.reservoir_rates(self, &self.well_state);
            self.wells
                .update_controls(&self.pu, &mut self.well_state, &rates, &targets.voidage)?;
        }
        log::debug!("well equations not converged after {MAX_WELL_ITERATIONS} iterations");
        self.well_state = saved;
        Ok(MAX_WELL_ITERATIONS)
    }
}
