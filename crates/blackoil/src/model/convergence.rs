use linear::Communicator;
use nalgebra::DVector;

use crate::{config::ModelConfig, phases::PhaseUsage, Error};

/// Residual measures of one Newton iteration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConvergenceReport {
    /// `dt · B_avg · max |R| / pv` per phase
    pub cnv: Vec<f64>,
    /// `dt · B_avg · |ΣR| / Σpv` per phase
    pub mb: Vec<f64>,
    /// largest well flux residual in reservoir volume rate
    pub well_flux: f64,
    /// largest control residual relative to its target
    pub well_control: f64,
    pub converged: bool,
}

/// Residuals entering the test, unscaled, one vector per active phase.
pub struct Residuals<'a> {
    pub mass: &'a [DVector<f64>],
    /// rate residuals, phase-major over the wells
    pub well_flux: &'a DVector<f64>,
    pub well_control: &'a DVector<f64>,
    pub control_scale: &'a DVector<f64>,
}

/// Mean of `1/b` over the owned cells.
pub fn average_inverse_fvf(b: &DVector<f64>, comm: &dyn Communicator) -> f64 {
    let mask = comm.owner_mask();
    let (mut sum, mut count) = (0.0, 0.0);
    for (c, &v) in b.iter().enumerate() {
        if mask.get(c).copied().unwrap_or(true) {
            sum += 1.0 / v;
            count += 1.0;
        }
    }
    comm.sum(sum) / comm.sum(count).max(1.0)
}

/// Convergence test of the mass balance and well equations.
///
/// # Errors
///
/// `Error::NumericalProblem` for a non-finite residual or a CNV value above
/// `max_residual_allowed`, naming the phase and the cell.
#[allow(clippy::too_many_arguments)]
pub fn check_convergence(
    config: &ModelConfig,
    pu: &PhaseUsage,
    comm: &dyn Communicator,
    res: &Residuals,
    b_avg: &[f64],
    pore_volume: &DVector<f64>,
    dt: f64,
    iteration: usize,
) -> Result<ConvergenceReport, Error> {
    let np = pu.num_phases();
    let mask = comm.owner_mask();
    let owned = |c: usize| mask.get(c).copied().unwrap_or(true);
    let pv_sum = comm.sum(
        pore_volume
            .iter()
            .enumerate()
            .filter(|&(c, _)| owned(c))
            .map(|(_, v)| v)
            .sum(),
    );

    let mut report = ConvergenceReport {
        cnv: vec![0.0; np],
        mb: vec![0.0; np],
        ..Default::default()
    };
    for (i, r) in res.mass.iter().enumerate() {
        let name = pu.phase_at(i).map_or("?", |p| p.name());
        let mut sum = 0.0;
        let mut worst = (0.0, 0);
        for (c, &v) in r.iter().enumerate() {
            if !owned(c) {
                continue;
            }
            if !v.is_finite() {
                return Err(Error::NumericalProblem(format!(
                    "non-finite {name} residual in cell {c}"
                )));
            }
            sum += v;
            let scaled = v.abs() / pore_volume[c];
            if scaled > worst.0 {
                worst = (scaled, c);
            }
        }
        let cnv = comm.max(dt * b_avg[i] * worst.0);
        if cnv > config.max_residual_allowed {
            return Err(Error::NumericalProblem(format!(
                "{name} residual {cnv:.3e} above the allowed maximum in cell {}",
                worst.1
            )));
        }
        report.cnv[i] = cnv;
        report.mb[i] = dt * b_avg[i] * comm.sum(sum).abs() / pv_sum;
    }

    let nw = res.well_control.len();
    for (k, &v) in res.well_flux.iter().enumerate() {
        if !v.is_finite() {
            return Err(Error::NumericalProblem(format!(
                "non-finite rate residual of well {}",
                k % nw.max(1)
            )));
        }
        let i = if nw > 0 { k / nw } else { 0 };
        report.well_flux = report.well_flux.max(v.abs() * b_avg[i]);
    }
    for (w, &v) in res.well_control.iter().enumerate() {
        if !v.is_finite() {
            return Err(Error::NumericalProblem(format!(
                "non-finite control residual of well {w}"
            )));
        }
        report.well_control = report.well_control.max(v.abs() / res.control_scale[w]);
    }

    let tol_cnv = if iteration >= config.max_strict_iter {
        config.tolerance_cnv_relaxed
    } else {
        config.tolerance_cnv
    };
    report.converged = report.mb.iter().all(|&v| v < config.tolerance_mb)
        && report.cnv.iter().all(|&v| v < tol_cnv)
        && report.well_flux < config.tolerance_wells
        && report.well_control < config.tolerance_well_control;
    log::trace!(
        "iteration {iteration}: MB {:?} CNV {:?} wells {:.2e}/{:.2e}",
        report.mb,
        report.cnv,
        report.well_flux,
        report.well_control
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use linear::SerialCommunicator;

    use super::*;

    fn check(mass: &[DVector<f64>], iteration: usize) -> Result<ConvergenceReport, Error> {
        let comm = SerialCommunicator::new(2);
        let empty = DVector::zeros(0);
        let res = Residuals {
            mass,
            well_flux: &empty,
            well_control: &empty,
            control_scale: &empty,
        };
        check_convergence(
            &ModelConfig::default(),
            &PhaseUsage::water_oil(),
            &comm,
            &res,
            &[1.0, 2.0],
            &DVector::from_vec(vec![1.0, 2.0]),
            10.0,
            iteration,
        )
    }

    #[test]
    fn test_measures() {
        let mass = [
            DVector::from_vec(vec![1.0e-6, -3.0e-6]),
            DVector::from_vec(vec![0.0, 1.0e-5]),
        ];
        let r = check(&mass, 0).unwrap();
        assert_relative_eq!(r.cnv[0], 10.0 * 1.5e-6, max_relative = 1e-12);
        assert_relative_eq!(r.cnv[1], 10.0 * 2.0 * 5.0e-6, max_relative = 1e-12);
        assert_relative_eq!(r.mb[0], 10.0 * 2.0e-6 / 3.0, max_relative = 1e-12);
        assert!(!r.converged);
    }

    #[test]
    fn test_relaxed_cnv() {
        let mass = [
            DVector::from_vec(vec![1.0e-4, 0.0]),
            DVector::from_vec(vec![1.0e-4, -1.0e-4]),
        ];
        let strict = check(&mass, 0).unwrap();
        assert!(!strict.converged);
        // MB is still above its tolerance
        assert!(!check(&mass, 8).unwrap().converged);
        let balanced = [
            DVector::from_vec(vec![1.0e-4, -1.0e-4]),
            DVector::from_vec(vec![1.0e-4, -1.0e-4]),
        ];
        assert!(!check(&balanced, 0).unwrap().converged);
        assert!(check(&balanced, 8).unwrap().converged);
    }

    #[test]
    fn test_numerical_problems() {
        let nan = [DVector::from_vec(vec![0.0, f64::NAN]), DVector::zeros(2)];
        let err = check(&nan, 0).unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("cell 1"));
        let huge = [DVector::zeros(2), DVector::from_vec(vec![1.0e9, 0.0])];
        let err = check(&huge, 0).unwrap_err();
        assert!(err.to_string().contains("oil"));
    }

    #[test]
    fn test_average_inverse_fvf() {
        let comm = SerialCommunicator::new(2);
        let b = DVector::from_vec(vec![0.5, 1.0]);
        assert_relative_eq!(average_inverse_fvf(&b, &comm), 1.5, max_relative = 1e-12);
    }
}
