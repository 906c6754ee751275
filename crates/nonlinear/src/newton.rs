//! Newton-Raphson iteration with oscillation detection and relaxation.

use std::time::{Duration, Instant};

use nalgebra::DVector;
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{detect_oscillations, stabilize, Error, NLProblem, NLSolver, RelaxType};

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct NewtonOptions {
    /// maximum number of iterations per solve attempt
    pub max_iter: usize,
    /// minimum number of iterations (linear solves) per solve attempt
    pub min_iter: usize,
    pub relax_type: RelaxType,
    /// floor of the relaxation factor
    pub relax_max: f64,
    /// reduction of the relaxation factor on each detected oscillation
    pub relax_increment: f64,
    /// relative tolerance of the oscillation test
    pub relax_rel_tol: f64,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        NewtonOptions {
            max_iter: 10,
            min_iter: 1,
            relax_type: RelaxType::Dampen,
            relax_max: 0.5,
            relax_increment: 0.1,
            relax_rel_tol: 0.2,
        }
    }
}

/// Counters and timings of one call to [`Newton::solve`].
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewtonReport {
    pub iterations: usize,
    pub linear_iterations: usize,
    pub assemble_time: Duration,
    pub linear_solve_time: Duration,
    pub update_time: Duration,
    pub converged: bool,
}

#[derive(Debug, Clone)]
pub struct Newton {
    options: NewtonOptions,
    /// previous Newton increment, for SOR relaxation
    dx_old: DVector<f64>,
    /// residual norms per phase of every iteration of the current solve
    history: Vec<Vec<f64>>,
    /// current relaxation factor
    omega: f64,
    /// current number of iterations in a solve attempt
    curiter: usize,
    /// total number of nonlinear iterations across all solves
    niters: usize,
    /// total number of convergence failures across all solves
    nconvfails: usize,
    report: NewtonReport,
}

impl Newton {
    pub fn new(options: NewtonOptions) -> Self {
        Newton {
            options,
            dx_old: DVector::zeros(0),
            history: Vec::new(),
            omega: 1.0,
            curiter: 0,
            niters: 0,
            nconvfails: 0,
            report: NewtonReport::default(),
        }
    }

    pub fn options(&self) -> &NewtonOptions {
        &self.options
    }

    /// Relaxation factor in effect at the end of the last solve.
    pub fn relaxation(&self) -> f64 {
        self.omega
    }

    /// Residual norms of every iteration of the last solve.
    pub fn residual_history(&self) -> &[Vec<f64>] {
        &self.history
    }

    pub fn report(&self) -> &NewtonReport {
        &self.report
    }

    fn relax(&mut self, dx: &mut DVector<f64>) {
        let (oscillate, stagnate) = detect_oscillations(&self.history, self.options.relax_rel_tol);
        if oscillate {
            self.omega = (self.omega - self.options.relax_increment).max(self.options.relax_max);
            log::debug!(
                "oscillating behaviour detected: relaxation set to {:.3}",
                self.omega
            );
        }
        if stagnate {
            log::trace!("stagnating behaviour detected");
        }
        stabilize(dx, &mut self.dx_old, self.omega, self.options.relax_type);
    }
}

impl NLSolver for Newton {
    fn solve<NLP>(&mut self, problem: &mut NLP) -> Result<(), NLP::Error>
    where
        NLP: NLProblem,
    {
        log::trace!("Newton::solve");

        self.curiter = 0;
        self.omega = 1.0;
        self.history.clear();
        self.dx_old = DVector::zeros(0);
        self.report = NewtonReport::default();

        loop {
            let start = Instant::now();
            problem.sys(self.curiter)?;
            self.report.assemble_time += start.elapsed();

            let conv = problem.ctest(&*self)?;
            log::trace!(
                "Newton iteration {}: residuals {:?}",
                self.curiter,
                conv.residual_norms
            );
            self.history.push(conv.residual_norms);

            if conv.converged && self.curiter >= self.options.min_iter {
                self.report.converged = true;
                break;
            }
            if self.curiter >= self.options.max_iter {
                self.nconvfails += 1;
                return Err(Error::ConvergenceRecover {
                    iterations: self.curiter,
                }
                .into());
            }

            let start = Instant::now();
            let mut dx = problem.solve()?;
            self.report.linear_solve_time += start.elapsed();
            self.report.linear_iterations += problem.num_linear_iters();

            if self.curiter > 0 {
                self.relax(&mut dx);
            }

            let start = Instant::now();
            problem.update(&dx)?;
            self.report.update_time += start.elapsed();

            self.curiter += 1;
            self.niters += 1;
            self.report.iterations = self.curiter;
        }

        Ok(())
    }

    fn get_num_iters(&self) -> usize {
        self.niters
    }

    fn get_cur_iter(&self) -> usize {
        self.curiter
    }

    fn get_num_conv_fails(&self) -> usize {
        self.nconvfails
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use linear::Dense;
    use nalgebra::{DMatrix, Vector3};

    use super::*;
    use crate::Convergence;

    #[derive(Clone, Debug)]
    struct TestProblem {
        x: Vector3<f64>,
        f: Vector3<f64>,
        j: DMatrix<f64>,
        tol: f64,
    }

    impl TestProblem {
        fn new(x0: Vector3<f64>) -> Self {
            TestProblem {
                x: x0,
                f: Vector3::zeros(),
                j: DMatrix::zeros(3, 3),
                tol: 1e-10,
            }
        }
    }

    impl NLProblem for TestProblem {
        type Error = Error;

        /// Nonlinear residual function
        ///
        /// ```math
        /// f1(x,y,z) = x^2 + y^2 + z^2 - 1 = 0
        /// f2(x,y,z) = 2x^2 + y^2 - 4z     = 0
        /// f3(x,y,z) = 3x^2 - 4y + z^2     = 0
        /// ```
        fn sys(&mut self, _iteration: usize) -> Result<(), Error> {
            let (x, y, z) = (self.x[0], self.x[1], self.x[2]);
            self.f[0] = x.powi(2) + y.powi(2) + z.powi(2) - 1.0;
            self.f[1] = 2.0 * x.powi(2) + y.powi(2) - 4.0 * z;
            self.f[2] = 3.0 * x.powi(2) - 4.0 * y + z.powi(2);
            self.j = DMatrix::from_row_slice(
                3,
                3,
                &[
                    2.0 * x,
                    2.0 * y,
                    2.0 * z,
                    4.0 * x,
                    2.0 * y,
                    -4.0,
                    6.0 * x,
                    -4.0,
                    2.0 * z,
                ],
            );
            Ok(())
        }

        fn ctest<NLS: NLSolver>(&mut self, _solver: &NLS) -> Result<Convergence, Error> {
            let norms: Vec<f64> = self.f.iter().map(|v| v.abs()).collect();
            Ok(Convergence {
                converged: norms.iter().all(|&v| v < self.tol),
                residual_norms: norms,
            })
        }

        fn solve(&mut self) -> Result<DVector<f64>, Error> {
            let rhs = DVector::from_column_slice(self.f.as_slice());
            Ok(Dense::factor(self.j.clone())?.solve(&rhs))
        }

        fn update(&mut self, dx: &DVector<f64>) -> Result<(), Error> {
            for i in 0..3 {
                self.x[i] -= dx[i];
            }
            Ok(())
        }
    }

    #[test]
    fn test_newton() {
        let y_exp = nalgebra::vector![
            0.785196933062355226,
            0.496611392944656396,
            0.369922830745872357
        ];
        let mut p = TestProblem::new(nalgebra::vector![0.5, 0.5, 0.5]);
        let mut newton = Newton::new(NewtonOptions::default());
        newton.solve(&mut p).expect("Should have converged.");

        assert_relative_eq!(p.x, y_exp, max_relative = 1e-8);
        assert!(newton.report().converged);
        assert!(newton.get_cur_iter() <= 8);
        assert_eq!(newton.get_num_iters(), newton.get_cur_iter());
        assert_eq!(newton.get_num_conv_fails(), 0);
        assert_eq!(newton.residual_history().len(), newton.get_cur_iter() + 1);
    }

    #[test]
    fn test_max_iter_failure() {
        let mut p = TestProblem::new(nalgebra::vector![0.5, 0.5, 0.5]);
        let mut newton = Newton::new(NewtonOptions {
            max_iter: 2,
            ..Default::default()
        });
        let res = newton.solve(&mut p);
        assert!(matches!(res, Err(Error::ConvergenceRecover { iterations: 2 })));
        assert_eq!(newton.get_num_conv_fails(), 1);
    }

    #[test]
    fn test_min_iter_forces_an_update() {
        let mut p = TestProblem::new(nalgebra::vector![0.5, 0.5, 0.5]);
        p.tol = 10.0;
        let mut newton = Newton::new(NewtonOptions::default());
        newton.solve(&mut p).unwrap();
        assert_eq!(newton.get_cur_iter(), 1);
        assert_ne!(p.x, nalgebra::vector![0.5, 0.5, 0.5]);
    }

    /// Residual norms that alternate between two values in two phases.
    struct Oscillating {
        iteration: usize,
    }

    impl NLProblem for Oscillating {
        type Error = Error;

        fn sys(&mut self, iteration: usize) -> Result<(), Error> {
            self.iteration = iteration;
            Ok(())
        }

        fn ctest<NLS: NLSolver>(&mut self, _solver: &NLS) -> Result<Convergence, Error> {
            let v = if self.iteration % 2 == 0 { 1.0 } else { 2.0 };
            Ok(Convergence {
                converged: false,
                residual_norms: vec![v, v],
            })
        }

        fn solve(&mut self) -> Result<DVector<f64>, Error> {
            Ok(DVector::from_element(1, 1.0))
        }

        fn update(&mut self, _dx: &DVector<f64>) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn test_oscillation_reduces_relaxation_to_floor() {
        let mut p = Oscillating { iteration: 0 };
        let mut newton = Newton::new(NewtonOptions {
            max_iter: 12,
            ..Default::default()
        });
        assert!(newton.solve(&mut p).is_err());
        assert_relative_eq!(newton.relaxation(), 0.5, max_relative = 1e-12);
    }
}
