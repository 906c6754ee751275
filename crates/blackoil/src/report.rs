use std::{ops::AddAssign, time::Duration};

use nonlinear::NewtonReport;
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Work done by one sub-step, or accumulated over a report step or a run.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimulationReport {
    pub assemble_time: Duration,
    pub linear_solve_time: Duration,
    pub update_time: Duration,
    /// wall time of the sub-steps, failed attempts included
    pub solver_time: Duration,
    pub newton_iterations: usize,
    pub linear_iterations: usize,
    pub well_iterations: usize,
    pub converged: bool,
    /// set when any accumulated attempt failed
    pub failed: bool,
    /// number of failed sub-step attempts
    pub restarts: usize,
}

impl SimulationReport {
    pub fn from_newton(report: &NewtonReport, well_iterations: usize) -> Self {
        SimulationReport {
            assemble_time: report.assemble_time,
            linear_solve_time: report.linear_solve_time,
            update_time: report.update_time,
            newton_iterations: report.iterations,
            linear_iterations: report.linear_iterations,
            well_iterations,
            converged: report.converged,
            failed: !report.converged,
            ..Default::default()
        }
    }
}

impl AddAssign<&SimulationReport> for SimulationReport {
    fn add_assign(&mut self, rhs: &SimulationReport) {
        self.assemble_time += rhs.assemble_time;
        self.linear_solve_time += rhs.linear_solve_time;
        self.update_time += rhs.update_time;
        self.solver_time += rhs.solver_time;
        self.newton_iterations += rhs.newton_iterations;
        self.linear_iterations += rhs.linear_iterations;
        self.well_iterations += rhs.well_iterations;
        self.converged = rhs.converged;
        self.failed |= rhs.failed;
        self.restarts += rhs.restarts;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate() {
        let newton = NewtonReport {
            iterations: 3,
            linear_iterations: 12,
            assemble_time: Duration::from_millis(5),
            converged: true,
            ..Default::default()
        };
        let mut total = SimulationReport::default();
        total += &SimulationReport::from_newton(&newton, 2);
        total += &SimulationReport {
            failed: true,
            restarts: 1,
            newton_iterations: 10,
            ..Default::default()
        };
        total += &SimulationReport::from_newton(&newton, 0);
        assert_eq!(total.newton_iterations, 16);
        assert_eq!(total.linear_iterations, 24);
        assert_eq!(total.well_iterations, 2);
        assert_eq!(total.assemble_time, Duration::from_millis(10));
        assert_eq!(total.restarts, 1);
        assert!(total.converged);
        assert!(total.failed);
    }
}
