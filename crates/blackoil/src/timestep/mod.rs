//! Adaptive sub-stepping of report steps.

mod control;
mod timer;

use std::{str::FromStr, sync::Arc};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

pub use control::{PidAndIterationControl, PidControl, TimeStepControl};
pub use timer::SubStepTimer;

use crate::{
    clock::{Clock, SystemClock},
    config::TimeStepConfig,
    report::SimulationReport,
    Error,
};

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ControlType {
    #[default]
    Pid,
    PidAndIteration,
}

impl FromStr for ControlType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pid" => Ok(ControlType::Pid),
            "pid+iteration" => Ok(ControlType::PidAndIteration),
            _ => Err(Error::Config(format!("unknown time step control '{s}'"))),
        }
    }
}

/// Something that advances a state by one sub-step and can be rolled back.
pub trait SubStepSolver {
    type Snapshot;

    /// Advances by `dt`. Recoverable errors (see [`Error::is_recoverable`]) make the driver
    /// restore the snapshot and retry with a shorter step.
    fn step(&mut self, dt: f64) -> Result<SimulationReport, Error>;

    fn snapshot(&self) -> Self::Snapshot;

    fn restore(&mut self, snapshot: &Self::Snapshot);

    /// Relative change of the solution since `previous`.
    fn relative_change(&self, previous: &Self::Snapshot) -> f64;

    /// Work done by the last failed attempt.
    fn failed_report(&self) -> SimulationReport {
        SimulationReport {
            failed: true,
            ..Default::default()
        }
    }
}

/// Drives a [`SubStepSolver`] through report steps, choosing the sub-steps with a
/// [`TimeStepControl`] and restarting failed ones with a shorter step.
pub struct AdaptiveTimeStepping {
    config: TimeStepConfig,
    control: Box<dyn TimeStepControl>,
    clock: Arc<dyn Clock>,
    /// step proposed at the end of the previous report step
    suggested: Option<f64>,
}

impl AdaptiveTimeStepping {
    pub fn new(config: TimeStepConfig) -> Self {
        let control: Box<dyn TimeStepControl> = match config.control {
            ControlType::Pid => Box::new(PidControl::new(config.control_tol)),
            ControlType::PidAndIteration => Box::new(PidAndIterationControl::new(
                config.control_tol,
                config.target_iterations,
            )),
        };
        AdaptiveTimeStepping {
            config,
            control,
            clock: Arc::new(SystemClock::new()),
            suggested: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_control(mut self, control: Box<dyn TimeStepControl>) -> Self {
        self.control = control;
        self
    }

    pub fn suggested_step(&self) -> Option<f64> {
        self.suggested
    }

    /// Advances `solver` from `start` over a report step of length `length`.
    ///
    /// # Errors
    ///
    /// `Error::TimestepAbort` when the restarts are exhausted or the step falls below
    /// `min_step`; unrecoverable solver errors are returned as they are.
    pub fn step_report<S: SubStepSolver>(
        &mut self,
        solver: &mut S,
        report_step: usize,
        start: f64,
        length: f64,
    ) -> Result<SimulationReport, Error> {
        let cfg = &self.config;
        let mut timer = SubStepTimer::new(start, length);
        let mut dt = self
            .suggested
            .unwrap_or(cfg.initial_fraction * length)
            .min(cfg.max_step);
        let mut restarts = 0;
        let mut report = SimulationReport::default();

        while !timer.done() {
            let step = timer.step_length(dt);
            let snapshot = solver.snapshot();
            let started = self.clock.now();
            match solver.step(step) {
                Ok(mut sub) => {
                    sub.solver_time = self.clock.now().saturating_sub(started);
                    let change = solver.relative_change(&snapshot);
                    timer.advance(step);
                    let mut next = self
                        .control
                        .compute(step, sub.newton_iterations, change)
                        .min(cfg.max_growth * step);
                    if restarts > 0 {
                        next = next.min(cfg.growth_factor * step);
                    }
                    next = next.min(cfg.max_step);
                    log::debug!(
                        "sub-step {} of report step {report_step}: dt = {step:.4e} s, {} Newton iterations, relative change {change:.3e}, next dt = {next:.4e} s",
                        timer.steps(),
                        sub.newton_iterations,
                    );
                    report += &sub;
                    restarts = 0;
                    dt = next;
                }
                Err(e) if e.is_recoverable() => {
                    let mut failed = solver.failed_report();
                    failed.solver_time = self.clock.now().saturating_sub(started);
                    failed.failed = true;
                    failed.restarts = 1;
                    report += &failed;
                    solver.restore(&snapshot);
                    restarts += 1;
                    let shorter = step * cfg.restart_factor;
                    if restarts >= cfg.max_restarts || shorter < cfg.min_step {
                        return Err(Error::TimestepAbort {
                            report_step,
                            time: timer.time(),
                            restarts,
                            reason: e.to_string(),
                        });
                    }
                    log::warn!(
                        "report step {report_step}: sub-step of {step:.4e} s at t = {:.6e} s failed ({e}), retrying with {shorter:.4e} s",
                        timer.time()
                    );
                    dt = shorter;
                }
                Err(e) => return Err(e),
            }
        }

        self.suggested = Some(dt);
        report.converged = true;
        log::info!(
            "report step {report_step} done at t = {:.6e} s: {} sub-steps, {} Newton iterations, {} linear iterations",
            timer.time(),
            timer.steps(),
            report.newton_iterations,
            report.linear_iterations
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests;
