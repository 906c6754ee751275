use approx::assert_relative_eq;

use super::*;

/// Integrates `u' = -u` with implicit Euler; steps longer than `max_dt` fail to converge.
struct Decay {
    u: f64,
    time: f64,
    max_dt: f64,
    attempts: Vec<f64>,
}

impl Decay {
    fn new(max_dt: f64) -> Self {
        Decay {
            u: 1.0,
            time: 0.0,
            max_dt,
            attempts: Vec::new(),
        }
    }
}

impl SubStepSolver for Decay {
    type Snapshot = (f64, f64);

    fn step(&mut self, dt: f64) -> Result<SimulationReport, Error> {
        self.attempts.push(dt);
        if dt > self.max_dt {
            self.u = f64::NAN;
            return Err(nonlinear::Error::ConvergenceRecover { iterations: 10 }.into());
        }
        self.u /= 1.0 + dt;
        self.time += dt;
        Ok(SimulationReport {
            newton_iterations: 2,
            converged: true,
            ..Default::default()
        })
    }

    fn snapshot(&self) -> (f64, f64) {
        (self.u, self.time)
    }

    fn restore(&mut self, snapshot: &(f64, f64)) {
        (self.u, self.time) = *snapshot;
    }

    fn relative_change(&self, previous: &(f64, f64)) -> f64 {
        (self.u - previous.0).abs() / self.u.abs()
    }
}

fn config() -> TimeStepConfig {
    TimeStepConfig {
        initial_fraction: 1.0,
        restart_factor: 0.5,
        max_restarts: 3,
        ..Default::default()
    }
}

#[test]
fn test_restart_then_finish_exactly() {
    let mut solver = Decay::new(30.0);
    let mut driver = AdaptiveTimeStepping::new(config());
    let report = driver.step_report(&mut solver, 0, 0.0, 100.0).unwrap();

    // 100 and 50 fail, 25 succeeds
    assert_eq!(&solver.attempts[..3], &[100.0, 50.0, 25.0]);
    assert_eq!(report.restarts, 2);
    assert!(report.failed);
    assert!(report.converged);
    assert_relative_eq!(solver.time, 100.0, max_relative = 1e-12);
    assert!(solver.u.is_finite());
    let step_sum: f64 = solver.attempts.iter().filter(|&&dt| dt <= 30.0).sum();
    assert_relative_eq!(step_sum, 100.0, max_relative = 1e-12);
}

#[test]
fn test_growth_after_restart_is_limited() {
    let mut solver = Decay::new(30.0);
    let mut driver = AdaptiveTimeStepping::new(config());
    driver.step_report(&mut solver, 0, 0.0, 100.0).unwrap();
    // the step after the first success is at most growth_factor times longer
    assert!(solver.attempts[3] <= 2.0 * 25.0 + 1e-12);
}

#[test]
fn test_abort_after_max_restarts() {
    let mut solver = Decay::new(1.0);
    let mut driver = AdaptiveTimeStepping::new(config());
    let err = driver.step_report(&mut solver, 4, 0.0, 100.0).unwrap_err();
    match err {
        Error::TimestepAbort {
            report_step,
            restarts,
            ..
        } => {
            assert_eq!(report_step, 4);
            assert_eq!(restarts, 3);
        }
        e => panic!("unexpected error {e}"),
    }
    assert_eq!(solver.attempts, vec![100.0, 50.0, 25.0]);
    // rolled back to the start
    assert_eq!(solver.u, 1.0);
}

#[test]
fn test_abort_below_min_step() {
    let mut solver = Decay::new(0.0);
    let mut driver = AdaptiveTimeStepping::new(TimeStepConfig {
        initial_fraction: 1.0,
        min_step: 40.0,
        ..Default::default()
    });
    assert!(matches!(
        driver.step_report(&mut solver, 0, 0.0, 100.0),
        Err(Error::TimestepAbort { restarts: 1, .. })
    ));
}

#[test]
fn test_unrecoverable_error_propagates() {
    struct Broken;
    impl SubStepSolver for Broken {
        type Snapshot = ();
        fn step(&mut self, _dt: f64) -> Result<SimulationReport, Error> {
            Err(Error::Config("broken".into()))
        }
        fn snapshot(&self) {}
        fn restore(&mut self, _snapshot: &()) {}
        fn relative_change(&self, _previous: &()) -> f64 {
            0.0
        }
    }
    let mut driver = AdaptiveTimeStepping::new(config());
    assert!(matches!(
        driver.step_report(&mut Broken, 0, 0.0, 1.0),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_suggestion_carries_over() {
    let mut solver = Decay::new(f64::INFINITY);
    let mut driver = AdaptiveTimeStepping::new(TimeStepConfig {
        initial_fraction: 0.1,
        ..Default::default()
    });
    assert_eq!(driver.suggested_step(), None);
    driver.step_report(&mut solver, 0, 0.0, 10.0).unwrap();
    let suggested = driver.suggested_step().unwrap();
    let before = solver.attempts.len();
    driver.step_report(&mut solver, 1, 10.0, 1.0).unwrap();
    assert_eq!(solver.attempts[before], suggested);
    assert_relative_eq!(solver.time, 11.0, max_relative = 1e-12);
}

#[test]
fn test_parse_control() {
    assert_eq!("pid".parse::<ControlType>().unwrap(), ControlType::Pid);
    assert_eq!(
        "pid+iteration".parse::<ControlType>().unwrap(),
        ControlType::PidAndIteration
    );
    assert!(matches!("iteration".parse::<ControlType>(), Err(Error::Config(_))));
}
