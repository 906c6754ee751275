/// Proposes the next sub-step length from the last one.
pub trait TimeStepControl: Send {
    /// `dt` is the accepted sub-step, `iterations` the Newton iterations it took and
    /// `relative_change` the relative change of the solution over it.
    fn compute(&mut self, dt: f64, iterations: usize, relative_change: f64) -> f64;
}

const K_P: f64 = 0.075;
const K_I: f64 = 0.175;
const K_D: f64 = 0.01;

/// PID control of the relative solution change (Turek and Kuzmin).
#[derive(Clone, Debug, PartialEq)]
pub struct PidControl {
    tol: f64,
    /// the last three errors, newest last
    errors: [f64; 3],
}

impl PidControl {
    pub fn new(tol: f64) -> Self {
        PidControl {
            tol,
            errors: [tol; 3],
        }
    }
}

impl TimeStepControl for PidControl {
    fn compute(&mut self, dt: f64, _iterations: usize, relative_change: f64) -> f64 {
        self.errors.rotate_left(1);
        self.errors[2] = relative_change;
        let [e0, e1, e2] = self.errors;
        if e2 > self.tol {
            return dt * self.tol / e2;
        }
        if self.errors.iter().any(|&e| e.is_nan() || e <= 0.0) {
            // no measurable change, the driver caps the growth
            return f64::INFINITY;
        }
        dt * (e1 / e2).powf(K_P) * (self.tol / e2).powf(K_I) * (e0 * e0 / (e1 * e2)).powf(K_D)
    }
}

/// PID control that also shortens steps needing more than `target` Newton iterations.
#[derive(Clone, Debug, PartialEq)]
pub struct PidAndIterationControl {
    pid: PidControl,
    target: usize,
}

impl PidAndIterationControl {
    pub fn new(tol: f64, target: usize) -> Self {
        PidAndIterationControl {
            pid: PidControl::new(tol),
            target,
        }
    }
}

impl TimeStepControl for PidAndIterationControl {
    fn compute(&mut self, dt: f64, iterations: usize, relative_change: f64) -> f64 {
        let estimate = self.pid.compute(dt, iterations, relative_change);
        if iterations > self.target {
            estimate.min(dt * self.target as f64 / iterations as f64)
        } else {
            estimate
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_large_error_shrinks_proportionally() {
        let mut pid = PidControl::new(0.1);
        assert_relative_eq!(pid.compute(10.0, 3, 0.4), 2.5, max_relative = 1e-12);
    }

    #[test]
    fn test_small_error_grows() {
        let mut pid = PidControl::new(0.1);
        let dt = pid.compute(10.0, 3, 0.05);
        let expected = 10.0 * 2.0f64.powf(K_P) * 2.0f64.powf(K_I) * 2.0f64.powf(K_D);
        assert_relative_eq!(dt, expected, max_relative = 1e-12);
        assert!(dt > 10.0);
    }

    #[test]
    fn test_zero_change_is_unbounded() {
        let mut pid = PidControl::new(0.1);
        assert_eq!(pid.compute(10.0, 1, 0.0), f64::INFINITY);
    }

    #[test]
    fn test_iteration_cap() {
        let mut ctrl = PidAndIterationControl::new(0.1, 5);
        assert_relative_eq!(ctrl.compute(10.0, 10, 0.05), 5.0, max_relative = 1e-12);
        let mut ctrl = PidAndIterationControl::new(0.1, 5);
        assert!(ctrl.compute(10.0, 4, 0.05) > 10.0);
    }
}
