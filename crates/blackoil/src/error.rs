use thiserror::Error;

use crate::phases::Phase;

#[derive(Debug, Error)]
pub enum Error {
    // Unrecoverable
    #[error(transparent)]
    Shape(#[from] ad::Error),

    #[error("Phase {0} is not active")]
    PhaseNotPresent(Phase),

    // Recoverable
    /// non-finite or excessive residuals
    #[error("Numerical problem: {0}")]
    NumericalProblem(String),

    /// the Krylov solver (or a factorization inside it) failed
    #[error("Linear solver failed: {0}")]
    LinearConvergenceFailure(#[source] linear::Error),

    /// the Newton iteration did not converge
    #[error(transparent)]
    Nonlinear(nonlinear::Error),

    // Unrecoverable
    #[error("Linear algebra error: {0}")]
    Linear(#[source] linear::Error),

    #[error("Well {well}: {reason}")]
    WellControlInfeasible { well: String, reason: String },

    #[error("Report step {report_step}: time step aborted at t = {time:.6e} s after {restarts} restarts ({reason})")]
    TimestepAbort {
        report_step: usize,
        time: f64,
        restarts: usize,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid geology: {0}")]
    Geology(String),

    #[error("Invalid property input: {0}")]
    Props(String),

    #[error("Output failed: {0}")]
    Output(String),
}

impl Error {
    /// Failures the adaptive driver recovers from by retrying with a shorter step.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::NumericalProblem(_) | Error::LinearConvergenceFailure(_) => true,
            Error::Nonlinear(e) => matches!(e, nonlinear::Error::ConvergenceRecover { .. }),
            _ => false,
        }
    }
}

impl From<linear::Error> for Error {
    fn from(e: linear::Error) -> Self {
        if e.is_convergence_failure() {
            Error::LinearConvergenceFailure(e)
        } else {
            Error::Linear(e)
        }
    }
}

impl From<nonlinear::Error> for Error {
    fn from(e: nonlinear::Error) -> Self {
        match e {
            nonlinear::Error::Linear(e) => e.into(),
            e => Error::Nonlinear(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(Error::NumericalProblem("nan".into()).is_recoverable());
        assert!(Error::from(nonlinear::Error::ConvergenceRecover { iterations: 3 }).is_recoverable());
        let lin = linear::Error::ConvergenceFailure {
            iterations: 150,
            residual: 0.5,
        };
        assert!(matches!(
            Error::from(nonlinear::Error::Linear(lin)),
            Error::LinearConvergenceFailure(_)
        ));
        assert!(!Error::from(linear::Error::DimensionMismatch {
            expected: 1,
            found: 2
        })
        .is_recoverable());
        assert!(!Error::PhaseNotPresent(Phase::Gas).is_recoverable());
        assert!(!Error::WellControlInfeasible {
            well: "P1".into(),
            reason: "no controls".into()
        }
        .is_recoverable());
    }
}
