//! Newton-Raphson solver for fully-implicit residual systems.

use thiserror::Error;

pub mod newton;
pub mod relaxation;
pub mod traits;

pub use newton::{Newton, NewtonOptions, NewtonReport};
pub use relaxation::{detect_oscillations, stabilize, RelaxType};
pub use traits::*;

#[derive(Debug, Error)]
pub enum Error {
    // Recoverable
    /// convergence failure, try to recover with a shorter step
    #[error("Newton iteration did not converge in {iterations} iterations")]
    ConvergenceRecover { iterations: usize },

    // Unrecoverable
    /// illegal solver input
    #[error("Illegal input: {0}")]
    IllegalInput(String),

    #[error(transparent)]
    Linear(#[from] linear::Error),
}
