//! Linear solvers for the block systems produced by a Newton step of the black-oil model.
//!
//! The pipeline is: eliminate the well unknowns ([`LinearSystem::eliminate_wells`]), permute
//! the remaining cell system into a [`BlockCsrMatrix`] with one dense block per cell pair
//! ([`interleave`]), precondition with [`Cpr`] (AMG on the pressure equation followed by block
//! ILU(0)) and iterate with BiCGStab or restarted GMRES.

mod amg;
mod block_csr;
mod comm;
mod cpr;
mod dense;
mod ilu;
pub mod interleave;
mod krylov;
mod schur;
mod solver;
mod system;
mod traits;

pub use amg::{Amg, AmgOptions};
pub use block_csr::BlockCsrMatrix;
pub use comm::{Communicator, SerialCommunicator};
pub use cpr::Cpr;
pub use dense::Dense;
pub use ilu::BlockIlu0;
pub use krylov::{bicgstab, gmres, KrylovOptions, KrylovResult};
pub use schur::WellElimination;
pub use solver::{IterativeSolver, LinearSolverOptions, SystemSolver};
pub use system::LinearSystem;
pub use traits::{LSolver, LinearOperator, NoPreconditioner, Preconditioner};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("A singular matrix was encountered during a LU factorization (col {col})")]
    LUFactFail { col: usize },

    #[error("Singular diagonal block in block row {row}")]
    SingularBlock { row: usize },

    #[error("Zero diagonal entry in row {row}")]
    ZeroDiagonal { row: usize },

    #[error("Krylov solver did not converge in {iterations} iterations (relative residual {residual:.3e})")]
    ConvergenceFailure { iterations: usize, residual: f64 },

    #[error("Krylov solver broke down at iteration {iteration}")]
    Breakdown { iteration: usize },

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error(transparent)]
    Ad(#[from] ad::Error),
}

impl Error {
    /// Failures of the iteration itself, as opposed to malformed input.
    pub fn is_convergence_failure(&self) -> bool {
        matches!(
            self,
            Error::ConvergenceFailure { .. }
                | Error::Breakdown { .. }
                | Error::SingularBlock { .. }
                | Error::LUFactFail { .. }
                | Error::ZeroDiagonal { .. }
        )
    }
}
