use nalgebra::DVector;
use nalgebra_sparse::csr::CsrMatrix;

use crate::{BlockCsrMatrix, Error};

/// Anything that can compute `y = A x`.
pub trait LinearOperator: Sync {
    fn nrows(&self) -> usize;

    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>);
}

/// An approximate inverse `z ≈ A⁻¹ r`.
pub trait Preconditioner {
    fn apply(&self, r: &DVector<f64>, z: &mut DVector<f64>);
}

pub trait LSolver {
    /// Performs any linear solver setup needed, based on an updated system matrix A. With a full
    /// Newton method this is called once per nonlinear iteration.
    fn setup(&mut self, mat_a: &BlockCsrMatrix) -> Result<(), Error>;

    /// solves a linear system Ax = b.
    ///
    /// ## Arguments
    /// * `mat_a` the matrix A.
    /// * `x` the initial guess for the solution of the linear system, and the solution to the linear system upon return.
    /// * `b` the linear system right-hand side.
    /// * `tol` the desired relative residual reduction.
    fn solve(
        &mut self,
        mat_a: &BlockCsrMatrix,
        x: &mut DVector<f64>,
        b: &DVector<f64>,
        tol: f64,
    ) -> Result<(), Error>;

    /// should return the number of linear iterations performed in the last ‘solve’ call.
    fn num_iters(&self) -> usize {
        0
    }

    /// should return the final relative residual norm from the last ‘solve’ call.
    fn res_norm(&self) -> f64 {
        0.0
    }
}

impl LinearOperator for CsrMatrix<f64> {
    fn nrows(&self) -> usize {
        CsrMatrix::nrows(self)
    }

    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        y.copy_from(&(self * x));
    }
}

/// The identity preconditioner.
pub struct NoPreconditioner;

impl Preconditioner for NoPreconditioner {
    fn apply(&self, r: &DVector<f64>, z: &mut DVector<f64>) {
        z.copy_from(r);
    }
}
