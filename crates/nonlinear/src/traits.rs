use nalgebra::DVector;

use crate::Error;

/// Outcome of a convergence test.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Convergence {
    pub converged: bool,
    /// One residual measure per equation kind (phase), used to detect oscillations.
    pub residual_norms: Vec<f64>,
}

pub trait NLProblem {
    /// Error type of the problem. Solver failures are converted into it.
    type Error: From<Error>;

    /// `sys` assembles the residual `F(x)` and its Jacobian at the current iterate.
    ///
    /// # Arguments
    ///
    /// * `iteration` is the index of the Newton iteration within the current solve.
    fn sys(&mut self, iteration: usize) -> Result<(), Self::Error>;

    /// `ctest` evaluates the convergence of the last assembled residual.
    ///
    /// # Returns
    ///
    /// * `Ok(Convergence)` with `converged` set when the iterate is accepted.
    /// * `Err(_)` for a numerical problem (non-finite or excessive residuals).
    fn ctest<NLS>(&mut self, solver: &NLS) -> Result<Convergence, Self::Error>
    where
        NLS: NLSolver;

    /// `solve` solves the linear system `J Δx = F` for the Newton increment.
    fn solve(&mut self) -> Result<DVector<f64>, Self::Error>;

    /// `update` applies `x ← x − Δx` to the iterate, including any chopping and variable
    /// switching the problem requires.
    fn update(&mut self, dx: &DVector<f64>) -> Result<(), Self::Error>;

    /// Number of linear iterations spent in the last `solve` call.
    fn num_linear_iters(&self) -> usize {
        0
    }
}

pub trait NLSolver {
    /// Solves the nonlinear system `F(x) = 0` starting from the problem's current iterate.
    ///
    /// # Errors
    ///
    /// * `Err(Error::ConvergenceRecover)` (converted into the problem's error) when the maximum
    ///     number of iterations is exceeded.
    /// * any error raised by the problem.
    fn solve<NLP>(&mut self, problem: &mut NLP) -> Result<(), NLP::Error>
    where
        NLP: NLProblem,
        Self: std::marker::Sized;

    /// get the total number of nonlinear iterations
    fn get_num_iters(&self) -> usize {
        0
    }

    /// get the iteration count for the current nonlinear solve
    fn get_cur_iter(&self) -> usize;

    /// get the total number of nonlinear solve convergence failures
    fn get_num_conv_fails(&self) -> usize;
}
