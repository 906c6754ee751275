use std::sync::Arc;

use nalgebra::DVector;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{
    bicgstab, gmres,
    interleave::{deinterleave_vec, interleave_vec, make_first_row_elliptic},
    Amg, AmgOptions, BlockCsrMatrix, BlockIlu0, Communicator, Cpr, Error, KrylovOptions,
    LSolver, LinearSystem,
};

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct LinearSolverOptions {
    /// required relative residual reduction
    pub reduction: f64,
    pub max_iter: usize,
    pub restart: usize,
    pub verbosity: usize,
    /// restarted GMRES instead of BiCGStab
    pub use_gmres: bool,
    /// CPR with an AMG pressure stage instead of plain block ILU(0)
    pub use_amg: bool,
    pub amg: AmgOptions,
}

impl Default for LinearSolverOptions {
    fn default() -> Self {
        LinearSolverOptions {
            reduction: 1e-2,
            max_iter: 150,
            restart: 40,
            verbosity: 0,
            use_gmres: false,
            use_amg: true,
            amg: AmgOptions::default(),
        }
    }
}

/// Preconditioned Krylov solver for an interleaved block matrix.
pub struct IterativeSolver {
    opts: LinearSolverOptions,
    comm: Arc<dyn Communicator>,
    ilu: Option<BlockIlu0>,
    amg: Option<Amg>,
    iterations: usize,
    residual: f64,
}

impl IterativeSolver {
    pub fn new(opts: LinearSolverOptions, comm: Arc<dyn Communicator>) -> Self {
        IterativeSolver {
            opts,
            comm,
            ilu: None,
            amg: None,
            iterations: 0,
            residual: 0.0,
        }
    }
}

impl LSolver for IterativeSolver {
    fn setup(&mut self, mat_a: &BlockCsrMatrix) -> Result<(), Error> {
        self.ilu = Some(BlockIlu0::new(mat_a)?);
        self.amg = if self.opts.use_amg {
            Some(Amg::new(&mat_a.component_matrix(0, 0), &self.opts.amg)?)
        } else {
            None
        };
        Ok(())
    }

    fn solve(
        &mut self,
        mat_a: &BlockCsrMatrix,
        x: &mut DVector<f64>,
        b: &DVector<f64>,
        tol: f64,
    ) -> Result<(), Error> {
        let Some(ilu) = self.ilu.as_ref() else {
            self.setup(mat_a)?;
            return self.solve(mat_a, x, b, tol);
        };
        let precond = Cpr::new(mat_a, self.amg.as_ref(), ilu);
        let kopts = KrylovOptions {
            tol,
            max_iter: self.opts.max_iter,
            restart: self.opts.restart,
            verbosity: self.opts.verbosity,
            block: mat_a.block_size(),
        };
        let comm = self.comm.as_ref();
        let result = if self.opts.use_gmres {
            gmres(mat_a, &precond, b, x, &kopts, comm)
        } else {
            bicgstab(mat_a, &precond, b, x, &kopts, comm)
        };
        match result {
            Ok(res) => {
                self.iterations = res.iterations;
                self.residual = res.residual;
                Ok(())
            }
            Err(err) => {
                if let Error::ConvergenceFailure {
                    iterations,
                    residual,
                } = err
                {
                    self.iterations = iterations;
                    self.residual = residual;
                }
                Err(err)
            }
        }
    }

    fn num_iters(&self) -> usize {
        self.iterations
    }

    fn res_norm(&self) -> f64 {
        self.residual
    }
}

/// Solves a full Newton system: eliminates the wells, solves the interleaved cell system with the
/// [`IterativeSolver`] and recovers the well increments.
pub struct SystemSolver {
    inner: IterativeSolver,
}

impl SystemSolver {
    pub fn new(opts: LinearSolverOptions, comm: Arc<dyn Communicator>) -> Self {
        SystemSolver {
            inner: IterativeSolver::new(opts, comm),
        }
    }

    pub fn options(&self) -> &LinearSolverOptions {
        &self.inner.opts
    }

    /// Returns `[Δx_c; Δx_w]` with `J [Δx_c; Δx_w] = r`, cell unknowns in variable-major order.
    pub fn solve(&mut self, sys: &LinearSystem) -> Result<DVector<f64>, Error> {
        let n = sys.num_cells();
        let bs = sys.block_size();
        let (elim, s, rhs) = sys.eliminate_wells()?;

        let mut a = BlockCsrMatrix::from_variable_major(&s, n, bs)?;
        let mut b = interleave_vec(&rhs, n, bs);
        let replaced = make_first_row_elliptic(&mut a, &mut b);
        if replaced > 0 {
            log::trace!("{replaced} pressure rows replaced by the sum of the cell equations");
        }

        let mut y = DVector::zeros(n * bs);
        self.inner.setup(&a)?;
        let tol = self.inner.opts.reduction;
        self.inner.solve(&a, &mut y, &b, tol)?;
        log::debug!(
            "linear solve: {} iterations, relative residual {:.3e}",
            self.inner.num_iters(),
            self.inner.res_norm()
        );

        let dx_c = deinterleave_vec(&y, n, bs);
        let dx_w = elim.recover(&dx_c);
        let mut dx = DVector::zeros(dx_c.len() + dx_w.len());
        dx.rows_mut(0, dx_c.len()).copy_from(&dx_c);
        dx.rows_mut(dx_c.len(), dx_w.len()).copy_from(&dx_w);
        Ok(dx)
    }

    pub fn iterations(&self) -> usize {
        self.inner.num_iters()
    }
}
