use nalgebra::DVector;

use crate::{Amg, BlockCsrMatrix, BlockIlu0, LinearOperator, Preconditioner};

/// Two-stage Constrained Pressure Residual preconditioner.
///
/// The first stage solves the pressure equations (entry `(0, 0)` of every block) approximately
/// with one AMG V-cycle. The second stage applies block ILU(0) to the residual left by the
/// pressure correction. Without an AMG stage this is plain block ILU(0).
pub struct Cpr<'a> {
    a: &'a BlockCsrMatrix,
    amg: Option<&'a Amg>,
    ilu: &'a BlockIlu0,
}

impl<'a> Cpr<'a> {
    pub fn new(a: &'a BlockCsrMatrix, amg: Option<&'a Amg>, ilu: &'a BlockIlu0) -> Self {
        Cpr { a, amg, ilu }
    }
}

impl Preconditioner for Cpr<'_> {
    fn apply(&self, r: &DVector<f64>, z: &mut DVector<f64>) {
        let Some(amg) = self.amg else {
            self.ilu.apply(r, z);
            return;
        };
        let bs = self.a.block_size();
        let n = self.a.num_block_rows();

        let rp = DVector::from_fn(n, |i, _| r[i * bs]);
        let mut xp = DVector::zeros(n);
        amg.apply(&rp, &mut xp);

        let mut x = DVector::zeros(n * bs);
        for i in 0..n {
            x[i * bs] = xp[i];
        }

        let mut ax = DVector::zeros(n * bs);
        self.a.apply(&x, &mut ax);
        let r2 = r - ax;
        self.ilu.apply(&r2, z);
        *z += x;
    }
}
