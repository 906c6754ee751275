//! Smoothed-aggregation algebraic multigrid for the pressure equation.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{coo::CooMatrix, csr::CsrMatrix};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{Dense, Error, Preconditioner};

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct AmgOptions {
    /// strength-of-connection threshold
    pub strength_threshold: f64,
    /// levels at or below this size are solved directly
    pub coarse_size: usize,
    pub max_levels: usize,
    /// Jacobi damping of the prolongation smoother
    pub prolongation_damping: f64,
    /// symmetric Gauss-Seidel sweeps before and after coarse correction
    pub smoothing_steps: usize,
}

impl Default for AmgOptions {
    fn default() -> Self {
        AmgOptions {
            strength_threshold: 0.08,
            coarse_size: 50,
            max_levels: 10,
            prolongation_damping: 2.0 / 3.0,
            smoothing_steps: 1,
        }
    }
}

#[derive(Clone, Debug)]
struct Level {
    a: CsrMatrix<f64>,
    /// prolongation from the next coarser level
    p: CsrMatrix<f64>,
    r: CsrMatrix<f64>,
    diag: DVector<f64>,
}

/// A V-cycle hierarchy built once per linear system.
#[derive(Clone, Debug)]
pub struct Amg {
    levels: Vec<Level>,
    coarse: Dense,
    smoothing_steps: usize,
}

impl Amg {
    pub fn new(a: &CsrMatrix<f64>, opts: &AmgOptions) -> Result<Self, Error> {
        let mut levels = Vec::new();
        let mut current = a.clone();

        while current.nrows() > opts.coarse_size && levels.len() + 1 < opts.max_levels {
            let diag = diagonal(&current)?;
            let strong = strong_connections(&current, &diag, opts.strength_threshold);
            let (aggregates, num_aggregates) = aggregate(&strong);
            if num_aggregates == 0 || num_aggregates >= current.nrows() {
                break;
            }
            let p = smoothed_prolongation(
                &current,
                &diag,
                &aggregates,
                num_aggregates,
                opts.prolongation_damping,
            );
            let r = p.transpose();
            let coarse = &(&r * &current) * &p;
            log::trace!(
                "amg level {}: {} -> {} unknowns",
                levels.len(),
                current.nrows(),
                coarse.nrows()
            );
            levels.push(Level {
                a: current,
                p,
                r,
                diag,
            });
            current = coarse;
        }

        let coarse = Dense::factor(DMatrix::from(&current))?;
        Ok(Amg {
            levels,
            coarse,
            smoothing_steps: opts.smoothing_steps,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len() + 1
    }

    fn cycle(&self, level: usize, b: &DVector<f64>) -> DVector<f64> {
        if level == self.levels.len() {
            return self.coarse.solve(b);
        }
        let lvl = &self.levels[level];
        let mut x = DVector::zeros(b.len());
        for _ in 0..self.smoothing_steps {
            symmetric_gauss_seidel(&lvl.a, &lvl.diag, b, &mut x);
        }
        let r = b - &lvl.a * &x;
        let e = self.cycle(level + 1, &(&lvl.r * &r));
        x += &lvl.p * &e;
        for _ in 0..self.smoothing_steps {
            symmetric_gauss_seidel(&lvl.a, &lvl.diag, b, &mut x);
        }
        x
    }
}

impl Preconditioner for Amg {
    fn apply(&self, r: &DVector<f64>, z: &mut DVector<f64>) {
        z.copy_from(&self.cycle(0, r));
    }
}

fn diagonal(a: &CsrMatrix<f64>) -> Result<DVector<f64>, Error> {
    let (offsets, cols, vals) = a.csr_data();
    let mut d = DVector::zeros(a.nrows());
    for i in 0..a.nrows() {
        for k in offsets[i]..offsets[i + 1] {
            if cols[k] == i {
                d[i] += vals[k];
            }
        }
        if d[i] == 0.0 {
            return Err(Error::ZeroDiagonal { row: i });
        }
    }
    Ok(d)
}

/// `j` is a strong neighbour of `i` if `|a_ij| >= θ sqrt(|a_ii a_jj|)`.
fn strong_connections(a: &CsrMatrix<f64>, diag: &DVector<f64>, theta: f64) -> Vec<Vec<usize>> {
    let (offsets, cols, vals) = a.csr_data();
    (0..a.nrows())
        .map(|i| {
            (offsets[i]..offsets[i + 1])
                .filter(|&k| {
                    let j = cols[k];
                    j != i && vals[k].abs() >= theta * (diag[i] * diag[j]).abs().sqrt()
                })
                .map(|k| cols[k])
                .collect()
        })
        .collect()
}

/// Greedy three-pass aggregation. Returns the aggregate of every node and the aggregate count.
fn aggregate(strong: &[Vec<usize>]) -> (Vec<usize>, usize) {
    const NONE: usize = usize::MAX;
    let n = strong.len();
    let mut agg = vec![NONE; n];
    let mut count = 0;

    // 1. seed aggregates from nodes whose whole neighbourhood is free
    for i in 0..n {
        if agg[i] == NONE && strong[i].iter().all(|&j| agg[j] == NONE) {
            agg[i] = count;
            for &j in &strong[i] {
                agg[j] = count;
            }
            count += 1;
        }
    }

    // 2. attach leftovers to a neighbouring aggregate
    let snapshot = agg.clone();
    for i in 0..n {
        if agg[i] == NONE {
            if let Some(&j) = strong[i].iter().find(|&&j| snapshot[j] != NONE) {
                agg[i] = snapshot[j];
            }
        }
    }

    // 3. whatever is still free forms new aggregates with its free neighbours
    for i in 0..n {
        if agg[i] == NONE {
            agg[i] = count;
            for &j in &strong[i] {
                if agg[j] == NONE {
                    agg[j] = count;
                }
            }
            count += 1;
        }
    }

    (agg, count)
}

/// `P = (I − ω D⁻¹ A) P₀` with `P₀` the normalized piecewise-constant aggregate basis.
fn smoothed_prolongation(
    a: &CsrMatrix<f64>,
    diag: &DVector<f64>,
    aggregates: &[usize],
    num_aggregates: usize,
    omega: f64,
) -> CsrMatrix<f64> {
    let n = a.nrows();
    let mut sizes = vec![0usize; num_aggregates];
    for &g in aggregates {
        sizes[g] += 1;
    }

    let mut p0 = CooMatrix::new(n, num_aggregates);
    for (i, &g) in aggregates.iter().enumerate() {
        p0.push(i, g, 1.0 / (sizes[g] as f64).sqrt());
    }
    let p0 = CsrMatrix::from(&p0);

    let mut smoother = CooMatrix::new(n, n);
    let (offsets, cols, vals) = a.csr_data();
    for i in 0..n {
        smoother.push(i, i, 1.0);
        for k in offsets[i]..offsets[i + 1] {
            smoother.push(i, cols[k], -omega * vals[k] / diag[i]);
        }
    }
    &CsrMatrix::from(&smoother) * &p0
}

fn symmetric_gauss_seidel(
    a: &CsrMatrix<f64>,
    diag: &DVector<f64>,
    b: &DVector<f64>,
    x: &mut DVector<f64>,
) {
    let (offsets, cols, vals) = a.csr_data();
    let sweep = |i: usize, x: &mut DVector<f64>| {
        let mut s = b[i];
        for k in offsets[i]..offsets[i + 1] {
            if cols[k] != i {
                s -= vals[k] * x[cols[k]];
            }
        }
        x[i] = s / diag[i];
    };
    for i in 0..a.nrows() {
        sweep(i, x);
    }
    for i in (0..a.nrows()).rev() {
        sweep(i, x);
    }
}
