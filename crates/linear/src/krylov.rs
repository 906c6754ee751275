//! Right-preconditioned Krylov methods.
//!
//! Both methods stop on the relative reduction `‖r‖ / ‖r₀‖ < tol` of the true (unpreconditioned)
//! residual. All reductions go through the [`Communicator`], so only owned unknowns count.

use nalgebra::{DMatrix, DVector};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{Communicator, Error, LinearOperator, Preconditioner};

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct KrylovOptions {
    /// relative residual reduction
    pub tol: f64,
    pub max_iter: usize,
    /// GMRES restart length
    pub restart: usize,
    pub verbosity: usize,
    /// unknowns per cell, for owner masking
    pub block: usize,
}

impl Default for KrylovOptions {
    fn default() -> Self {
        KrylovOptions {
            tol: 1e-2,
            max_iter: 150,
            restart: 40,
            verbosity: 0,
            block: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KrylovResult {
    pub iterations: usize,
    /// final relative residual
    pub residual: f64,
}

fn report(opts: &KrylovOptions, name: &str, it: usize, res: f64) {
    if opts.verbosity > 0 {
        log::debug!("{name} iteration {it}: relative residual {res:.4e}");
    } else {
        log::trace!("{name} iteration {it}: relative residual {res:.4e}");
    }
}

pub fn bicgstab<A, M>(
    a: &A,
    m: &M,
    b: &DVector<f64>,
    x: &mut DVector<f64>,
    opts: &KrylovOptions,
    comm: &dyn Communicator,
) -> Result<KrylovResult, Error>
where
    A: LinearOperator + ?Sized,
    M: Preconditioner + ?Sized,
{
    let n = b.len();
    let bs = opts.block;
    let mut ax = DVector::zeros(n);
    a.apply(x, &mut ax);
    let mut r = b - &ax;
    let r0_norm = comm.norm(&r, bs);
    if r0_norm == 0.0 {
        return Ok(KrylovResult {
            iterations: 0,
            residual: 0.0,
        });
    }
    let r_hat = r.clone();

    let mut p = DVector::zeros(n);
    let mut v = DVector::zeros(n);
    let mut p_hat = DVector::zeros(n);
    let mut s_hat = DVector::zeros(n);
    let mut t = DVector::zeros(n);
    let (mut rho_old, mut alpha, mut omega) = (1.0, 1.0, 1.0);
    let mut res = 1.0;

    for it in 1..=opts.max_iter {
        let rho = comm.dot(&r_hat, &r, bs);
        if rho == 0.0 || !rho.is_finite() {
            return Err(Error::Breakdown { iteration: it });
        }
        if it == 1 {
            p.copy_from(&r);
        } else {
            let beta = (rho / rho_old) * (alpha / omega);
            p = &r + (&p - &v * omega) * beta;
        }

        m.apply(&p, &mut p_hat);
        a.apply(&p_hat, &mut v);
        let rv = comm.dot(&r_hat, &v, bs);
        if rv == 0.0 {
            return Err(Error::Breakdown { iteration: it });
        }
        alpha = rho / rv;

        let s = &r - &v * alpha;
        let s_norm = comm.norm(&s, bs);
        if s_norm / r0_norm < opts.tol {
            x.axpy(alpha, &p_hat, 1.0);
            report(opts, "bicgstab", it, s_norm / r0_norm);
            return Ok(KrylovResult {
                iterations: it,
                residual: s_norm / r0_norm,
            });
        }

        m.apply(&s, &mut s_hat);
        a.apply(&s_hat, &mut t);
        let tt = comm.dot(&t, &t, bs);
        if tt == 0.0 {
            return Err(Error::Breakdown { iteration: it });
        }
        omega = comm.dot(&t, &s, bs) / tt;

        x.axpy(alpha, &p_hat, 1.0);
        x.axpy(omega, &s_hat, 1.0);
        r = s - &t * omega;

        res = comm.norm(&r, bs) / r0_norm;
        report(opts, "bicgstab", it, res);
        if !res.is_finite() {
            return Err(Error::Breakdown { iteration: it });
        }
        if res < opts.tol {
            return Ok(KrylovResult {
                iterations: it,
                residual: res,
            });
        }
        if omega == 0.0 {
            return Err(Error::Breakdown { iteration: it });
        }
        rho_old = rho;
    }

    Err(Error::ConvergenceFailure {
        iterations: opts.max_iter,
        residual: res,
    })
}

/// Restarted GMRES(m) with Givens rotations.
pub fn gmres<A, M>(
    a: &A,
    m: &M,
    b: &DVector<f64>,
    x: &mut DVector<f64>,
    opts: &KrylovOptions,
    comm: &dyn Communicator,
) -> Result<KrylovResult, Error>
where
    A: LinearOperator + ?Sized,
    M: Preconditioner + ?Sized,
{
    let n = b.len();
    let bs = opts.block;
    let restart = opts.restart.max(1);
    let mut w = DVector::zeros(n);

    a.apply(x, &mut w);
    let r0_norm = comm.norm(&(b - &w), bs);
    if r0_norm == 0.0 {
        return Ok(KrylovResult {
            iterations: 0,
            residual: 0.0,
        });
    }

    let mut total = 0;
    let mut res = 1.0;
    while total < opts.max_iter {
        a.apply(x, &mut w);
        let r = b - &w;
        let beta = comm.norm(&r, bs);
        res = beta / r0_norm;
        if res < opts.tol {
            break;
        }

        let mut basis: Vec<DVector<f64>> = vec![r / beta];
        let mut precond: Vec<DVector<f64>> = Vec::with_capacity(restart);
        let mut h = DMatrix::zeros(restart + 1, restart);
        let mut g = DVector::zeros(restart + 1);
        let mut cs = vec![0.0; restart];
        let mut sn = vec![0.0; restart];
        g[0] = beta;

        let mut k = 0;
        while k < restart && total < opts.max_iter {
            total += 1;
            let mut z = DVector::zeros(n);
            m.apply(&basis[k], &mut z);
            a.apply(&z, &mut w);
            precond.push(z);

            // modified Gram-Schmidt
            for (i, vi) in basis.iter().enumerate() {
                let hik = comm.dot(&w, vi, bs);
                h[(i, k)] = hik;
                w.axpy(-hik, vi, 1.0);
            }
            let h_next = comm.norm(&w, bs);
            h[(k + 1, k)] = h_next;

            for i in 0..k {
                let tmp = cs[i] * h[(i, k)] + sn[i] * h[(i + 1, k)];
                h[(i + 1, k)] = -sn[i] * h[(i, k)] + cs[i] * h[(i + 1, k)];
                h[(i, k)] = tmp;
            }
            let denom = h[(k, k)].hypot(h[(k + 1, k)]);
            if denom == 0.0 {
                return Err(Error::Breakdown { iteration: total });
            }
            cs[k] = h[(k, k)] / denom;
            sn[k] = h[(k + 1, k)] / denom;
            h[(k, k)] = denom;
            h[(k + 1, k)] = 0.0;
            g[k + 1] = -sn[k] * g[k];
            g[k] *= cs[k];

            k += 1;
            res = g[k].abs() / r0_norm;
            report(opts, "gmres", total, res);
            if res < opts.tol || h_next == 0.0 {
                break;
            }
            basis.push(&w / h_next);
        }

        // back substitution for the k×k triangular system
        let mut y = DVector::zeros(k);
        for i in (0..k).rev() {
            let mut s = g[i];
            for j in (i + 1)..k {
                s -= h[(i, j)] * y[j];
            }
            y[i] = s / h[(i, i)];
        }
        for (i, zi) in precond.iter().enumerate().take(k) {
            x.axpy(y[i], zi, 1.0);
        }
        if !res.is_finite() {
            return Err(Error::Breakdown { iteration: total });
        }
        if res < opts.tol {
            return Ok(KrylovResult {
                iterations: total,
                residual: res,
            });
        }
    }

    if res < opts.tol {
        return Ok(KrylovResult {
            iterations: total,
            residual: res,
        });
    }
    Err(Error::ConvergenceFailure {
        iterations: total,
        residual: res,
    })
}
