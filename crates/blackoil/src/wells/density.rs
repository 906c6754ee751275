//! Hydrostatic pressure drops between the bottom-hole reference depth and each connection.

use nalgebra::DVector;

use super::Wells;
use crate::phases::{Phase, PhaseUsage};

/// Fluid properties at the perforated cells, canonical phase order, one entry per perforation.
pub struct PerfFluid<'a> {
    pub b: &'a [DVector<f64>; 3],
    pub rs: &'a DVector<f64>,
    pub rv: &'a DVector<f64>,
    pub surface_density: &'a [DVector<f64>; 3],
    /// mixture density of the perforated cell, used where nothing flows
    pub cell_density: &'a DVector<f64>,
}

/// Density of a surface rate mix at the reservoir conditions of perforation `k`.
fn mix_density(pu: &PhaseUsage, q: &[f64; 3], fluid: &PerfFluid, k: usize) -> Option<f64> {
    let (w, o, g) = (Phase::Water.index(), Phase::Oil.index(), Phase::Gas.index());
    let mass: f64 = (0..3).map(|p| q[p] * fluid.surface_density[p][k]).sum();
    let mut volume = 0.0;
    if pu.is_active(Phase::Water) {
        volume += q[w] / fluid.b[w][k];
    }
    let (rs, rv) = (fluid.rs[k], fluid.rv[k]);
    let d = 1.0 - rs * rv;
    if pu.is_active(Phase::Oil) {
        volume += (q[o] - rv * q[g]) / (d * fluid.b[o][k]);
    }
    if pu.is_active(Phase::Gas) {
        volume += (q[g] - rs * q[o]) / (d * fluid.b[g][k]);
    }
    let rho = mass / volume;
    (rho.is_finite() && rho > 0.0).then_some(rho)
}

/// Pressure drop from the reference depth to every connection, `Δp_k` such that the
/// connection pressure is `bhp + Δp_k`.
///
/// The well-bore mixture density at a connection is taken from the cumulative flow through it
/// (the connection itself and everything deeper); a segment between two connections uses the
/// average of their densities. `perf_rates` are production positive surface rates, phase-major
/// over the active phases.
pub fn connection_pressure_drops(
    wells: &Wells,
    pu: &PhaseUsage,
    perf_rates: &DVector<f64>,
    fluid: &PerfFluid,
    gravity: f64,
) -> DVector<f64> {
    let nperf = wells.num_perforations();
    let mut cdp = DVector::zeros(nperf);
    let depth = wells.perf_depth();
    for (w, spec) in wells.specs().iter().enumerate() {
        let mut perfs: Vec<usize> = wells.perf_range(w).collect();
        perfs.sort_by(|&a, &b| depth[a].total_cmp(&depth[b]));

        let mut rho = vec![0.0; perfs.len()];
        let mut cumulative = [0.0; 3];
        for (i, &k) in perfs.iter().enumerate().rev() {
            for p in Phase::ALL {
                if let Some(pos) = pu.pos(p) {
                    cumulative[p.index()] += perf_rates[pos * nperf + k];
                }
            }
            let fallback = if spec.is_injector() {
                mix_density(pu, &spec.injection_composition, fluid, k)
            } else {
                None
            };
            rho[i] = mix_density(pu, &cumulative, fluid, k)
                .or(fallback)
                .unwrap_or(fluid.cell_density[k]);
        }

        let mut prev: Option<(f64, f64, f64)> = None;
        for (i, &k) in perfs.iter().enumerate() {
            let dp = match prev {
                None => rho[i] * gravity * (depth[k] - spec.ref_depth),
                Some((dp0, rho0, z0)) => dp0 + 0.5 * (rho0 + rho[i]) * gravity * (depth[k] - z0),
            };
            cdp[k] = dp;
            prev = Some((dp, rho[i], depth[k]));
        }
    }
    cdp
}
