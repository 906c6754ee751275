//! Perforation inflow and the well equations as AD expressions.
//!
//! The same functions serve the coupled assembly (reservoir quantities carry Jacobians) and
//! the well-only pre-solve (reservoir quantities are constants).

use ad::{select, vertcat_all, AdMatrix, AutoDiffBlock};
use nalgebra::DVector;

use super::{ControlKind, Wells};
use crate::{
    phases::{Phase, PhaseUsage},
    state::WellState,
    Error,
};

type Adb = AutoDiffBlock;

/// Reservoir quantities at the perforations, per active phase position.
pub struct PerfInputs {
    /// reference pressure of the perforated cells
    pub p: Adb,
    pub mob: Vec<Adb>,
    pub b: Vec<Adb>,
    pub rs: Adb,
    pub rv: Adb,
}

/// Surface volume fractions of the well-bore mixture entering injecting connections, per
/// active phase position and perforation.
pub fn wellbore_mix(wells: &Wells, pu: &PhaseUsage, ws: &WellState) -> Vec<DVector<f64>> {
    let np = pu.num_phases();
    let nperf = wells.num_perforations();
    let phases = pu.active_phases();
    let mut mix = vec![DVector::zeros(nperf); np];
    for (w, spec) in wells.specs().iter().enumerate() {
        let mut frac: Vec<f64> = if spec.is_injector() {
            phases
                .iter()
                .map(|p| spec.injection_composition[p.index()])
                .collect()
        } else {
            (0..np).map(|i| ws.rate(i, w).abs()).collect()
        };
        let total: f64 = frac.iter().sum();
        if total > 0.0 {
            frac.iter_mut().for_each(|f| *f /= total);
        } else {
            frac.iter_mut().for_each(|f| *f = 1.0 / np as f64);
        }
        for k in wells.perf_range(w) {
            for i in 0..np {
                mix[i][k] = frac[i];
            }
        }
    }
    mix
}

/// Surface rates per active phase and perforation, production positive.
///
/// A connection whose drawdown `p − (bhp + cdp)` is positive produces with the mobilities and
/// volume factors of its cell; otherwise it injects the well-bore mixture `mix` with the total
/// mobility of the cell.
pub fn perforation_rates(
    wells: &Wells,
    pu: &PhaseUsage,
    inp: &PerfInputs,
    bhp: &Adb,
    cdp: &DVector<f64>,
    mix: &[DVector<f64>],
    has_disgas: bool,
    has_vapoil: bool,
) -> Result<Vec<Adb>, Error> {
    let np = pu.num_phases();
    let wi = wells.well_index();
    let bhp_perf = bhp.try_left_mul(wells.to_perfs())?;
    let drawdown = inp
        .p
        .try_sub(&bhp_perf)?
        .try_sub(&Adb::constant(cdp.clone()))?;
    let producing: Vec<bool> = drawdown.value().iter().map(|&v| v > 0.0).collect();

    let mut cq_prod = Vec::with_capacity(np);
    for i in 0..np {
        cq_prod.push(
            inp.mob[i]
                .try_mul(&inp.b[i])?
                .try_mul(&drawdown)?
                .try_mul_const(wi)?,
        );
    }
    if let (Some(o), Some(g)) = (pu.pos(Phase::Oil), pu.pos(Phase::Gas)) {
        let (q_o, q_g) = (cq_prod[o].clone(), cq_prod[g].clone());
        if has_disgas {
            cq_prod[g] = q_g.try_add(&inp.rs.try_mul(&q_o)?)?;
        }
        if has_vapoil {
            cq_prod[o] = q_o.try_add(&inp.rv.try_mul(&q_g)?)?;
        }
    }

    let mut total_mob = inp.mob[0].clone();
    for m in &inp.mob[1..] {
        total_mob = total_mob.try_add(m)?;
    }
    // reservoir volume injected per unit of mixture surface volume
    let mut volume_ratio = Adb::constant(DVector::zeros(wells.num_perforations()));
    if let Some(w) = pu.pos(Phase::Water) {
        volume_ratio = volume_ratio.try_add(&Adb::constant(mix[w].clone()).try_div(&inp.b[w])?)?;
    }
    match (pu.pos(Phase::Oil), pu.pos(Phase::Gas)) {
        (Some(o), Some(g)) => {
            let d = (1.0 - &inp.rs.try_mul(&inp.rv)?).detached();
            let (c_o, c_g) = (Adb::constant(mix[o].clone()), Adb::constant(mix[g].clone()));
            let oil = c_o.try_sub(&inp.rv.try_mul(&c_g)?)?.try_div(&d)?;
            let gas = c_g.try_sub(&inp.rs.try_mul(&c_o)?)?.try_div(&d)?;
            volume_ratio = volume_ratio
                .try_add(&oil.try_div(&inp.b[o])?)?
                .try_add(&gas.try_div(&inp.b[g])?)?;
        }
        (Some(o), None) => {
            volume_ratio = volume_ratio.try_add(&Adb::constant(mix[o].clone()).try_div(&inp.b[o])?)?;
        }
        (None, Some(g)) => {
            volume_ratio = volume_ratio.try_add(&Adb::constant(mix[g].clone()).try_div(&inp.b[g])?)?;
        }
        (None, None) => {}
    }
    // total injected surface volume, negative in the production positive convention
    let cqt_is = total_mob
        .try_mul(&drawdown)?
        .try_mul_const(wi)?
        .try_div(&volume_ratio)?;

    (0..np)
        .map(|i| {
            let cq_inj = cqt_is.try_mul_const(&mix[i])?;
            Ok(select(&producing, &cq_prod[i], &cq_inj)?)
        })
        .collect()
}

/// `q_s + Σ_perf cq_s = 0` per phase and well, phase-major.
pub fn flux_residual(wells: &Wells, qs: &Adb, cq_s: &[Adb]) -> Result<Adb, Error> {
    let sums = cq_s
        .iter()
        .map(|cq| cq.try_left_mul(wells.sum_perfs()))
        .collect::<Result<Vec<_>, _>>()?;
    let refs: Vec<&Adb> = sums.iter().collect();
    Ok(qs.try_add(&vertcat_all(&refs)?)?)
}

/// Coefficients converting canonical surface rates to reservoir volume rates, from averaged
/// volume factors and ratios.
pub fn reservoir_coefficients(pu: &PhaseUsage, b: &[f64; 3], rs: f64, rv: f64) -> [f64; 3] {
    let (w, o, g) = (Phase::Water.index(), Phase::Oil.index(), Phase::Gas.index());
    let mut coef = [0.0; 3];
    if pu.is_active(Phase::Water) {
        coef[w] = 1.0 / b[w];
    }
    let both = pu.is_active(Phase::Oil) && pu.is_active(Phase::Gas);
    let (rs, rv) = if both { (rs, rv) } else { (0.0, 0.0) };
    let d = 1.0 - rs * rv;
    if pu.is_active(Phase::Oil) {
        coef[o] = 1.0 / (b[o] * d);
        if both {
            coef[o] -= rs / (b[g] * d);
        }
    }
    if pu.is_active(Phase::Gas) {
        coef[g] = 1.0 / (b[g] * d);
        if both {
            coef[g] -= rv / (b[o] * d);
        }
    }
    coef
}

/// The control equation of every well under its current control, with the magnitude of the
/// target each equation is normalised by.
///
/// `coefficients[w]` are the reservoir volume coefficients of well `w` and `voidage[w]` its
/// group voidage target.
pub fn control_residual(
    wells: &Wells,
    pu: &PhaseUsage,
    ws: &WellState,
    qs: &Adb,
    bhp: &Adb,
    coefficients: &[[f64; 3]],
    voidage: &[f64],
) -> Result<(Adb, DVector<f64>), Error> {
    let nw = wells.num_wells();
    let phases = pu.active_phases();
    let mut rate_coef = Vec::new();
    let mut flo_coef = Vec::new();
    let mut cb = DVector::zeros(nw);
    let mut c0 = DVector::zeros(nw);
    let mut vfp_val = DVector::zeros(nw);
    let mut vfp_slope = DVector::zeros(nw);
    let mut scale = DVector::zeros(nw);

    for (w, spec) in wells.specs().iter().enumerate() {
        let ctrl = &spec.controls[ws.current_control[w]];
        // producers hold negative rates: Σq + target = 0
        let sign = if spec.is_injector() { -1.0 } else { 1.0 };
        match ctrl.kind {
            ControlKind::Bhp => {
                cb[w] = 1.0;
                c0[w] = -ctrl.target;
                scale[w] = ctrl.target;
            }
            ControlKind::SurfaceRate => {
                for (i, p) in phases.iter().enumerate() {
                    if ctrl.phases[p.index()] {
                        rate_coef.push((w, i * nw + w, 1.0));
                    }
                }
                c0[w] = sign * ctrl.target;
                scale[w] = ctrl.target;
            }
            ControlKind::ReservoirRate | ControlKind::GroupVoidage { .. } => {
                for (i, p) in phases.iter().enumerate() {
                    rate_coef.push((w, i * nw + w, coefficients[w][p.index()]));
                }
                let target = match ctrl.kind {
                    ControlKind::GroupVoidage { .. } => voidage[w],
                    _ => ctrl.target,
                };
                c0[w] = sign * target;
                scale[w] = target;
            }
            ControlKind::Thp { table } => {
                let t = wells.vfp(table).ok_or_else(|| Error::WellControlInfeasible {
                    well: spec.name.clone(),
                    reason: format!("missing VFP table {table}"),
                })?;
                let fc = t.flo_type().coefficients();
                for (i, p) in phases.iter().enumerate() {
                    if fc[p.index()] != 0.0 {
                        flo_coef.push((w, i * nw + w, -fc[p.index()]));
                    }
                }
                let flo = t.flo(&super::canonical_rates(pu, ws, w));
                let (v, d) = t.bhp(flo, ctrl.target);
                cb[w] = 1.0;
                vfp_val[w] = v;
                vfp_slope[w] = d;
                scale[w] = v;
            }
        }
    }
    let nq = qs.size();
    let rates = qs.try_left_mul(&AdMatrix::from_triplets(nw, nq, &rate_coef))?;
    let flo = qs.try_left_mul(&AdMatrix::from_triplets(nw, nq, &flo_coef))?;
    let vfp = flo.compose(vfp_val, &vfp_slope)?;

    let eq = rates
        .try_add(&bhp.try_mul_const(&cb)?)?
        .try_sub(&vfp)?
        .try_add(&Adb::constant(c0))?;
    Ok((eq, scale.map(|s: f64| s.abs().max(f64::MIN_POSITIVE))))
}
