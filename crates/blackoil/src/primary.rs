//! Primary variables of the cell equations and their update after a Newton increment.
//!
//! The third cell variable is `S_g`, `R_s` or `R_v` depending on the hydrocarbon state of the
//! cell. The assembly stays uniform across states through three 0/1 masks that multiply the
//! composite variable.

use ad::AutoDiffBlock;
use nalgebra::DVector;

use crate::{
    phases::{Phase, PhaseUsage},
    props::FluidProps,
    state::{HydroCarbonState, ReservoirState, WellState},
    Error,
};

/// Saturation given to a phase that appears.
pub const APPEARING_SATURATION: f64 = 1.0e-6;

/// Relative tolerance of the saturation tests.
fn epsilon() -> f64 {
    f64::EPSILON.sqrt()
}

/// Interpretation of the composite variable per cell.
#[derive(Clone, Debug, PartialEq)]
pub struct PrimaryMasks {
    pub is_sg: DVector<f64>,
    pub is_rs: DVector<f64>,
    pub is_rv: DVector<f64>,
}

impl PrimaryMasks {
    pub fn new(state: &ReservoirState) -> Self {
        let flag = |want: HydroCarbonState| {
            DVector::from_iterator(
                state.num_cells(),
                state
                    .hydrocarbon_state
                    .iter()
                    .map(|&h| if h == want { 1.0 } else { 0.0 }),
            )
        };
        PrimaryMasks {
            is_sg: flag(HydroCarbonState::GasAndOil),
            is_rs: flag(HydroCarbonState::OilOnly),
            is_rv: flag(HydroCarbonState::GasOnly),
        }
    }
}

/// Values of the cell primary variables, one vector per variable.
pub fn cell_values(pu: &PhaseUsage, state: &ReservoirState) -> Vec<DVector<f64>> {
    let mut vars = vec![state.pressure.clone()];
    if pu.sw_var().is_some() {
        vars.push(state.saturation(Phase::Water).clone());
    }
    if pu.x_var().is_some() {
        let sg = state.saturation(Phase::Gas);
        vars.push(DVector::from_fn(state.num_cells(), |c, _| {
            match state.hydrocarbon_state[c] {
                HydroCarbonState::GasAndOil => sg[c],
                HydroCarbonState::OilOnly => state.rs[c],
                HydroCarbonState::GasOnly => state.rv[c],
            }
        }));
    }
    vars
}

/// Limits on a single Newton update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpdateLimits {
    pub dp_max_rel: f64,
    pub ds_max: f64,
    pub dr_max_rel: f64,
    pub dbhp_max_rel: f64,
}

fn chop(d: f64, limit: f64) -> f64 {
    d.signum() * d.abs().min(limit)
}

/// Saturated ratios at `p`, zero where the ratio does not exist.
fn saturated_ratios(
    props: &dyn FluidProps,
    p: &DVector<f64>,
    cells: &[usize],
) -> Result<(DVector<f64>, DVector<f64>), Error> {
    let n = p.len();
    let pad = AutoDiffBlock::constant(p.clone());
    let rs = if props.has_dissolved_gas() {
        props.rs_sat(&pad, cells)?.value().clone()
    } else {
        DVector::zeros(n)
    };
    let rv = if props.has_vaporized_oil() {
        props.rv_sat(&pad, cells)?.value().clone()
    } else {
        DVector::zeros(n)
    };
    Ok((rs, rv))
}

/// Applies `x ← x − Δx` to the reservoir state with chopping, then switches the hydrocarbon
/// state of cells in which a phase appeared or vanished.
///
/// `dx` holds the cell increments in variable-major order. Returns the number of cells that
/// changed state.
pub fn update_state(
    props: &dyn FluidProps,
    state: &mut ReservoirState,
    dx: &DVector<f64>,
    limits: &UpdateLimits,
) -> Result<usize, Error> {
    let pu = *props.phase_usage();
    let nc = state.num_cells();
    let nv = pu.num_cell_vars();
    if dx.len() != nv * nc {
        return Err(ad::Error::ShapeMismatch {
            op: "update_state",
            lhs: (nv * nc, 1),
            rhs: (dx.len(), 1),
        }
        .into());
    }
    let cells: Vec<usize> = (0..nc).collect();
    let var = |v: usize, c: usize| dx[v * nc + c];
    let (w, o, g) = (Phase::Water.index(), Phase::Oil.index(), Phase::Gas.index());
    let disgas = props.has_dissolved_gas();
    let vapoil = props.has_vaporized_oil();
    let eps = epsilon();

    let p_old = state.pressure.clone();
    let (rs_sat_old, rv_sat_old) = saturated_ratios(props, &p_old, &cells)?;
    for c in 0..nc {
        let dp = chop(var(0, c), limits.dp_max_rel * p_old[c].abs());
        state.pressure[c] = p_old[c] - dp;
    }
    let (rs_sat, rv_sat) = saturated_ratios(props, &state.pressure, &cells)?;

    let mut transitions = 0;
    for c in 0..nc {
        let hc = state.hydrocarbon_state[c];
        let (rs_old, rv_old) = (state.rs[c], state.rv[c]);
        let mut water_filled = false;
        let dsw = pu.sw_var().map_or(0.0, |v| var(v, c));
        let dxv = pu.x_var().map_or(0.0, |v| var(v, c));

        let mut s = [
            state.saturation[w][c],
            state.saturation[o][c],
            state.saturation[g][c],
        ];
        if pu.x_var().is_some() {
            let dsg = match hc {
                HydroCarbonState::GasAndOil => dxv,
                HydroCarbonState::GasOnly => -dsw,
                HydroCarbonState::OilOnly => 0.0,
            };
            let dso = -dsw - dsg;
            let max_ds = dsw.abs().max(dsg.abs()).max(dso.abs());
            let step = if max_ds > limits.ds_max { limits.ds_max / max_ds } else { 1.0 };
            s[w] -= step * dsw;
            s[o] -= step * dso;
            s[g] -= step * dsg;

            if hc == HydroCarbonState::OilOnly {
                let drs = chop(dxv, limits.dr_max_rel * rs_old.abs());
                state.rs[c] = (rs_old - if rs_old > 0.0 { drs } else { dxv }).max(0.0);
            }
            if hc == HydroCarbonState::GasOnly {
                let drv = chop(dxv, limits.dr_max_rel * rv_old.abs());
                state.rv[c] = (rv_old - if rv_old > 0.0 { drv } else { dxv }).max(0.0);
            }
        } else if pu.sw_var().is_some() {
            let step = if dsw.abs() > limits.ds_max { limits.ds_max / dsw.abs() } else { 1.0 };
            s[w] -= step * dsw;
            // the second phase takes the rest
            let other = if pu.is_active(Phase::Oil) { o } else { g };
            s[other] = 1.0 - s[w];
        }

        let mut next = hc;
        if pu.x_var().is_some() {
            if pu.is_active(Phase::Water) && s[w] > 1.0 - eps {
                next = HydroCarbonState::GasAndOil;
                water_filled = true;
                s = [1.0, 0.0, 0.0];
                state.rs[c] = 0.0;
                state.rv[c] = 0.0;
            } else {
                match hc {
                    HydroCarbonState::GasAndOil => {
                        if s[g] < 0.0 && disgas {
                            next = HydroCarbonState::OilOnly;
                            s[g] = 0.0;
                            s[o] = 1.0 - s[w];
                            state.rs[c] = rs_sat[c];
                        } else if s[o] < 0.0 && vapoil {
                            next = HydroCarbonState::GasOnly;
                            s[o] = 0.0;
                            s[g] = 1.0 - s[w];
                            state.rv[c] = rv_sat[c];
                        }
                    }
                    HydroCarbonState::OilOnly => {
                        let was_saturated = rs_old >= rs_sat_old[c] * (1.0 - eps);
                        if was_saturated && state.rs[c] > rs_sat[c] * (1.0 + eps) {
                            next = HydroCarbonState::GasAndOil;
                            s[g] = APPEARING_SATURATION;
                            s[o] = 1.0 - s[w] - s[g];
                        } else {
                            state.rs[c] = state.rs[c].min(rs_sat[c]);
                        }
                    }
                    HydroCarbonState::GasOnly => {
                        let was_saturated = rv_old >= rv_sat_old[c] * (1.0 - eps);
                        if was_saturated && state.rv[c] > rv_sat[c] * (1.0 + eps) {
                            next = HydroCarbonState::GasAndOil;
                            s[o] = APPEARING_SATURATION;
                            s[g] = 1.0 - s[w] - s[o];
                        } else {
                            state.rv[c] = state.rv[c].min(rv_sat[c]);
                        }
                    }
                }
            }
        }
        if next != hc {
            log::debug!("cell {c}: {hc:?} -> {next:?}");
            transitions += 1;
        }
        state.hydrocarbon_state[c] = next;

        // inactive phases stay at zero
        for p in Phase::ALL {
            if !pu.is_active(p) {
                s[p.index()] = 0.0;
            }
        }
        s.iter_mut().for_each(|v| *v = v.max(0.0));
        let total: f64 = s.iter().sum();
        if total > 0.0 {
            s.iter_mut().for_each(|v| *v /= total);
        }
        state.set_saturation(c, s);

        if next == HydroCarbonState::GasAndOil && pu.x_var().is_some() && !water_filled {
            if disgas {
                state.rs[c] = rs_sat[c];
            }
            if vapoil {
                state.rv[c] = rv_sat[c];
            }
        }
    }
    if transitions > 0 {
        log::debug!("{transitions} cells changed hydrocarbon state");
    }
    Ok(transitions)
}

/// Applies `x ← x − Δx` to the well unknowns: `dx` holds the rate increments (phase-major)
/// followed by the bhp increments.
pub fn update_well_state(ws: &mut WellState, dx: &DVector<f64>, dbhp_max_rel: f64) -> Result<(), Error> {
    let nq = ws.surface_rates.len();
    let nw = ws.num_wells();
    if dx.len() != nq + nw {
        return Err(ad::Error::ShapeMismatch {
            op: "update_well_state",
            lhs: (nq + nw, 1),
            rhs: (dx.len(), 1),
        }
        .into());
    }
    ws.surface_rates -= dx.rows(0, nq);
    for w in 0..nw {
        let d = chop(dx[nq + w], dbhp_max_rel * ws.bhp[w].abs());
        ws.bhp[w] -= d;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        props::{BlackoilProps, GasPvt, OilPvt, PvtTables, SaturationFunctions, WaterPvt},
        rock::ArrayRock,
        units::{BARSA, CENTI_POISE},
    };

    const LIMITS: UpdateLimits = UpdateLimits {
        dp_max_rel: 1.0e9,
        ds_max: 0.2,
        dr_max_rel: 1.0e9,
        dbhp_max_rel: 1.0,
    };

    /// Live oil with `R_s^{sat} = 0.5 p / bar`.
    fn props(nc: usize) -> BlackoilProps {
        let pvt = PvtTables {
            surface_density: [1000.0, 800.0, 1.0],
            water: Some(WaterPvt {
                p_ref: 200.0 * BARSA,
                fvf_ref: 1.0,
                compressibility: 0.0,
                viscosity: CENTI_POISE,
                viscosibility: 0.0,
            }),
            oil: Some(
                OilPvt::live(
                    vec![100.0 * BARSA, 300.0 * BARSA],
                    vec![50.0, 150.0],
                    vec![1.2, 1.4],
                    vec![CENTI_POISE, 0.8 * CENTI_POISE],
                    1.0e-9,
                    0.0,
                )
                .unwrap(),
            ),
            gas: Some(
                GasPvt::dry(
                    vec![50.0 * BARSA, 400.0 * BARSA],
                    vec![0.02, 0.003],
                    vec![0.012 * CENTI_POISE, 0.03 * CENTI_POISE],
                )
                .unwrap(),
            ),
        };
        let rock = ArrayRock::uniform(nc, 0.2, 1.0e-13).unwrap();
        BlackoilProps::new(
            PhaseUsage::three_phase(),
            vec![pvt],
            vec![SaturationFunctions::linear()],
            &rock,
        )
        .unwrap()
    }

    fn increment(nc: usize, per_var: [&[f64]; 3]) -> DVector<f64> {
        let mut dx = DVector::zeros(3 * nc);
        for (v, vals) in per_var.iter().enumerate() {
            for (c, &d) in vals.iter().enumerate() {
                dx[v * nc + c] = d;
            }
        }
        dx
    }

    #[test]
    fn test_masks_and_values() {
        let mut state = ReservoirState::new(3, 200.0 * BARSA, [0.2, 0.5, 0.3]);
        state.hydrocarbon_state[1] = HydroCarbonState::OilOnly;
        state.rs[1] = 42.0;
        state.hydrocarbon_state[2] = HydroCarbonState::GasOnly;
        state.rv[2] = 1.0e-4;
        let m = PrimaryMasks::new(&state);
        assert_eq!(m.is_sg.as_slice(), &[1.0, 0.0, 0.0]);
        assert_eq!(m.is_rs.as_slice(), &[0.0, 1.0, 0.0]);
        assert_eq!(m.is_rv.as_slice(), &[0.0, 0.0, 1.0]);
        let vars = cell_values(&PhaseUsage::three_phase(), &state);
        assert_eq!(vars.len(), 3);
        assert_eq!(vars[2].as_slice(), &[0.3, 42.0, 1.0e-4]);
    }

    #[test]
    fn test_saturation_chopping() {
        let props = props(1);
        let mut state = ReservoirState::new(1, 200.0 * BARSA, [0.2, 0.5, 0.3]);
        state.rs[0] = 100.0;
        // Δsw = −0.4 would be chopped to −0.2
        let dx = increment(1, [&[0.0], &[-0.4], &[0.0]]);
        update_state(&props, &mut state, &dx, &LIMITS).unwrap();
        assert_relative_eq!(state.saturation[0][0], 0.4, epsilon = 1e-14);
        assert_relative_eq!(state.saturation[1][0], 0.3, epsilon = 1e-14);
        assert_relative_eq!(state.saturation[2][0], 0.3, epsilon = 1e-14);
        assert!(state.saturation_sum_error() < 1e-12);
    }

    #[test]
    fn test_pressure_chopping() {
        let props = props(1);
        let mut state = ReservoirState::new(1, 200.0 * BARSA, [0.2, 0.5, 0.3]);
        let limits = UpdateLimits {
            dp_max_rel: 0.1,
            ..LIMITS
        };
        let dx = increment(1, [&[-100.0 * BARSA], &[0.0], &[0.0]]);
        update_state(&props, &mut state, &dx, &limits).unwrap();
        assert_relative_eq!(state.pressure[0], 220.0 * BARSA, max_relative = 1e-12);
        // saturated cells follow the saturated ratio
        assert_relative_eq!(state.rs[0], 110.0, max_relative = 1e-12);
    }

    #[test]
    fn test_vanishing_gas_switches_to_undersaturated_oil() {
        let props = props(1);
        let mut state = ReservoirState::new(1, 200.0 * BARSA, [0.2, 0.75, 0.05]);
        state.rs[0] = 100.0;
        let dx = increment(1, [&[10.0 * BARSA], &[0.0], &[0.1]]);
        let n = update_state(&props, &mut state, &dx, &LIMITS).unwrap();
        assert_eq!(n, 1);
        assert_eq!(state.hydrocarbon_state[0], HydroCarbonState::OilOnly);
        assert_eq!(state.saturation[2][0], 0.0);
        assert_relative_eq!(state.saturation[1][0], 0.8, epsilon = 1e-14);
        // exactly the saturated ratio at the new pressure
        let rs_sat = props
            .rs_sat(&AutoDiffBlock::constant(state.pressure.clone()), &[0])
            .unwrap();
        assert_eq!(state.rs[0], rs_sat.value()[0]);
    }

    #[test]
    fn test_saturated_oil_liberates_gas_on_pressure_drop() {
        let props = props(1);
        let mut state = ReservoirState::new(1, 200.0 * BARSA, [0.2, 0.8, 0.0]);
        state.hydrocarbon_state[0] = HydroCarbonState::OilOnly;
        state.rs[0] = 100.0;
        // pressure drops by 20 bar, R_s unchanged: above the new saturated value of 90
        let dx = increment(1, [&[20.0 * BARSA], &[0.0], &[0.0]]);
        update_state(&props, &mut state, &dx, &LIMITS).unwrap();
        assert_eq!(state.hydrocarbon_state[0], HydroCarbonState::GasAndOil);
        assert_relative_eq!(state.saturation[2][0], APPEARING_SATURATION, max_relative = 1e-9);
        assert_relative_eq!(state.rs[0], 90.0, max_relative = 1e-12);
    }

    #[test]
    fn test_undersaturated_oil_is_clamped() {
        let props = props(1);
        let mut state = ReservoirState::new(1, 200.0 * BARSA, [0.2, 0.8, 0.0]);
        state.hydrocarbon_state[0] = HydroCarbonState::OilOnly;
        state.rs[0] = 60.0;
        // an increment overshooting the saturated value of 100
        let dx = increment(1, [&[0.0], &[0.0], &[-80.0]]);
        update_state(&props, &mut state, &dx, &LIMITS).unwrap();
        assert_eq!(state.hydrocarbon_state[0], HydroCarbonState::OilOnly);
        assert_relative_eq!(state.rs[0], 100.0, max_relative = 1e-12);
    }

    #[test]
    fn test_water_filled_cell() {
        let props = props(1);
        let mut state = ReservoirState::new(1, 200.0 * BARSA, [0.95, 0.05, 0.0]);
        state.hydrocarbon_state[0] = HydroCarbonState::OilOnly;
        state.rs[0] = 80.0;
        let dx = increment(1, [&[0.0], &[-0.1], &[0.0]]);
        update_state(&props, &mut state, &dx, &LIMITS).unwrap();
        assert_eq!(state.saturation[0][0], 1.0);
        assert_eq!(state.saturation[1][0], 0.0);
        assert_eq!(state.hydrocarbon_state[0], HydroCarbonState::GasAndOil);
        assert_eq!(state.rs[0], 0.0);
    }

    #[test]
    fn test_well_update() {
        let mut ws = WellState {
            bhp: DVector::from_vec(vec![100.0, 200.0]),
            surface_rates: DVector::from_vec(vec![1.0, 2.0]),
            perf_rates: DVector::zeros(0),
            perf_pressures: DVector::zeros(0),
            current_control: vec![0, 0],
        };
        let dx = DVector::from_vec(vec![0.5, -1.0, 50.0, -500.0]);
        update_well_state(&mut ws, &dx, 1.0).unwrap();
        assert_eq!(ws.surface_rates.as_slice(), &[0.5, 3.0]);
        assert_eq!(ws.bhp.as_slice(), &[50.0, 400.0]);
        assert!(update_well_state(&mut ws, &DVector::zeros(3), 1.0).is_err());
    }
}
