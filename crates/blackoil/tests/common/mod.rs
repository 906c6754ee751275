//! Fluids and grids shared by the end-to-end runs.
#![allow(dead_code)]

use std::sync::Arc;

use blackoil::{
    grid::CartesianGrid,
    props::{BlackoilProps, GasPvt, OilPvt, PvtTables, SaturationFunctions, WaterPvt},
    rock::ArrayRock,
    state::ReservoirState,
    units::{BARSA, CENTI_POISE, MILLI_DARCY},
    Config, Discretization, PhaseUsage,
};

pub const SURFACE_DENSITY: [f64; 3] = [1000.0, 800.0, 1.0];

pub fn water(compressibility: f64, viscosity: f64) -> WaterPvt {
    WaterPvt {
        p_ref: 200.0 * BARSA,
        fvf_ref: 1.0,
        compressibility,
        viscosity,
        viscosibility: 0.0,
    }
}

/// Oil that neither expands nor dissolves gas.
pub fn rigid_oil() -> OilPvt {
    OilPvt::dead(
        vec![1.0 * BARSA, 1000.0 * BARSA],
        vec![1.0, 1.0],
        vec![2.0 * CENTI_POISE, 2.0 * CENTI_POISE],
    )
    .unwrap()
}

pub fn dead_oil() -> OilPvt {
    OilPvt::dead(
        vec![100.0 * BARSA, 300.0 * BARSA],
        vec![1.05, 1.02],
        vec![1.0 * CENTI_POISE, 1.2 * CENTI_POISE],
    )
    .unwrap()
}

/// `R_s^{sat}` ramps linearly from 20 at 50 bar to 160 at 400 bar.
pub fn live_oil() -> OilPvt {
    OilPvt::live(
        vec![50.0 * BARSA, 400.0 * BARSA],
        vec![20.0, 160.0],
        vec![1.1, 1.4],
        vec![1.2 * CENTI_POISE, 0.6 * CENTI_POISE],
        1.0e-9,
        0.0,
    )
    .unwrap()
}

pub fn dry_gas() -> GasPvt {
    GasPvt::dry(
        vec![50.0 * BARSA, 400.0 * BARSA],
        vec![0.02, 0.0025],
        vec![0.012 * CENTI_POISE, 0.03 * CENTI_POISE],
    )
    .unwrap()
}

pub fn tables(water: Option<WaterPvt>, oil: Option<OilPvt>, gas: Option<GasPvt>) -> PvtTables {
    PvtTables {
        surface_density: SURFACE_DENSITY,
        water,
        oil,
        gas,
    }
}

/// Uniform rock on a box grid.
pub fn discretize(
    grid: &CartesianGrid,
    porosity: f64,
    perm_md: f64,
    config: &Config,
    gravity: f64,
) -> Arc<Discretization> {
    let n = grid.dims().iter().product();
    let rock = ArrayRock::uniform(n, porosity, perm_md * MILLI_DARCY).unwrap();
    Arc::new(Discretization::new(grid, &rock, &[], &config.model, gravity).unwrap())
}

pub fn props(
    pu: PhaseUsage,
    pvt: PvtTables,
    satfunc: SaturationFunctions,
    disc: &Discretization,
) -> Arc<BlackoilProps> {
    Arc::new(BlackoilProps::new(pu, vec![pvt], vec![satfunc], disc.rock()).unwrap())
}

/// Largest deviation from a valid saturation: sums off one or values outside `[0, 1]`.
pub fn saturation_violation(state: &ReservoirState) -> f64 {
    let bounds = state
        .saturation
        .iter()
        .flat_map(|s| s.iter())
        .map(|&s| (-s).max(s - 1.0).max(0.0))
        .fold(0.0, f64::max);
    bounds.max(state.saturation_sum_error())
}
