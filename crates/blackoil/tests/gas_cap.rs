//! Three-phase run on a 20×1×20 cross-section with a gas cap in the top five layers.
//!
//! The layer just below the gas-oil contact holds a little immobile free gas over
//! undersaturated oil. Water injection outpaces the producer and pressure rises, so that gas
//! dissolves: cells leave the gas-and-oil state for oil-only while the dissolved gas ratio of
//! every saturated cell stays on the saturation curve.

mod common;

use std::sync::Arc;

use approx::assert_relative_eq;
use blackoil::{
    grid::CartesianGrid,
    props::SaturationFunctions,
    state::{HydroCarbonState, ReservoirState},
    units::{BARSA, CENTI_POISE, DAY, GRAVITY},
    wells::{WellControl, WellSpec, Wells},
    Config, Phase, PhaseUsage, Simulator,
};

const NX: usize = 20;
const NZ: usize = 20;
const GAS_CAP_LAYERS: usize = 5;
const TOP: f64 = 2000.0;
const DZ: f64 = 2.0;
const DATUM_PRESSURE: f64 = 300.0 * BARSA;
/// bubble point of the oil below the transition layer
const BUBBLE_POINT: f64 = 280.0 * BARSA;
/// below the critical gas saturation
const TRAPPED_GAS: f64 = 0.01;
const INJECTION_RATE: f64 = 12.0 / DAY;

fn depth(k: usize) -> f64 {
    TOP + (k as f64 + 0.5) * DZ
}

/// Approximate hydrostatic equilibrium around the gas-oil contact.
fn initial_state(grid: &CartesianGrid) -> ReservoirState {
    let oil = common::live_oil();
    let contact = TOP + GAS_CAP_LAYERS as f64 * DZ;
    let (rho_oil, rho_gas) = (708.0, 300.0);
    let rs_undersaturated = oil.rs_sat(BUBBLE_POINT).0;
    let mut state = ReservoirState::new(NX * NZ, DATUM_PRESSURE, [0.0; 3]);
    for k in 0..NZ {
        let d = depth(k);
        let rho = if d < contact { rho_gas } else { rho_oil };
        let p = DATUM_PRESSURE + rho * GRAVITY * (d - contact);
        for i in 0..NX {
            let c = grid.cell_index(i, 0, k);
            state.pressure[c] = p;
            if k < GAS_CAP_LAYERS {
                state.rs[c] = oil.rs_sat(p).0;
                state.set_saturation(c, [0.0, 0.2, 0.8]);
                state.hydrocarbon_state[c] = HydroCarbonState::GasAndOil;
            } else if k == GAS_CAP_LAYERS {
                state.rs[c] = oil.rs_sat(p).0;
                state.set_saturation(c, [0.2, 0.8 - TRAPPED_GAS, TRAPPED_GAS]);
                state.hydrocarbon_state[c] = HydroCarbonState::GasAndOil;
            } else {
                state.rs[c] = rs_undersaturated;
                state.set_saturation(c, [0.2, 0.8, 0.0]);
                state.hydrocarbon_state[c] = HydroCarbonState::OilOnly;
            }
        }
    }
    state
}

fn simulator() -> Simulator {
    let config = Config::from_params([
        ("tolerance_mb", "1e-9"),
        ("tolerance_wells", "1e-10"),
        ("max_iter", "15"),
    ])
    .unwrap();
    let grid = CartesianGrid::with_top([NX, 1, NZ], [10.0, 10.0, DZ], TOP).unwrap();
    let disc = common::discretize(&grid, 0.2, 200.0, &config, GRAVITY);
    let props = common::props(
        PhaseUsage::three_phase(),
        common::tables(
            Some(common::water(4.0e-10, 0.5 * CENTI_POISE)),
            Some(common::live_oil()),
            Some(common::dry_gas()),
        ),
        SaturationFunctions::corey(0.2, 0.2, 0.1, 0.05, [2.0; 4]),
        &disc,
    );
    let bottom = depth(NZ - 1);
    let wells = Wells::new(
        vec![
            WellSpec::injector("INJ", bottom, Phase::Water)
                .perforate(grid.cell_index(0, 0, NZ - 1), 1.0e-13, bottom)
                .with_control(WellControl::surface_rate(INJECTION_RATE, &[Phase::Water])),
            WellSpec::producer("PROD", bottom)
                .perforate(grid.cell_index(NX - 1, 0, NZ - 1), 1.0e-14, bottom)
                .with_control(WellControl::bhp(250.0 * BARSA)),
        ],
        Vec::new(),
        NX * NZ,
    )
    .unwrap();
    Simulator::new(config, disc, props, Arc::new(wells), initial_state(&grid)).unwrap()
}

#[test]
fn test_repressurization_dissolves_free_gas() {
    let mut sim = simulator();
    let oil = common::live_oil();
    let regions = vec![0; NX * NZ];
    let initial = sim.model().fluid_in_place(&regions).unwrap().remove(0);
    let initial_pressure = sim.model().state().pressure.mean();

    let mut dissolved = 0;
    for _ in 0..10 {
        let previous = sim.model().state().hydrocarbon_state.clone();
        sim.step(10.0 * DAY).unwrap();
        let state = sim.model().state();
        assert!(common::saturation_violation(state) < 1e-10);

        for c in 0..NX * NZ {
            let rs_sat = oil.rs_sat(state.pressure[c]).0;
            match state.hydrocarbon_state[c] {
                HydroCarbonState::OilOnly => {
                    assert!(state.rs[c] <= rs_sat * (1.0 + 1e-9), "cell {c}");
                    assert_eq!(state.saturation(Phase::Gas)[c], 0.0);
                    if previous[c] == HydroCarbonState::GasAndOil {
                        dissolved += 1;
                    }
                }
                HydroCarbonState::GasAndOil => {
                    assert!((state.rs[c] - rs_sat).abs() <= 1e-9 * rs_sat, "cell {c}");
                }
                HydroCarbonState::GasOnly => panic!("cell {c} lost its oil"),
            }
        }
    }
    assert!(dissolved > 0, "no cell lost its free gas");

    let model = sim.model();
    assert!(model.state().pressure.mean() > initial_pressure);
    // gas cap cells keep their free gas
    assert!(model.state().hydrocarbon_state[..NX * GAS_CAP_LAYERS]
        .iter()
        .all(|&hc| hc == HydroCarbonState::GasAndOil));
    assert_relative_eq!(model.well_state().bhp[1], 250.0 * BARSA, max_relative = 1e-9);

    let injected = model.cumulative_well_volumes(0);
    let produced = model.cumulative_well_volumes(1);
    assert!(injected[0] > 0.0);
    // produced volumes are negative
    assert!(produced[1] < 0.0 && produced[2] < 0.0);
    let net: Vec<f64> = (0..3).map(|p| injected[p] + produced[p]).collect();
    let fip = model.fluid_in_place(&regions).unwrap().remove(0);
    let balance = [
        (fip.water - initial.water, net[0], initial.water),
        (fip.oil - initial.oil, net[1], initial.oil),
        (fip.gas - initial.gas, net[2], initial.gas),
    ];
    for (phase, (change, cumulative, total)) in balance.into_iter().enumerate() {
        let error = (change - cumulative).abs() / total;
        assert!(error < 1e-6, "phase {phase}: material balance error {error:.3e}");
    }
}
