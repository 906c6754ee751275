//! Two-phase water flood of a 10×10×1 quarter five-spot: water is injected at 0.1 pore volumes
//! per day in one corner and oil and water are produced at constant bottom-hole pressure in the
//! opposite corner for 1000 days.

mod common;

use std::sync::Arc;

use approx::assert_relative_eq;
use blackoil::{
    grid::CartesianGrid,
    props::SaturationFunctions,
    state::ReservoirState,
    units::{BARSA, CENTI_POISE, DAY},
    wells::{WellControl, WellSpec, Wells},
    Config, MemorySink, Phase, PhaseUsage, Simulator,
};

const CELL_PORE_VOLUME: f64 = 0.2;
const PORE_VOLUME: f64 = 100.0 * CELL_PORE_VOLUME;

fn simulator(config: Config) -> Simulator {
    let grid = CartesianGrid::new([10, 10, 1], [1.0; 3]).unwrap();
    let disc = common::discretize(&grid, CELL_PORE_VOLUME, 100.0, &config, 0.0);
    let props = common::props(
        PhaseUsage::water_oil(),
        common::tables(
            Some(common::water(1.0e-11, 0.5 * CENTI_POISE)),
            Some(common::rigid_oil()),
            None,
        ),
        SaturationFunctions::corey(0.2, 0.2, 0.0, 0.0, [2.0; 4]),
        &disc,
    );
    let wells = Wells::new(
        vec![
            WellSpec::injector("INJ", 0.5, Phase::Water)
                .perforate(grid.cell_index(0, 0, 0), 1.0e-12, 0.5)
                .with_control(WellControl::surface_rate(
                    0.1 * PORE_VOLUME / DAY,
                    &[Phase::Water],
                )),
            WellSpec::producer("PROD", 0.5)
                .perforate(grid.cell_index(9, 9, 0), 1.0e-12, 0.5)
                .with_control(WellControl::bhp(100.0 * BARSA)),
        ],
        Vec::new(),
        100,
    )
    .unwrap();
    let state = ReservoirState::new(100, 100.0 * BARSA, [0.2, 0.8, 0.0]);
    Simulator::new(config, disc, props, Arc::new(wells), state).unwrap()
}

#[test]
fn test_water_flood() {
    let config = Config::from_params([
        ("tolerance_cnv", "1e-5"),
        ("tolerance_mb", "1e-10"),
        ("tolerance_wells", "1e-11"),
        ("max_iter", "15"),
    ])
    .unwrap();
    let mut sim = simulator(config);
    let regions = vec![0; 100];
    let initial = sim.model().fluid_in_place(&regions).unwrap();

    let mut sink = MemorySink::default();
    sim.run(&[100.0 * DAY; 10], &mut sink).unwrap();
    assert_relative_eq!(sim.time(), 1000.0 * DAY, max_relative = 1e-12);
    assert_eq!(sink.snapshots.len(), 10);

    let model = sim.model();
    for snapshot in &sink.snapshots {
        let state = ReservoirState {
            pressure: snapshot.pressure.clone(),
            saturation: snapshot.saturation.clone(),
            ..model.state().clone()
        };
        assert!(common::saturation_violation(&state) < 1e-10);
    }

    // surface volumes, injection positive
    let injected = model.cumulative_well_volumes(0);
    let produced = model.cumulative_well_volumes(1);
    assert_relative_eq!(injected[0], 100.0 * PORE_VOLUME, max_relative = 1e-6);
    assert!(produced[0] < 0.0 && produced[1] < 0.0);
    let imbalance = injected[0] + produced[0] + produced[1];
    assert!(
        imbalance.abs() < 1e-3 * PORE_VOLUME,
        "injected {} produced {:?}",
        injected[0],
        produced
    );

    // what stayed in the reservoir
    let fip = model.fluid_in_place(&regions).unwrap();
    let stored = fip[0].water - initial[0].water + fip[0].oil - initial[0].oil;
    assert!((stored - imbalance).abs() < 1e-4 * PORE_VOLUME);

    let sw = model.state().saturation(Phase::Water);
    for k in 0..9 {
        let (near, far) = (sw[11 * k], sw[11 * (k + 1)]);
        assert!(far <= near + 1e-4, "cell {}: {near} then {far}", 11 * (k + 1));
    }
    // the flood swept the producer corner
    assert!(sw[99] > 0.5);
}
