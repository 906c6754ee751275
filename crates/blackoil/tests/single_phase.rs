//! Single-phase Darcy flow between a rate-controlled injector and producer on opposite corners
//! of a 10×10×1 box. Water is nearly incompressible, so one day is long enough to reach the
//! steady state in which everything injected crosses any cut between the wells.

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

const RATE: f64 = 1.0e-6;

fn simulator() -> Simulator {
    // tight enough that the residual is far below the well rate
    let config = Config::from_params([
        ("tolerance_cnv", "1e-9"),
        ("tolerance_mb", "1e-10"),
        ("tolerance_wells", "1e-12"),
        ("linear_solver_reduction", "1e-9"),
        ("max_iter", "20"),
    ])
    .unwrap();
    let grid = CartesianGrid::new([10, 10, 1], [10.0; 3]).unwrap();
    let disc = common::discretize(&grid, 1.0, 100.0, &config, 0.0);
    let props = common::props(
        PhaseUsage::single(Phase::Water),
        common::tables(Some(common::water(1.0e-10, 1.0 * CENTI_POISE)), None, None),
        SaturationFunctions::linear(),
        &disc,
    );
    let wells = Wells::new(
        vec![
            WellSpec::injector("INJ", 5.0, Phase::Water)
                .perforate(grid.cell_index(0, 0, 0), 1.0e-12, 5.0)
                .with_control(WellControl::surface_rate(RATE, &[Phase::Water])),
            WellSpec::producer("PROD", 5.0)
                .perforate(grid.cell_index(9, 9, 0), 1.0e-12, 5.0)
                .with_control(WellControl::surface_rate(RATE, &[Phase::Water])),
        ],
        Vec::new(),
        100,
    )
    .unwrap();
    let state = ReservoirState::new(100, 200.0 * BARSA, [1.0, 0.0, 0.0]);
    Simulator::new(config, disc, props, Arc::new(wells), state).unwrap()
}

#[test]
fn test_flux_across_the_diagonal_cut() {
    let mut sim = simulator();
    let mut sink = MemorySink::default();
    let report = sim.run(&[DAY], &mut sink).unwrap();
    assert!(report.converged);
    assert_eq!(sink.snapshots.len(), 1);
    assert_relative_eq!(sim.time(), DAY, max_relative = 1e-12);

    let model = sim.model();
    let p = &model.state().pressure;
    assert!(p[0] > p[99], "injector {} producer {}", p[0], p[99]);

    let ws = model.well_state();
    assert_relative_eq!(ws.rate(0, 0), RATE, max_relative = 1e-6);
    assert_relative_eq!(ws.rate(0, 1), -RATE, max_relative = 1e-6);
    assert!(ws.bhp[0] > p[0] && ws.bhp[1] < p[99]);

    // every face between the diagonals i + j = 9 and i + j = 10 points away from the injector
    let diagonal = |c: usize| c % 10 + c / 10;
    let flux = &model.connection_fluxes()[0];
    let crossing: Vec<f64> = model
        .discretization()
        .operators()
        .connections()
        .iter()
        .enumerate()
        .filter(|(_, &(l, r))| diagonal(l) == 9 && diagonal(r) == 10)
        .map(|(f, _)| flux[f])
        .collect();
    assert_eq!(crossing.len(), 18);
    // Flow concentrates along the line between the wells, so the faces do not share the rate
    // evenly: each carries a positive part of it and together they carry all of it.
    assert!(crossing.iter().all(|&q| q > 0.0 && q < RATE), "{crossing:?}");
    let largest = crossing.iter().copied().fold(0.0, f64::max);
    assert!(largest > RATE / 18.0);
    assert_relative_eq!(crossing.iter().sum::<f64>(), RATE, max_relative = 1e-2);
}

#[test]
fn test_pressure_is_symmetric_about_the_diagonal() {
    let mut sim = simulator();
    sim.step(DAY).unwrap();
    let p = &sim.model().state().pressure;
    for i in 0..10 {
        for j in 0..i {
            assert_relative_eq!(p[i + 10 * j], p[j + 10 * i], max_relative = 1e-6);
        }
    }
}
