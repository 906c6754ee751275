//! A producer on bottom-hole pressure control with an oil rate limit that the drawdown breaks.

mod common;

use std::sync::Arc;

use approx::assert_relative_eq;
use blackoil::{
    grid::CartesianGrid,
    props::SaturationFunctions,
    state::ReservoirState,
    units::{BARSA, CENTI_POISE, DAY},
    wells::{WellControl, WellSpec, Wells},
    BlackoilModel, Config, Phase, PhaseUsage,
};
use nonlinear::{NLProblem, NLSolver, Newton, NewtonOptions};

const OIL_LIMIT: f64 = 2.0e-5;
const BHP_LIMIT: f64 = 200.0 * BARSA;

fn model() -> BlackoilModel {
    let mut config = Config::default();
    config.model.solve_welleq_initially = false;
    let grid = CartesianGrid::new([10, 1, 1], [10.0; 3]).unwrap();
    let disc = common::discretize(&grid, 0.2, 100.0, &config, 0.0);
    let props = common::props(
        PhaseUsage::water_oil(),
        common::tables(
            Some(common::water(4.0e-10, 0.5 * CENTI_POISE)),
            Some(common::dead_oil()),
            None,
        ),
        SaturationFunctions::corey(0.2, 0.2, 0.0, 0.0, [2.0; 4]),
        &disc,
    );
    let wells = Wells::new(
        vec![WellSpec::producer("PROD", 5.0)
            .perforate(9, 1.0e-12, 5.0)
            .with_control(WellControl::bhp(BHP_LIMIT))
            .with_control(WellControl::surface_rate(OIL_LIMIT, &[Phase::Oil]))],
        Vec::new(),
        10,
    )
    .unwrap();
    let state = ReservoirState::new(10, 250.0 * BARSA, [0.2, 0.8, 0.0]);
    BlackoilModel::new(config.model, config.linear, disc, props, Arc::new(wells), state).unwrap()
}

#[test]
fn test_rate_limit_takes_over() {
    let mut model = model();
    assert_eq!(model.well_state().current_control, vec![0]);
    assert_eq!(model.well_state().bhp[0], BHP_LIMIT);

    // one Newton iteration on pressure control overshoots the rate limit
    model.prepare_step(DAY).unwrap();
    model.sys(0).unwrap();
    let dx = NLProblem::solve(&mut model).unwrap();
    model.update(&dx).unwrap();
    assert_eq!(model.well_state().current_control, vec![1]);
    assert_relative_eq!(model.well_state().rate(1, 0), -OIL_LIMIT, max_relative = 1e-12);

    let mut newton = Newton::new(NewtonOptions {
        max_iter: 15,
        ..Default::default()
    });
    newton.solve(&mut model).unwrap();
    model.finish_step();

    let ws = model.well_state();
    assert_eq!(ws.current_control, vec![1]);
    assert_relative_eq!(ws.rate(1, 0), -OIL_LIMIT, max_relative = 1e-6);
    // less drawdown than the pressure limit allows
    assert!(ws.bhp[0] > BHP_LIMIT);
    assert!(ws.bhp[0] < model.state().pressure[9]);

    // checking the controls again changes nothing
    let mut again = ws.clone();
    let switched = model
        .wells()
        .update_controls(model.phase_usage(), &mut again, &[[0.0; 3]], &[0.0])
        .unwrap();
    assert_eq!(switched, 0);
    assert_eq!(&again, ws);

    model.prepare_step(DAY).unwrap();
    newton.solve(&mut model).unwrap();
    model.finish_step();
    assert_eq!(model.well_state().current_control, vec![1]);
    assert_relative_eq!(
        model.cumulative_well_volumes(0)[1],
        -2.0 * DAY * OIL_LIMIT,
        max_relative = 1e-3
    );
}
