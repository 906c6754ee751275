//! Report step loop over the model, the Newton solver and the sub-step driver.

use std::sync::Arc;

use nonlinear::{NLSolver, Newton};

use crate::{
    config::Config,
    model::{BlackoilModel, Discretization, ModelSnapshot},
    output::{SnapshotSink, StateSnapshot},
    props::FluidProps,
    report::SimulationReport,
    state::ReservoirState,
    timestep::{AdaptiveTimeStepping, SubStepSolver},
    wells::Wells,
    Error,
};

/// One Newton solve of the model per sub-step.
pub struct NewtonStepper {
    model: BlackoilModel,
    newton: Newton,
}

impl NewtonStepper {
    pub fn new(model: BlackoilModel, newton: Newton) -> Self {
        NewtonStepper { model, newton }
    }

    pub fn model(&self) -> &BlackoilModel {
        &self.model
    }

    pub fn newton(&self) -> &Newton {
        &self.newton
    }

    fn report(&self, well_iterations: usize) -> SimulationReport {
        SimulationReport::from_newton(self.newton.report(), well_iterations)
    }
}

impl SubStepSolver for NewtonStepper {
    type Snapshot = ModelSnapshot;

    fn step(&mut self, dt: f64) -> Result<SimulationReport, Error> {
        let wells_before = self.model.well_iterations();
        self.model.prepare_step(dt)?;
        self.newton.solve(&mut self.model)?;
        self.model.finish_step();
        Ok(self.report(self.model.well_iterations() - wells_before))
    }

    fn snapshot(&self) -> ModelSnapshot {
        self.model.snapshot()
    }

    fn restore(&mut self, snapshot: &ModelSnapshot) {
        self.model.restore(snapshot);
    }

    fn relative_change(&self, previous: &ModelSnapshot) -> f64 {
        self.model.relative_change(previous)
    }

    fn failed_report(&self) -> SimulationReport {
        SimulationReport {
            failed: true,
            converged: false,
            ..self.report(0)
        }
    }
}

/// Runs a model through a schedule of report steps.
pub struct Simulator {
    stepper: NewtonStepper,
    driver: AdaptiveTimeStepping,
    pool: Option<rayon::ThreadPool>,
    fip_regions: Option<Vec<usize>>,
    time: f64,
    report_step: usize,
    total: SimulationReport,
}

impl Simulator {
    /// # Errors
    ///
    /// Errors of [`BlackoilModel::new`], and `Error::Config` when the thread pool cannot be
    /// built.
    pub fn new(
        config: Config,
        disc: Arc<Discretization>,
        props: Arc<dyn FluidProps>,
        wells: Arc<Wells>,
        state: ReservoirState,
    ) -> Result<Self, Error> {
        let model = BlackoilModel::new(
            config.model.clone(),
            config.linear.clone(),
            disc,
            props,
            wells,
            state,
        )?;
        Self::from_model(config, model)
    }

    /// Wraps an already configured model, e.g. one with threshold pressures or a communicator.
    pub fn from_model(config: Config, model: BlackoilModel) -> Result<Self, Error> {
        let pool = match config.model.threads {
            0 => None,
            n => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| Error::Config(format!("threads: {e}")))?,
            ),
        };
        Ok(Simulator {
            stepper: NewtonStepper::new(model, Newton::new(config.newton.clone())),
            driver: AdaptiveTimeStepping::new(config.timestep),
            pool,
            fip_regions: None,
            time: 0.0,
            report_step: 0,
            total: SimulationReport::default(),
        })
    }

    /// Adds fluid in place per region to every snapshot.
    pub fn with_fip_regions(mut self, regions: Vec<usize>) -> Self {
        self.fip_regions = Some(regions);
        self
    }

    pub fn with_driver(mut self, driver: AdaptiveTimeStepping) -> Self {
        self.driver = driver;
        self
    }

    pub fn model(&self) -> &BlackoilModel {
        self.stepper.model()
    }

    /// Simulated time, s.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn report_step(&self) -> usize {
        self.report_step
    }

    /// Everything done since the simulator was built.
    pub fn total_report(&self) -> &SimulationReport {
        &self.total
    }

    /// Advances over one report step of `length` seconds.
    pub fn step(&mut self, length: f64) -> Result<SimulationReport, Error> {
        let Simulator {
            stepper,
            driver,
            pool,
            time,
            report_step,
            ..
        } = self;
        let report = match pool {
            Some(pool) => {
                pool.install(|| driver.step_report(stepper, *report_step, *time, length))?
            }
            None => driver.step_report(stepper, *report_step, *time, length)?,
        };
        self.time += length;
        self.report_step += 1;
        self.total += &report;
        Ok(report)
    }

    /// State at the current time.
    pub fn snapshot(&self) -> Result<StateSnapshot, Error> {
        let model = self.stepper.model();
        let state = model.state();
        let ws = model.well_state();
        let fluid_in_place = match &self.fip_regions {
            Some(regions) => Some(model.fluid_in_place(regions)?),
            None => None,
        };
        Ok(StateSnapshot {
            report_step: self.report_step,
            time: self.time,
            pressure: state.pressure.clone(),
            saturation: state.saturation.clone(),
            rs: state.rs.clone(),
            rv: state.rv.clone(),
            bhp: ws.bhp.clone(),
            surface_rates: ws.surface_rates.clone(),
            fluid_in_place,
        })
    }

    /// Runs every report step of `schedule` (lengths in seconds), writing a snapshot after
    /// each one.
    pub fn run(
        &mut self,
        schedule: &[f64],
        sink: &mut dyn SnapshotSink,
    ) -> Result<SimulationReport, Error> {
        let mut report = SimulationReport::default();
        for &length in schedule {
            report += &self.step(length)?;
            sink.write(self.snapshot()?)?;
        }
        sink.finish()?;
        Ok(report)
    }
}
