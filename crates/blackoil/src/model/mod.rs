//! The fully-implicit black-oil model: owns the reservoir and well state and implements the
//! Newton problem over them.

mod assemble;
mod convergence;
mod discretization;
mod well_solve;

use std::sync::Arc;

use linear::{Communicator, LinearSolverOptions, SerialCommunicator, SystemSolver};
use nalgebra::DVector;
use nonlinear::{Convergence, NLProblem, NLSolver};

pub use convergence::{average_inverse_fvf, check_convergence, ConvergenceReport, Residuals};
pub use discretization::Discretization;
pub use well_solve::MAX_WELL_ITERATIONS;

use assemble::{Residual, WellTargets};

use crate::{
    config::ModelConfig,
    fip::{fluid_in_place, FluidInPlace},
    phases::{Phase, PhaseUsage},
    primary::{update_state, update_well_state, UpdateLimits},
    props::FluidProps,
    state::{ReservoirState, WellState},
    wells::{canonical_rates, Wells},
    Error,
};

/// State the adaptive driver restores after a failed sub-step.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSnapshot {
    pub state: ReservoirState,
    pub well_state: WellState,
    cumulative: Vec<[f64; 3]>,
}

pub struct BlackoilModel {
    config: ModelConfig,
    disc: Arc<Discretization>,
    props: Arc<dyn FluidProps>,
    wells: Arc<Wells>,
    pu: PhaseUsage,
    /// `0..num_cells`, the cell argument of the property evaluators
    cells: Vec<usize>,
    comm: Arc<dyn Communicator>,
    linear: SystemSolver,
    /// per connection
    threshold: Option<DVector<f64>>,

    state: ReservoirState,
    well_state: WellState,
    dt: f64,
    /// accumulation at the start of the step
    acc0: Vec<DVector<f64>>,
    residual: Residual,
    targets: WellTargets,
    b_avg: Vec<f64>,
    equation_scale: Vec<f64>,
    /// connection fluxes of the last assembly, per active phase
    fluxes: Vec<DVector<f64>>,
    /// surface volume injected per well and canonical phase since the start of the run
    cumulative: Vec<[f64; 3]>,
    pressure_scale: f64,
    last_convergence: ConvergenceReport,
    linear_iterations: usize,
    well_iterations: usize,
}

impl BlackoilModel {
    /// # Errors
    ///
    /// `Error::Config` when the state does not match the discretization,
    /// `Error::WellControlInfeasible` for wells whose initial control cannot be applied.
    pub fn new(
        config: ModelConfig,
        linear: LinearSolverOptions,
        disc: Arc<Discretization>,
        props: Arc<dyn FluidProps>,
        wells: Arc<Wells>,
        state: ReservoirState,
    ) -> Result<Self, Error> {
        let nc = disc.num_cells();
        state.check_size(nc)?;
        let pu = *props.phase_usage();
        let well_state = wells.initial_state(&pu, &state)?;
        let comm: Arc<dyn Communicator> = Arc::new(SerialCommunicator::new(nc));
        let mean_pressure = state.pressure.mean();
        let nw = wells.num_wells();
        Ok(BlackoilModel {
            linear: SystemSolver::new(linear, comm.clone()),
            comm,
            config,
            disc,
            props,
            wells,
            pu,
            cells: (0..nc).collect(),
            threshold: None,
            state,
            well_state,
            dt: 0.0,
            acc0: Vec::new(),
            residual: Residual::default(),
            targets: WellTargets::default(),
            b_avg: vec![1.0; pu.num_phases()],
            equation_scale: vec![1.0; pu.num_phases()],
            fluxes: Vec::new(),
            cumulative: vec![[0.0; 3]; nw],
            pressure_scale: if mean_pressure > 0.0 { mean_pressure } else { 1.0 },
            last_convergence: ConvergenceReport::default(),
            linear_iterations: 0,
            well_iterations: 0,
        })
    }

    /// Replaces the serial communicator, for runs on one part of a partitioned domain.
    pub fn with_communicator(mut self, comm: Arc<dyn Communicator>) -> Self {
        self.linear = SystemSolver::new(self.linear.options().clone(), comm.clone());
        self.comm = comm;
        self
    }

    /// Threshold pressures per connection, used when `use_threshold_pressure` is set.
    pub fn with_threshold_pressures(mut self, threshold: DVector<f64>) -> Result<Self, Error> {
        let nconn = self.disc.operators().num_connections();
        if threshold.len() != nconn {
            return Err(Error::Config(format!(
                "{} threshold pressures for {nconn} connections",
                threshold.len()
            )));
        }
        self.threshold = Some(threshold);
        Ok(self)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn phase_usage(&self) -> &PhaseUsage {
        &self.pu
    }

    pub fn discretization(&self) -> &Discretization {
        &self.disc
    }

    pub fn wells(&self) -> &Wells {
        &self.wells
    }

    pub fn state(&self) -> &ReservoirState {
        &self.state
    }

    pub fn well_state(&self) -> &WellState {
        &self.well_state
    }

    /// Surface volume fluxes of the last assembly per active phase and connection.
    pub fn connection_fluxes(&self) -> &[DVector<f64>] {
        &self.fluxes
    }

    /// Convergence measures of the last Newton iteration.
    pub fn last_convergence(&self) -> &ConvergenceReport {
        &self.last_convergence
    }

    /// Surface volume injected by well `w` per canonical phase since the start of the run;
    /// production is negative.
    pub fn cumulative_well_volumes(&self, w: usize) -> [f64; 3] {
        self.cumulative[w]
    }

    /// Total iterations of the well-only solve since the model was built.
    pub fn well_iterations(&self) -> usize {
        self.well_iterations
    }

    /// Computes the accumulation of the state at the start of a step of length `dt`.
    pub fn prepare_step(&mut self, dt: f64) -> Result<(), Error> {
        if dt.is_nan() || dt <= 0.0 {
            return Err(Error::Config(format!("step length must be positive, got {dt}")));
        }
        self.dt = dt;
        let (s, pp) = self.constant_props()?;
        self.acc0 = self
            .accumulation(&s, &pp)?
            .into_iter()
            .map(|a| a.value().clone())
            .collect();
        Ok(())
    }

    /// Books the converged well rates of the finished step.
    pub fn finish_step(&mut self) {
        for (w, total) in self.cumulative.iter_mut().enumerate() {
            let q = canonical_rates(&self.pu, &self.well_state, w);
            for p in 0..3 {
                total[p] += self.dt * q[p];
            }
        }
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            state: self.state.clone(),
            well_state: self.well_state.clone(),
            cumulative: self.cumulative.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: &ModelSnapshot) {
        self.state = snapshot.state.clone();
        self.well_state = snapshot.well_state.clone();
        self.cumulative = snapshot.cumulative.clone();
    }

    /// `‖u − u_prev‖ / ‖u‖` over the pressures (scaled by the initial mean pressure) and the
    /// saturations of the owned cells.
    pub fn relative_change(&self, previous: &ModelSnapshot) -> f64 {
        let mask = self.comm.owner_mask();
        let (mut diff, mut norm) = (0.0, 0.0);
        for c in 0..self.cells.len() {
            if !mask.get(c).copied().unwrap_or(true) {
                continue;
            }
            let p = self.state.pressure[c] / self.pressure_scale;
            let dp = p - previous.state.pressure[c] / self.pressure_scale;
            diff += dp * dp;
            norm += p * p;
            for phase in self.pu.active_phases() {
                let s = self.state.saturation(phase)[c];
                let ds = s - previous.state.saturation(phase)[c];
                diff += ds * ds;
                norm += s * s;
            }
        }
        let (diff, norm) = (self.comm.sum(diff), self.comm.sum(norm));
        if norm > 0.0 {
            (diff / norm).sqrt()
        } else {
            0.0
        }
    }

    /// Surface volume of each component in place, per active phase position, summed over the
    /// owned cells.
    pub fn component_totals(&self) -> Result<Vec<f64>, Error> {
        let (s, pp) = self.constant_props()?;
        let mask = self.comm.owner_mask();
        Ok(self
            .accumulation(&s, &pp)?
            .iter()
            .map(|a| {
                let local = a
                    .value()
                    .iter()
                    .enumerate()
                    .filter(|&(c, _)| mask.get(c).copied().unwrap_or(true))
                    .map(|(_, v)| v)
                    .sum();
                self.comm.sum(local)
            })
            .collect())
    }

    /// Fluid in place per region; `regions[c]` is the region of cell `c`.
    pub fn fluid_in_place(&self, regions: &[usize]) -> Result<Vec<FluidInPlace>, Error> {
        let (s, pp) = self.constant_props()?;
        let pvm = self
            .props
            .pore_mult(&s.p, &self.cells)?
            .value()
            .component_mul(self.disc.pore_volume());
        let b = |phase: Phase| self.pu.pos(phase).map(|i| pp.b[i].value());
        fluid_in_place(
            &self.pu,
            regions,
            &pvm,
            &self.state,
            [b(Phase::Water), b(Phase::Oil), b(Phase::Gas)],
            s.rs.value(),
            s.rv.value(),
            self.comm.owner_mask(),
        )
    }

    fn limits(&self) -> UpdateLimits {
        UpdateLimits {
            dp_max_rel: self.config.dp_max_rel,
            ds_max: self.config.ds_max,
            dr_max_rel: self.config.dr_max_rel,
            dbhp_max_rel: self.config.dbhp_max_rel,
        }
    }
}

impl NLProblem for BlackoilModel {
    type Error = Error;

    fn sys(&mut self, iteration: usize) -> Result<(), Error> {
        if iteration == 0 && self.config.solve_welleq_initially {
            self.well_iterations += self.solve_well_equations()?;
        }
        self.assemble()
    }

    fn ctest<NLS>(&mut self, solver: &NLS) -> Result<Convergence, Error>
    where
        NLS: NLSolver,
    {
        let mass: Vec<DVector<f64>> = self
            .residual
            .mass
            .iter()
            .map(|r| r.value().clone())
            .collect();
        let empty = DVector::zeros(0);
        let res = Residuals {
            mass: &mass,
            well_flux: self.residual.well_flux.as_ref().map_or(&empty, |r| r.value()),
            well_control: self
                .residual
                .well_control
                .as_ref()
                .map_or(&empty, |r| r.value()),
            control_scale: &self.residual.control_scale,
        };
        let report = check_convergence(
            &self.config,
            &self.pu,
            &*self.comm,
            &res,
            &self.b_avg,
            self.disc.pore_volume(),
            self.dt,
            solver.get_cur_iter(),
        )?;
        let conv = Convergence {
            converged: report.converged,
            residual_norms: report.cnv.clone(),
        };
        self.last_convergence = report;
        Ok(conv)
    }

    fn solve(&mut self) -> Result<DVector<f64>, Error> {
        let sys = self.linear_system()?;
        let dx = self.linear.solve(&sys)?;
        self.linear_iterations = self.linear.iterations();
        Ok(dx)
    }

    fn update(&mut self, dx: &DVector<f64>) -> Result<(), Error> {
        let ncv = self.pu.num_cell_vars() * self.cells.len();
        let limits = self.limits();
        let dx_c = dx.rows(0, ncv.min(dx.len())).into_owned();
        update_state(&*self.props, &mut self.state, &dx_c, &limits)?;
        if self.wells.num_wells() > 0 {
            let dx_w = dx.rows(ncv, dx.len() - ncv).into_owned();
            update_well_state(&mut self.well_state, &dx_w, limits.dbhp_max_rel)?;
            let rates = self.targets.reservoir_rates(self, &self.well_state);
            self.wells.update_controls(
                &self.pu,
                &mut self.well_state,
                &rates,
                &self.targets.voidage,
            )?;
        }
        Ok(())
    }

    fn num_linear_iters(&self) -> usize {
        self.linear_iterations
    }
}
