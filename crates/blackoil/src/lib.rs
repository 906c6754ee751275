//! Fully-implicit three-phase black-oil reservoir simulation.
//!
//! A [`BlackoilModel`] owns the reservoir and well state of a [`Discretization`] and assembles
//! the mass balance, well flux and well control residuals as automatic differentiation
//! expressions (see the `ad` crate). The model implements [`nonlinear::NLProblem`], so a
//! [`nonlinear::Newton`] solver drives it to convergence using the CPR preconditioned Krylov
//! solvers of the `linear` crate. [`AdaptiveTimeStepping`] splits report steps into sub-steps
//! and restarts failed ones; [`Simulator`] ties everything together.
//!
//! Units are SI throughout (see [`units`]). Saturations and per-phase arrays use the canonical
//! order water, oil, gas; equations and primary variables only exist for active phases.

mod clock;
mod config;
mod error;
mod fip;
pub mod geology;
pub mod grid;
pub mod model;
pub mod ops;
mod output;
mod phases;
pub mod primary;
pub mod props;
mod report;
pub mod rock;
mod simulator;
pub mod state;
pub mod timestep;
pub mod units;
pub mod wells;

pub use clock::{Clock, SystemClock};
pub use config::{Config, ModelConfig, TimeStepConfig};
pub use error::Error;
pub use fip::FluidInPlace;
pub use model::{BlackoilModel, Discretization, ModelSnapshot};
pub use output::{AsyncSnapshotWriter, MemorySink, SnapshotSink, StateSnapshot};
pub use phases::{Phase, PhaseUsage};
pub use report::SimulationReport;
pub use simulator::{NewtonStepper, Simulator};
pub use timestep::{AdaptiveTimeStepping, ControlType, SubStepSolver};
