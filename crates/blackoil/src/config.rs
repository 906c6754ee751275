//! Run configuration and its string key/value front end.

use linear::LinearSolverOptions;
use nonlinear::{NewtonOptions, RelaxType};
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{geology::TransmissibilityModel, timestep::ControlType, Error};

/// Tolerances, limits and switches of the black-oil model.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ModelConfig {
    pub tolerance_mb: f64,
    pub tolerance_cnv: f64,
    /// CNV tolerance once `max_strict_iter` iterations have been spent
    pub tolerance_cnv_relaxed: f64,
    pub max_strict_iter: usize,
    /// well flux residual tolerance, reservoir m³/s
    pub tolerance_wells: f64,
    /// control equation residual tolerance, relative to the target
    pub tolerance_well_control: f64,
    pub max_residual_allowed: f64,
    pub dp_max_rel: f64,
    pub ds_max: f64,
    pub dr_max_rel: f64,
    /// limit on `|Δbhp| / bhp` per iteration
    pub dbhp_max_rel: f64,
    pub solve_welleq_initially: bool,
    pub update_equations_scaling: bool,
    /// water, oil, gas
    pub fixed_equation_scaling: [f64; 3],
    pub use_threshold_pressure: bool,
    pub use_multiphase_upwind: bool,
    pub min_pore_volume: f64,
    pub opmfil: bool,
    pub transmissibility: TransmissibilityModel,
    /// size of the rayon pool, 0 for the global pool
    pub threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            tolerance_mb: 1.0e-7,
            tolerance_cnv: 1.0e-3,
            tolerance_cnv_relaxed: 1.0e-1,
            max_strict_iter: 8,
            tolerance_wells: 1.0e-7,
            tolerance_well_control: 1.0e-7,
            max_residual_allowed: 1.0e7,
            dp_max_rel: 1.0e9,
            ds_max: 0.2,
            dr_max_rel: 1.0e9,
            dbhp_max_rel: 1.0,
            solve_welleq_initially: true,
            update_equations_scaling: false,
            fixed_equation_scaling: [1.1169, 1.0031, 0.0031],
            use_threshold_pressure: false,
            use_multiphase_upwind: false,
            min_pore_volume: 0.0,
            opmfil: true,
            transmissibility: TransmissibilityModel::Tpfa,
            threads: 0,
        }
    }
}

/// Settings of the adaptive sub-step driver.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct TimeStepConfig {
    pub control: ControlType,
    /// target relative change per sub-step
    pub control_tol: f64,
    /// desired Newton iterations per sub-step (`pid+iteration` only)
    pub target_iterations: usize,
    /// first sub-step as a fraction of the report step
    pub initial_fraction: f64,
    /// factor applied to a failed sub-step
    pub restart_factor: f64,
    /// growth cap right after a restart
    pub growth_factor: f64,
    /// growth cap of any sub-step
    pub max_growth: f64,
    /// consecutive failures tolerated before aborting
    pub max_restarts: usize,
    pub min_step: f64,
    pub max_step: f64,
}

impl Default for TimeStepConfig {
    fn default() -> Self {
        TimeStepConfig {
            control: ControlType::Pid,
            control_tol: 1.0e-1,
            target_iterations: 20,
            initial_fraction: 0.25,
            restart_factor: 0.33,
            growth_factor: 2.0,
            max_growth: 3.0,
            max_restarts: 10,
            min_step: 1.0e-3,
            max_step: f64::INFINITY,
        }
    }
}

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct Config {
    pub model: ModelConfig,
    pub newton: NewtonOptions,
    pub linear: LinearSolverOptions,
    pub timestep: TimeStepConfig,
    /// capacity of the asynchronous snapshot queue
    pub output_queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            model: ModelConfig::default(),
            newton: NewtonOptions::default(),
            linear: LinearSolverOptions::default(),
            timestep: TimeStepConfig::default(),
            output_queue_size: 4,
        }
    }
}

impl Config {
    /// Builds a configuration from the defaults and a list of `(key, value)` pairs.
    ///
    /// # Errors
    ///
    /// `Error::Config` on an unknown key or a value that does not parse.
    pub fn from_params<I, K, V>(params: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Config::default();
        for (key, value) in params {
            config.set(key.as_ref(), value.as_ref())?;
        }
        Ok(config)
    }

    /// Sets a single recognized key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), Error> {
        let value = value.trim();
        let m = &mut self.model;
        let t = &mut self.timestep;
        match key {
            "tolerance_mb" => m.tolerance_mb = positive(key, value)?,
            "tolerance_cnv" => m.tolerance_cnv = positive(key, value)?,
            "tolerance_cnv_relaxed" => m.tolerance_cnv_relaxed = positive(key, value)?,
            "max_strict_iter" => m.max_strict_iter = parse(key, value)?,
            "tolerance_wells" => m.tolerance_wells = positive(key, value)?,
            "tolerance_well_control" => m.tolerance_well_control = positive(key, value)?,
            "max_residual_allowed" => m.max_residual_allowed = positive(key, value)?,
            "dp_max_rel" => m.dp_max_rel = positive(key, value)?,
            "ds_max" => m.ds_max = positive(key, value)?,
            "dr_max_rel" => m.dr_max_rel = positive(key, value)?,
            "dbhp_max_rel" => m.dbhp_max_rel = positive(key, value)?,
            "solve_welleq_initially" => m.solve_welleq_initially = boolean(key, value)?,
            "update_equations_scaling" => m.update_equations_scaling = boolean(key, value)?,
            "fixed_equation_scaling" => {
                let parts = value
                    .split(',')
                    .map(|s| positive(key, s.trim()))
                    .collect::<Result<Vec<f64>, Error>>()?;
                m.fixed_equation_scaling = parts.try_into().map_err(|_| {
                    Error::Config(format!("{key}: expected three comma separated values"))
                })?;
            }
            "use_threshold_pressure" => m.use_threshold_pressure = boolean(key, value)?,
            "use_multiphase_upwind" => m.use_multiphase_upwind = boolean(key, value)?,
            "min_pore_volume" => m.min_pore_volume = non_negative(key, value)?,
            "opmfil" => m.opmfil = boolean(key, value)?,
            "transmissibility" => m.transmissibility = value.parse()?,
            "threads" => m.threads = parse(key, value)?,

            "max_iter" => self.newton.max_iter = parse(key, value)?,
            "min_iter" => self.newton.min_iter = parse(key, value)?,
            "relax_type" => {
                self.newton.relax_type = value
                    .parse::<RelaxType>()
                    .map_err(|e| Error::Config(format!("{key}: {e}")))?
            }
            "relax_max" => self.newton.relax_max = positive(key, value)?,
            "relax_increment" => self.newton.relax_increment = positive(key, value)?,
            "relax_rel_tol" => self.newton.relax_rel_tol = positive(key, value)?,

            "timestep.control" => t.control = value.parse()?,
            "timestep.control.tol" => t.control_tol = positive(key, value)?,
            "timestep.control.targetiteration" => t.target_iterations = parse(key, value)?,
            "timestep.max_growth" => t.max_growth = positive(key, value)?,
            "timestep.min_step" => t.min_step = positive(key, value)?,
            "timestep.max_step" => t.max_step = positive(key, value)?,
            "solver.initialfraction" => t.initial_fraction = positive(key, value)?,
            "solver.restartfactor" => t.restart_factor = fraction(key, value)?,
            "solver.growthfactor" => t.growth_factor = positive(key, value)?,
            "solver.restart" => t.max_restarts = parse(key, value)?,

            "linear_solver_reduction" => self.linear.reduction = positive(key, value)?,
            "linear_solver_maxiter" => self.linear.max_iter = parse(key, value)?,
            "linear_solver_restart" => self.linear.restart = parse(key, value)?,
            "linear_solver_verbosity" => self.linear.verbosity = parse(key, value)?,
            "newton_use_gmres" => self.linear.use_gmres = boolean(key, value)?,
            "linear_solver_use_amg" => self.linear.use_amg = boolean(key, value)?,

            "output_queue_size" => self.output_queue_size = parse(key, value)?,
            _ => return Err(Error::Config(format!("unknown key '{key}'"))),
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, Error> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{key}: cannot parse '{value}'")))
}

fn non_negative(key: &str, value: &str) -> Result<f64, Error> {
    let v: f64 = parse(key, value)?;
    if v.is_nan() || v < 0.0 {
        return Err(Error::Config(format!("{key}: expected a non-negative number, got {v}")));
    }
    Ok(v)
}

fn positive(key: &str, value: &str) -> Result<f64, Error> {
    let v = non_negative(key, value)?;
    if v == 0.0 {
        return Err(Error::Config(format!("{key}: expected a positive number")));
    }
    Ok(v)
}

fn fraction(key: &str, value: &str) -> Result<f64, Error> {
    let v = positive(key, value)?;
    if v >= 1.0 {
        return Err(Error::Config(format!("{key}: expected a value below 1, got {v}")));
    }
    Ok(v)
}

fn boolean(key: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::Config(format!("{key}: expected a boolean, got '{value}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.model.tolerance_mb, 1e-7);
        assert_eq!(c.model.tolerance_cnv, 1e-3);
        assert_eq!(c.model.fixed_equation_scaling, [1.1169, 1.0031, 0.0031]);
        assert!(c.model.opmfil);
        assert_eq!(c.timestep.control, ControlType::Pid);
        assert_eq!(c.timestep.restart_factor, 0.33);
        assert_eq!(c.linear.max_iter, 150);
        assert!(!c.linear.use_gmres);
    }

    #[test]
    fn test_from_params() {
        let c = Config::from_params([
            ("tolerance_cnv", "1e-4"),
            ("relax_type", "sor"),
            ("timestep.control", "pid+iteration"),
            ("timestep.control.targetiteration", "8"),
            ("solver.restart", "3"),
            ("solver.restartfactor", "0.5"),
            ("newton_use_gmres", "true"),
            ("linear_solver_use_amg", "false"),
            ("fixed_equation_scaling", "1, 2, 3"),
            ("transmissibility", "directional"),
            ("opmfil", "false"),
        ])
        .unwrap();
        assert_eq!(c.model.tolerance_cnv, 1e-4);
        assert_eq!(c.newton.relax_type, RelaxType::Sor);
        assert_eq!(c.timestep.control, ControlType::PidAndIteration);
        assert_eq!(c.timestep.target_iterations, 8);
        assert_eq!(c.timestep.max_restarts, 3);
        assert_eq!(c.timestep.restart_factor, 0.5);
        assert!(c.linear.use_gmres);
        assert!(!c.linear.use_amg);
        assert_eq!(c.model.fixed_equation_scaling, [1.0, 2.0, 3.0]);
        assert_eq!(c.model.transmissibility, TransmissibilityModel::Directional);
        assert!(!c.model.opmfil);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            Config::from_params([("tolerance_foo", "1")]),
            Err(Error::Config(_))
        ));
        assert!(Config::from_params([("ds_max", "abc")]).is_err());
        assert!(Config::from_params([("solver.restartfactor", "1.5")]).is_err());
        assert!(Config::from_params([("fixed_equation_scaling", "1,2")]).is_err());
        assert!(Config::from_params([("relax_type", "over")]).is_err());
    }
}
