//! Reservoir and well state between Newton iterations.

use nalgebra::DVector;
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{phases::Phase, Error};

/// Meaning of the third cell primary variable.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HydroCarbonState {
    /// free gas and oil, the variable is `S_g`
    #[default]
    GasAndOil,
    /// undersaturated oil, the variable is `R_s`
    OilOnly,
    /// undersaturated gas, the variable is `R_v`
    GasOnly,
}

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ReservoirState {
    /// oil phase pressure, Pa
    pub pressure: DVector<f64>,
    pub temperature: DVector<f64>,
    /// canonical phase order, inactive phases hold zeros
    pub saturation: [DVector<f64>; 3],
    pub rs: DVector<f64>,
    pub rv: DVector<f64>,
    pub hydrocarbon_state: Vec<HydroCarbonState>,
}

/// Reference temperature of isothermal runs, K.
pub const STANDARD_TEMPERATURE: f64 = 288.15;

impl ReservoirState {
    /// Uniform pressure and saturation.
    pub fn new(num_cells: usize, pressure: f64, saturation: [f64; 3]) -> Self {
        ReservoirState {
            pressure: DVector::from_element(num_cells, pressure),
            temperature: DVector::from_element(num_cells, STANDARD_TEMPERATURE),
            saturation: saturation.map(|s| DVector::from_element(num_cells, s)),
            rs: DVector::zeros(num_cells),
            rv: DVector::zeros(num_cells),
            hydrocarbon_state: vec![HydroCarbonState::GasAndOil; num_cells],
        }
    }

    pub fn num_cells(&self) -> usize {
        self.pressure.len()
    }

    pub fn saturation(&self, phase: Phase) -> &DVector<f64> {
        &self.saturation[phase.index()]
    }

    pub fn set_saturation(&mut self, c: usize, s: [f64; 3]) {
        for (p, v) in s.into_iter().enumerate() {
            self.saturation[p][c] = v;
        }
    }

    /// Largest deviation of the saturation sum from one.
    pub fn saturation_sum_error(&self) -> f64 {
        (0..self.num_cells())
            .map(|c| (self.saturation.iter().map(|s| s[c]).sum::<f64>() - 1.0).abs())
            .fold(0.0, f64::max)
    }

    pub(crate) fn check_size(&self, num_cells: usize) -> Result<(), Error> {
        let ok = self.pressure.len() == num_cells
            && self.temperature.len() == num_cells
            && self.saturation.iter().all(|s| s.len() == num_cells)
            && self.rs.len() == num_cells
            && self.rv.len() == num_cells
            && self.hydrocarbon_state.len() == num_cells;
        if !ok {
            return Err(Error::Config(format!(
                "reservoir state does not have {num_cells} cells"
            )));
        }
        Ok(())
    }
}

/// Well unknowns and derived perforation quantities.
///
/// Rates are surface volumes per second, positive into the reservoir, stored phase-major over
/// the active phases: entry `p * num_wells + w`.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct WellState {
    pub bhp: DVector<f64>,
    pub surface_rates: DVector<f64>,
    /// production positive, phase-major over the perforations
    pub perf_rates: DVector<f64>,
    pub perf_pressures: DVector<f64>,
    /// index into each well's control list
    pub current_control: Vec<usize>,
}

impl Default for WellState {
    fn default() -> Self {
        WellState {
            bhp: DVector::zeros(0),
            surface_rates: DVector::zeros(0),
            perf_rates: DVector::zeros(0),
            perf_pressures: DVector::zeros(0),
            current_control: Vec::new(),
        }
    }
}

impl WellState {
    pub fn num_wells(&self) -> usize {
        self.bhp.len()
    }

    /// Surface rate of active phase position `pos` of well `w`.
    pub fn rate(&self, pos: usize, w: usize) -> f64 {
        self.surface_rates[pos * self.num_wells() + w]
    }

    pub fn set_rate(&mut self, pos: usize, w: usize, q: f64) {
        let nw = self.num_wells();
        self.surface_rates[pos * nw + w] = q;
    }
}
