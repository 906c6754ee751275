//! Fluid in place per region.

use nalgebra::DVector;
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{
    phases::{Phase, PhaseUsage},
    state::ReservoirState,
    Error,
};

/// Surface volumes in place and pore volume of one region.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FluidInPlace {
    pub water: f64,
    /// liquid oil plus oil vaporized in the gas
    pub oil: f64,
    /// free gas plus gas dissolved in the oil
    pub gas: f64,
    pub pore_volume: f64,
    /// hydrocarbon pore volume weighted pressure, zero without hydrocarbons
    pub pressure: f64,
}

/// Sums the fluid in place over the owned cells of every region.
///
/// `pv` is the effective pore volume per cell, `b` the inverse formation volume factors in
/// canonical order (`None` for inactive phases). The result has one entry per region index up
/// to the largest one in `regions`.
#[allow(clippy::too_many_arguments)]
pub fn fluid_in_place(
    pu: &PhaseUsage,
    regions: &[usize],
    pv: &DVector<f64>,
    state: &ReservoirState,
    b: [Option<&DVector<f64>>; 3],
    rs: &DVector<f64>,
    rv: &DVector<f64>,
    owned: &[bool],
) -> Result<Vec<FluidInPlace>, Error> {
    let nc = pv.len();
    if regions.len() != nc {
        return Err(Error::Config(format!(
            "{} fluid in place regions for {nc} cells",
            regions.len()
        )));
    }
    let nreg = regions.iter().max().map_or(0, |&r| r + 1);
    let mut fip = vec![FluidInPlace::default(); nreg];
    let mut hc_pv = vec![0.0; nreg];
    let value = |phase: Phase, c: usize| b[phase.index()].map_or(0.0, |b| b[c]);
    for c in 0..nc {
        if !owned.get(c).copied().unwrap_or(true) {
            continue;
        }
        let r = &mut fip[regions[c]];
        let [sw, so, sg] = [Phase::Water, Phase::Oil, Phase::Gas].map(|p| state.saturation(p)[c]);
        let water = sw * value(Phase::Water, c);
        let oil = so * value(Phase::Oil, c);
        let gas = sg * value(Phase::Gas, c);
        r.water += pv[c] * water;
        r.oil += pv[c] * (oil + rv[c] * gas);
        r.gas += pv[c] * (gas + rs[c] * oil);
        r.pore_volume += pv[c];

        let hc = if pu.is_active(Phase::Water) { pv[c] * (1.0 - sw) } else { pv[c] };
        r.pressure += hc * state.pressure[c];
        hc_pv[regions[c]] += hc;
    }
    for (r, &hc) in fip.iter_mut().zip(&hc_pv) {
        r.pressure = if hc > 0.0 { r.pressure / hc } else { 0.0 };
    }
    Ok(fip)
}
