//! Relative permeability and capillary pressure of one saturation region.

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use super::Table1D;
use crate::phases::{Phase, PhaseUsage};

/// `kr = kr_max ((s − s_min) / (s_max − s_min))^n`, constant outside `[s_min, s_max]`.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Corey {
    pub s_min: f64,
    pub s_max: f64,
    pub exponent: f64,
    pub kr_max: f64,
}

impl Corey {
    /// `kr = s` on `[0, 1]`.
    pub fn linear() -> Self {
        Corey {
            s_min: 0.0,
            s_max: 1.0,
            exponent: 1.0,
            kr_max: 1.0,
        }
    }

    pub fn eval(&self, s: f64) -> (f64, f64) {
        let width = self.s_max - self.s_min;
        if width <= 0.0 || s <= self.s_min {
            return (0.0, 0.0);
        }
        if s >= self.s_max {
            return (self.kr_max, 0.0);
        }
        let se = (s - self.s_min) / width;
        (
            self.kr_max * se.powf(self.exponent),
            self.kr_max * self.exponent * se.powf(self.exponent - 1.0) / width,
        )
    }
}

/// Relative permeabilities `kr[i]` and their derivatives `dkr[i][j] = ∂kr_i/∂S_j`, canonical
/// phase order.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RelPermEval {
    pub kr: [f64; 3],
    pub dkr: [[f64; 3]; 3],
}

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct SaturationFunctions {
    pub krw: Corey,
    pub krg: Corey,
    /// oil in water, against oil saturation
    pub krow: Corey,
    /// oil in gas, against oil saturation
    pub krog: Corey,
    /// connate water saturation
    pub swco: f64,
    /// `P_cow(S_w)`
    pub pcow: Option<Table1D>,
    /// `P_cog(S_g)`
    pub pcog: Option<Table1D>,
}

impl SaturationFunctions {
    /// Corey curves from end points; `exponents` are `[n_w, n_ow, n_g, n_og]`.
    pub fn corey(swco: f64, sorw: f64, sorg: f64, sgcr: f64, exponents: [f64; 4]) -> Self {
        let [nw, now, ng, nog] = exponents;
        SaturationFunctions {
            krw: Corey {
                s_min: swco,
                s_max: 1.0 - sorw,
                exponent: nw,
                kr_max: 1.0,
            },
            krg: Corey {
                s_min: sgcr,
                s_max: 1.0 - swco - sorg,
                exponent: ng,
                kr_max: 1.0,
            },
            krow: Corey {
                s_min: sorw,
                s_max: 1.0 - swco,
                exponent: now,
                kr_max: 1.0,
            },
            krog: Corey {
                s_min: sorg,
                s_max: 1.0 - swco,
                exponent: nog,
                kr_max: 1.0,
            },
            swco,
            pcow: None,
            pcog: None,
        }
    }

    /// Straight lines without residual saturations.
    pub fn linear() -> Self {
        SaturationFunctions {
            krw: Corey::linear(),
            krg: Corey::linear(),
            krow: Corey::linear(),
            krog: Corey::linear(),
            swco: 0.0,
            pcow: None,
            pcog: None,
        }
    }

    pub fn with_capillary_pressure(mut self, pcow: Option<Table1D>, pcog: Option<Table1D>) -> Self {
        self.pcow = pcow;
        self.pcog = pcog;
        self
    }

    pub fn relperm(&self, pu: &PhaseUsage, s: [f64; 3]) -> RelPermEval {
        let (w, o, g) = (Phase::Water.index(), Phase::Oil.index(), Phase::Gas.index());
        let mut out = RelPermEval::default();
        if pu.num_phases() == 1 {
            if let Some(p) = pu.phase_at(0) {
                out.kr[p.index()] = 1.0;
            }
            return out;
        }
        if pu.is_active(Phase::Water) {
            let (k, dk) = self.krw.eval(s[w]);
            out.kr[w] = k;
            out.dkr[w][w] = dk;
        }
        if pu.is_active(Phase::Gas) {
            let (k, dk) = self.krg.eval(s[g]);
            out.kr[g] = k;
            out.dkr[g][g] = dk;
        }
        if !pu.is_active(Phase::Oil) {
            return out;
        }
        match (pu.is_active(Phase::Water), pu.is_active(Phase::Gas)) {
            (true, true) => {
                let (kow, dkow) = self.krow.eval(s[o]);
                let (kog, dkog) = self.krog.eval(s[o]);
                let wg = s[g].max(0.0);
                let ww = (s[w] - self.swco).max(0.0);
                let d = wg + ww;
                if d < 1e-12 {
                    out.kr[o] = kow;
                    out.dkr[o][o] = dkow;
                } else {
                    let kro = (wg * kog + ww * kow) / d;
                    out.kr[o] = kro;
                    out.dkr[o][o] = (wg * dkog + ww * dkow) / d;
                    if s[g] > 0.0 {
                        out.dkr[o][g] = (kog - kro) / d;
                    }
                    if s[w] > self.swco {
                        out.dkr[o][w] = (kow - kro) / d;
                    }
                }
            }
            (true, false) => {
                let (k, dk) = self.krow.eval(s[o]);
                out.kr[o] = k;
                out.dkr[o][o] = dk;
            }
            _ => {
                let (k, dk) = self.krog.eval(s[o]);
                out.kr[o] = k;
                out.dkr[o][o] = dk;
            }
        }
        out
    }

    /// Offsets of the phase pressures from the oil pressure, with their saturation slopes:
    /// `p_w = p_o − P_cow(S_w)` and `p_g = p_o + P_cog(S_g)`.
    pub fn pressure_offsets(&self, s: [f64; 3]) -> ([f64; 3], [f64; 3]) {
        let mut pc = [0.0; 3];
        let mut dpc = [0.0; 3];
        if let Some(t) = &self.pcow {
            let (v, d) = t.eval_with_slope(s[Phase::Water.index()]);
            pc[Phase::Water.index()] = -v;
            dpc[Phase::Water.index()] = -d;
        }
        if let Some(t) = &self.pcog {
            let (v, d) = t.eval_with_slope(s[Phase::Gas.index()]);
            pc[Phase::Gas.index()] = v;
            dpc[Phase::Gas.index()] = d;
        }
        (pc, dpc)
    }
}
