//! Black-oil PVT: reciprocal formation volume factors, viscosities and saturated ratios.
//!
//! Every evaluation returns the value together with its partial derivatives with respect to
//! pressure and, where relevant, the dissolved (vaporized) ratio.

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use super::Table1D;
use crate::Error;

/// Value, `∂/∂p`, `∂/∂r`.
pub type Eval = (f64, f64, f64);

/// Constant-compressibility water (PVTW).
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct WaterPvt {
    pub p_ref: f64,
    /// formation volume factor at `p_ref`
    pub fvf_ref: f64,
    pub compressibility: f64,
    pub viscosity: f64,
    pub viscosibility: f64,
}

impl WaterPvt {
    pub fn b(&self, p: f64) -> (f64, f64) {
        let x = self.compressibility * (p - self.p_ref);
        (
            (1.0 + x + 0.5 * x * x) / self.fvf_ref,
            (1.0 + x) * self.compressibility / self.fvf_ref,
        )
    }

    pub fn mu(&self, p: f64) -> (f64, f64) {
        let y = -self.viscosibility * (p - self.p_ref);
        let den = 1.0 + y + 0.5 * y * y;
        (
            self.viscosity / den,
            self.viscosity * (1.0 + y) * self.viscosibility / (den * den),
        )
    }
}

fn reciprocal(p: &[f64], fvf: &[f64]) -> Result<Table1D, Error> {
    if let Some(b) = fvf.iter().find(|&&b| b.is_nan() || b <= 0.0) {
        return Err(Error::Props(format!("non-positive formation volume factor {b}")));
    }
    Table1D::new(p.to_vec(), fvf.iter().map(|b| 1.0 / b).collect())
}

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum OilPvt {
    /// PVDO
    Dead { b: Table1D, mu: Table1D },
    /// Saturated PVTO curves with a constant-compressibility undersaturated extension.
    Live {
        rs_sat: Table1D,
        b_sat: Table1D,
        mu_sat: Table1D,
        compressibility: f64,
        viscosibility: f64,
    },
}

impl OilPvt {
    /// Tables of formation volume factor and viscosity against pressure.
    pub fn dead(p: Vec<f64>, fvf: Vec<f64>, mu: Vec<f64>) -> Result<Self, Error> {
        Ok(OilPvt::Dead {
            b: reciprocal(&p, &fvf)?,
            mu: Table1D::new(p, mu)?,
        })
    }

    /// Saturated rows `(p, R_s, B_o, μ_o)`; `R_s` must increase with pressure.
    pub fn live(
        p: Vec<f64>,
        rs: Vec<f64>,
        fvf: Vec<f64>,
        mu: Vec<f64>,
        compressibility: f64,
        viscosibility: f64,
    ) -> Result<Self, Error> {
        let rs_sat = Table1D::new(p.clone(), rs)?;
        if !rs_sat.is_increasing() {
            return Err(Error::Props(
                "saturated gas-oil ratio must increase with pressure".into(),
            ));
        }
        Ok(OilPvt::Live {
            rs_sat,
            b_sat: reciprocal(&p, &fvf)?,
            mu_sat: Table1D::new(p, mu)?,
            compressibility,
            viscosibility,
        })
    }

    pub fn has_dissolved_gas(&self) -> bool {
        matches!(self, OilPvt::Live { .. })
    }

    pub fn rs_sat(&self, p: f64) -> (f64, f64) {
        match self {
            OilPvt::Dead { .. } => (0.0, 0.0),
            OilPvt::Live { rs_sat, .. } => rs_sat.eval_with_slope(p),
        }
    }

    /// Saturated curve `f` at pressure `p` or, when undersaturated, its value at the bubble
    /// point extended with `(1 + c (p − p_b))`.
    fn live_eval(rs_sat: &Table1D, f: &Table1D, c: f64, p: f64, rs: f64, saturated: bool) -> Eval {
        if saturated {
            let (v, dv) = f.eval_with_slope(p);
            return (v, dv, 0.0);
        }
        let (pb, dpb) = rs_sat.inverse_with_slope(rs);
        let (vb, dvb) = f.eval_with_slope(pb);
        let ext = 1.0 + c * (p - pb);
        (vb * ext, vb * c, (dvb * ext - vb * c) * dpb)
    }

    pub fn b(&self, p: f64, rs: f64, saturated: bool) -> Eval {
        match self {
            OilPvt::Dead { b, .. } => {
                let (v, dv) = b.eval_with_slope(p);
                (v, dv, 0.0)
            }
            OilPvt::Live {
                rs_sat,
                b_sat,
                compressibility,
                ..
            } => Self::live_eval(rs_sat, b_sat, *compressibility, p, rs, saturated),
        }
    }

    pub fn mu(&self, p: f64, rs: f64, saturated: bool) -> Eval {
        match self {
            OilPvt::Dead { mu, .. } => {
                let (v, dv) = mu.eval_with_slope(p);
                (v, dv, 0.0)
            }
            OilPvt::Live {
                rs_sat,
                mu_sat,
                viscosibility,
                ..
            } => Self::live_eval(rs_sat, mu_sat, *viscosibility, p, rs, saturated),
        }
    }
}

/// Dry gas (PVDG), optionally with a saturated vaporized oil ratio.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct GasPvt {
    b: Table1D,
    mu: Table1D,
    rv_sat: Option<Table1D>,
}

impl GasPvt {
    pub fn dry(p: Vec<f64>, fvf: Vec<f64>, mu: Vec<f64>) -> Result<Self, Error> {
        Ok(GasPvt {
            b: reciprocal(&p, &fvf)?,
            mu: Table1D::new(p, mu)?,
            rv_sat: None,
        })
    }

    pub fn with_rv_sat(mut self, p: Vec<f64>, rv: Vec<f64>) -> Result<Self, Error> {
        let t = Table1D::new(p, rv)?;
        if !t.is_increasing() {
            return Err(Error::Props(
                "saturated oil-gas ratio must increase with pressure".into(),
            ));
        }
        self.rv_sat = Some(t);
        Ok(self)
    }

    pub fn has_vaporized_oil(&self) -> bool {
        self.rv_sat.is_some()
    }

    pub fn rv_sat(&self, p: f64) -> (f64, f64) {
        self.rv_sat
            .as_ref()
            .map_or((0.0, 0.0), |t| t.eval_with_slope(p))
    }

    pub fn b(&self, p: f64, _rv: f64, _saturated: bool) -> Eval {
        let (v, dv) = self.b.eval_with_slope(p);
        (v, dv, 0.0)
    }

    pub fn mu(&self, p: f64, _rv: f64, _saturated: bool) -> Eval {
        let (v, dv) = self.mu.eval_with_slope(p);
        (v, dv, 0.0)
    }
}

/// PVT of one region.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct PvtTables {
    /// water, oil, gas, kg/m³
    pub surface_density: [f64; 3],
    pub water: Option<WaterPvt>,
    pub oil: Option<OilPvt>,
    pub gas: Option<GasPvt>,
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::units::{BARSA, CENTI_POISE};

    fn live() -> OilPvt {
        OilPvt::live(
            vec![100.0 * BARSA, 300.0 * BARSA],
            vec![50.0, 150.0],
            vec![1.2, 1.4],
            vec![1.0 * CENTI_POISE, 0.8 * CENTI_POISE],
            1e-9,
            2e-9,
        )
        .unwrap()
    }

    fn fd<F: Fn(f64) -> f64>(f: F, x: f64, h: f64) -> f64 {
        (f(x + h) - f(x - h)) / (2.0 * h)
    }

    #[test]
    fn test_water() {
        let w = WaterPvt {
            p_ref: 200.0 * BARSA,
            fvf_ref: 1.02,
            compressibility: 4.5e-10,
            viscosity: 0.5 * CENTI_POISE,
            viscosibility: 1e-9,
        };
        assert_relative_eq!(w.b(200.0 * BARSA).0, 1.0 / 1.02, max_relative = 1e-12);
        let p = 250.0 * BARSA;
        assert_relative_eq!(w.b(p).1, fd(|p| w.b(p).0, p, 1e3), max_relative = 1e-6);
        assert_relative_eq!(w.mu(p).1, fd(|p| w.mu(p).0, p, 1e3), max_relative = 1e-6);
    }

    #[test]
    fn test_live_oil_saturated_branch() {
        let o = live();
        let p = 200.0 * BARSA;
        let (rs, drs) = o.rs_sat(p);
        assert_relative_eq!(rs, 100.0, max_relative = 1e-12);
        assert_relative_eq!(drs, 100.0 / (200.0 * BARSA), max_relative = 1e-12);
        let (b, _, dbr) = o.b(p, rs, true);
        assert_relative_eq!(b, 0.5 * (1.0 / 1.2 + 1.0 / 1.4), max_relative = 1e-12);
        assert_eq!(dbr, 0.0);
        // at the bubble point both branches agree
        let (bu, _, _) = o.b(p, rs, false);
        assert_relative_eq!(bu, b, max_relative = 1e-12);
    }

    #[test]
    fn test_live_oil_undersaturated_derivatives() {
        let o = live();
        let p = 250.0 * BARSA;
        let rs = 80.0;
        let (_, dbp, dbr) = o.b(p, rs, false);
        assert_relative_eq!(dbp, fd(|p| o.b(p, rs, false).0, p, 1e3), max_relative = 1e-6);
        assert_relative_eq!(dbr, fd(|r| o.b(p, r, false).0, rs, 1e-3), max_relative = 1e-6);
        let (_, dmp, dmr) = o.mu(p, rs, false);
        assert_relative_eq!(dmp, fd(|p| o.mu(p, rs, false).0, p, 1e3), max_relative = 1e-6);
        assert_relative_eq!(dmr, fd(|r| o.mu(p, r, false).0, rs, 1e-3), max_relative = 1e-6);
    }

    #[test]
    fn test_gas() {
        let g = GasPvt::dry(
            vec![50.0 * BARSA, 400.0 * BARSA],
            vec![0.02, 0.003],
            vec![0.012 * CENTI_POISE, 0.03 * CENTI_POISE],
        )
        .unwrap();
        assert!(!g.has_vaporized_oil());
        assert_relative_eq!(g.b(50.0 * BARSA, 0.0, true).0, 50.0, max_relative = 1e-12);
        assert_eq!(g.rv_sat(100.0 * BARSA), (0.0, 0.0));
        let g = g
            .with_rv_sat(vec![50.0 * BARSA, 400.0 * BARSA], vec![0.0, 1e-4])
            .unwrap();
        assert!(g.has_vaporized_oil());
        assert!(OilPvt::dead(vec![1.0, 2.0], vec![1.0, 0.0], vec![1.0, 1.0]).is_err());
    }
}
